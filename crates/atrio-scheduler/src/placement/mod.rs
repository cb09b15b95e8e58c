//! The placement engine.
//!
//! Assigns every resource its node (or decides it stops) by building a
//! per-node score vector from location constraints, stickiness, failure
//! history, node health, and colocations with already-placed peers, then
//! picking the best candidate deterministically.
//!
//! Resources are processed in a fixed order (priority, then variant rank,
//! then ID) so colocation propagation is well-defined: when a dependent is
//! placed, its primary has either been placed or proven unplaceable.
//! Colocation can also pull a primary's placement forward recursively.

use std::collections::{BTreeMap, BTreeSet};

use atrio_core::{NodeId, Score};

use crate::model::{Node, ResourceIndex, Role, Variant, WorkingSet};
use crate::options::{NoQuorumPolicy, PlacementStrategy};

mod clone;
pub mod health;
pub mod utilization;

use utilization::CapacityTracker;

/// Mutable allocator state threaded through one placement pass.
pub(crate) struct Allocator {
    /// Resources placed on each node during this pass.
    pub load: BTreeMap<NodeId, u32>,
    /// Remaining node capacity under capacity-tracking strategies.
    pub capacity: CapacityTracker,
    /// Guard against colocation cycles during recursive placement.
    visiting: BTreeSet<ResourceIndex>,
}

/// Places every resource in the working set.
pub fn allocate(ws: &mut WorkingSet) {
    apply_policies(ws);

    let mut allocator = Allocator {
        load: BTreeMap::new(),
        capacity: CapacityTracker::new(ws),
        visiting: BTreeSet::new(),
    };

    let mut order = ws.top_level();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&ws.resources[a], &ws.resources[b]);
        rb.priority
            .cmp(&ra.priority)
            .then(ra.variant.allocation_rank().cmp(&rb.variant.allocation_rank()))
            .then(ra.id.cmp(&rb.id))
    });

    for ix in order {
        allocate_resource(ws, &mut allocator, ix);
    }
}

/// Applies ticket loss and quorum policy before any scoring happens.
fn apply_policies(ws: &mut WorkingSet) {
    if ws.options.maintenance_mode {
        ws.log
            .info("maintenance mode is active; no resource will be started or stopped");
        for resource in &mut ws.resources {
            resource.flags.managed = false;
        }
    }

    let ticket_constraints = ws.ticket_constraints.clone();
    for tc in ticket_constraints {
        let ticket = ws.ticket_or_default(&tc.ticket).clone();
        if ticket.granted && !ticket.standby {
            continue;
        }
        if ticket.standby {
            ws.log.info(format!(
                "ticket '{}' is on standby; freezing '{}'",
                tc.ticket,
                ws.rsc(tc.rsc).id
            ));
            freeze_subtree(ws, tc.rsc);
            continue;
        }

        // A constraint bound to the promoted role only loses that role.
        let mut policy = tc.loss_policy;
        if tc.role == Some(Role::Promoted) && policy == crate::model::LossPolicy::Stop {
            policy = crate::model::LossPolicy::Demote;
        }
        let rsc_id = ws.rsc(tc.rsc).id.clone();
        match policy {
            crate::model::LossPolicy::Stop => {
                ws.log.warn(format!(
                    "ticket '{}' is revoked; stopping '{rsc_id}'",
                    tc.ticket
                ));
                cap_subtree(ws, tc.rsc, Role::Stopped);
            }
            crate::model::LossPolicy::Demote => {
                ws.log.warn(format!(
                    "ticket '{}' is revoked; demoting '{rsc_id}'",
                    tc.ticket
                ));
                cap_subtree(ws, tc.rsc, Role::Unpromoted);
            }
            crate::model::LossPolicy::Freeze => {
                ws.log.warn(format!(
                    "ticket '{}' is revoked; freezing '{rsc_id}'",
                    tc.ticket
                ));
                freeze_subtree(ws, tc.rsc);
            }
            crate::model::LossPolicy::Fence => {
                ws.log.warn(format!(
                    "ticket '{}' is revoked; fencing nodes running '{rsc_id}'",
                    tc.ticket
                ));
                let nodes: BTreeSet<NodeId> = ws
                    .leaves(tc.rsc)
                    .into_iter()
                    .flat_map(|leaf| ws.rsc(leaf).running_on.iter().cloned().collect::<Vec<_>>())
                    .collect();
                for node in nodes {
                    ws.mark_unclean(&node, "ticket loss policy is fence");
                }
                cap_subtree(ws, tc.rsc, Role::Stopped);
            }
        }
    }

    if !ws.have_quorum {
        match ws.options.no_quorum_policy {
            NoQuorumPolicy::Ignore => {}
            NoQuorumPolicy::Stop | NoQuorumPolicy::Suicide => {
                if ws.options.no_quorum_policy == NoQuorumPolicy::Suicide {
                    ws.log
                        .warn("quorum lost with no-quorum-policy=suicide; partition must die");
                } else {
                    ws.log.warn("quorum lost; stopping all resources");
                }
                for ix in ws.top_level() {
                    cap_subtree(ws, ix, Role::Stopped);
                }
            }
            NoQuorumPolicy::Demote => {
                ws.log
                    .warn("quorum lost; demoting promoted resources and stopping the rest");
                for ix in ws.top_level() {
                    cap_subtree(ws, ix, Role::Unpromoted);
                }
            }
            NoQuorumPolicy::Freeze => {
                ws.log
                    .warn("quorum lost; freezing active resources and starting nothing");
                for ix in 0..ws.resources.len() {
                    if ws.resources[ix].children.is_empty() {
                        if ws.resources[ix].is_active() {
                            ws.resources[ix].flags.frozen = true;
                        } else {
                            ws.resources[ix].target_role = Some(Role::Stopped);
                        }
                    }
                }
            }
        }
    }
}

/// Tightens the target role of a subtree; never loosens an existing cap.
fn cap_subtree(ws: &mut WorkingSet, ix: ResourceIndex, cap: Role) {
    let mut stack = vec![ix];
    while let Some(current) = stack.pop() {
        let resource = &mut ws.resources[current];
        resource.target_role = Some(match resource.target_role {
            Some(existing) if existing <= cap => existing,
            _ => cap,
        });
        stack.extend(resource.children.iter().copied());
    }
}

fn freeze_subtree(ws: &mut WorkingSet, ix: ResourceIndex) {
    let mut stack = vec![ix];
    while let Some(current) = stack.pop() {
        ws.resources[current].flags.frozen = true;
        stack.extend(ws.resources[current].children.iter().copied());
    }
}

/// Places one top-level resource (and its children).
pub(crate) fn allocate_resource(ws: &mut WorkingSet, allocator: &mut Allocator, ix: ResourceIndex) {
    if ws.rsc(ix).placed || !allocator.visiting.insert(ix) {
        return;
    }
    match ws.rsc(ix).variant {
        Variant::Primitive { .. } => {
            allocate_primitive(ws, allocator, ix, None, Score::ZERO);
        }
        Variant::Group => allocate_group(ws, allocator, ix),
        Variant::Clone(_) | Variant::Bundle { .. } => clone::allocate_clone(ws, allocator, ix),
    }
    ws.rsc_mut(ix).placed = true;
    allocator.visiting.remove(&ix);
}

/// Places a group: members share the first member's node, in order, and a
/// member that cannot run takes every later member down with it.
fn allocate_group(ws: &mut WorkingSet, allocator: &mut Allocator, ix: ResourceIndex) {
    let children = ws.rsc(ix).children.clone();
    let mut pin: Option<NodeId> = None;
    let mut blocked = false;
    for (position, child) in children.iter().copied().enumerate() {
        if blocked {
            let id = ws.rsc(child).id.clone();
            ws.log.warn(format!(
                "group member '{id}' cannot run because an earlier member is stopped"
            ));
            ws.rsc_mut(child).next_role = Role::Stopped;
            ws.rsc_mut(child).placed = true;
            continue;
        }
        let chosen = allocate_primitive(ws, allocator, child, pin.as_ref(), Score::ZERO);
        match chosen {
            Some(node) => {
                if position == 0 {
                    pin = Some(node);
                }
            }
            None => blocked = true,
        }
    }
    let group_node = children
        .first()
        .and_then(|&first| ws.rsc(first).allocated.clone());
    let group_role = if group_node.is_some() {
        Role::Started
    } else {
        Role::Stopped
    };
    let group = ws.rsc_mut(ix);
    group.allocated = group_node;
    group.next_role = group_role;
}

/// Places a single primitive. Returns the chosen node.
pub(crate) fn allocate_primitive(
    ws: &mut WorkingSet,
    allocator: &mut Allocator,
    ix: ResourceIndex,
    pin: Option<&NodeId>,
    default_stickiness: Score,
) -> Option<NodeId> {
    if ws.rsc(ix).placed {
        return ws.rsc(ix).allocated.clone();
    }

    // Unmanaged and frozen resources keep whatever state they have.
    if !ws.rsc(ix).flags.managed || ws.rsc(ix).flags.frozen {
        let current = ws.rsc(ix).running_on.iter().next().cloned();
        let role = ws.rsc(ix).role;
        let resource = ws.rsc_mut(ix);
        resource.allocated = current.clone();
        resource.next_role = role;
        resource.placed = true;
        return current;
    }

    let desired = desired_role(ws, ix);
    let allowed = compute_allowed(ws, allocator, ix, default_stickiness, pin);
    ws.rsc_mut(ix).allowed = allowed.clone();

    if desired == Role::Stopped {
        let resource = ws.rsc_mut(ix);
        resource.allocated = None;
        resource.next_role = Role::Stopped;
        resource.placed = true;
        return None;
    }

    let chosen = choose_node(ws, allocator, ix, &allowed);
    match chosen {
        Some(node) => {
            *allocator.load.entry(node.clone()).or_insert(0) += 1;
            let demand = ws.rsc(ix).utilization.clone();
            if ws.options.placement_strategy.tracks_capacity() {
                allocator.capacity.consume(&node, &demand);
            }
            let resource = ws.rsc_mut(ix);
            resource.allocated = Some(node.clone());
            resource.next_role = desired;
            resource.placed = true;
            tracing::debug!(rsc = %resource.id, node = %node, "placed");
            Some(node)
        }
        None => {
            let id = ws.rsc(ix).id.clone();
            let reasons = ban_summary(ws, &allowed);
            ws.log
                .warn(format!("resource '{id}' cannot run anywhere ({reasons})"));
            let resource = ws.rsc_mut(ix);
            resource.allocated = None;
            resource.next_role = Role::Stopped;
            resource.placed = true;
            None
        }
    }
}

/// The role the resource should reach, before promotion is decided.
fn desired_role(ws: &WorkingSet, ix: ResourceIndex) -> Role {
    let base = if ws.rsc(ix).parent.is_some_and(|p| ws.rsc(p).is_promotable()) {
        Role::Unpromoted
    } else {
        Role::Started
    };
    match effective_target(ws, ix) {
        Some(Role::Stopped) => Role::Stopped,
        _ => base,
    }
}

/// The tightest target-role cap on the resource or its ancestors.
pub(crate) fn effective_target(ws: &WorkingSet, ix: ResourceIndex) -> Option<Role> {
    let mut cap: Option<Role> = ws.rsc(ix).target_role;
    for ancestor in ws.ancestors(ix) {
        if let Some(role) = ws.rsc(ancestor).target_role {
            cap = Some(match cap {
                Some(existing) if existing <= role => existing,
                _ => role,
            });
        }
    }
    cap
}

/// Builds the final allowed-node score vector for one primitive.
fn compute_allowed(
    ws: &mut WorkingSet,
    allocator: &mut Allocator,
    ix: ResourceIndex,
    default_stickiness: Score,
    pin: Option<&NodeId>,
) -> BTreeMap<NodeId, Score> {
    let mut lineage = vec![ix];
    lineage.extend(ws.ancestors(ix));

    let locations: Vec<crate::model::LocationConstraint> = ws
        .locations
        .iter()
        .filter(|loc| lineage.contains(&loc.rsc))
        .filter(|loc| {
            // Promoted-role preferences feed promotion, not placement;
            // other role filters never add anything here.
            matches!(loc.role, None | Some(Role::Started | Role::Unpromoted))
        })
        .cloned()
        .collect();

    // In an asymmetric cluster a node is only eligible once some location
    // constraint mentions it without banning it.
    let opted_in: BTreeSet<NodeId> = locations
        .iter()
        .flat_map(|loc| {
            loc.scores
                .iter()
                .filter(|(_, score)| !score.is_ban())
                .map(|(node, _)| node.clone())
        })
        .collect();

    let mut allowed: BTreeMap<NodeId, Score> = ws
        .nodes
        .values()
        .map(|node| {
            let base = if !node.can_host() {
                Score::NEG_INFINITY
            } else if ws.options.symmetric_cluster || opted_in.contains(&node.name) {
                Score::ZERO
            } else {
                Score::NEG_INFINITY
            };
            (node.name.clone(), base)
        })
        .collect();

    // Location constraint contributions.
    for loc in &locations {
        for (node, score) in &loc.scores {
            if let Some(slot) = allowed.get_mut(node) {
                *slot = *slot + *score;
            }
        }
        // Exclusive discovery: nodes the constraint does not mention are
        // out of bounds entirely.
        if loc.discovery == crate::model::ProbeMode::Exclusive {
            for (node, slot) in allowed.iter_mut() {
                if !loc.scores.contains_key(node) {
                    *slot = Score::NEG_INFINITY;
                }
            }
        }
    }

    // Node health.
    let health: Vec<(NodeId, Score)> = ws
        .nodes
        .values()
        .map(|node| (node.name.clone(), health::node_health_score(node, &ws.options)))
        .collect();
    for (node, score) in health {
        if let Some(slot) = allowed.get_mut(&node) {
            *slot = *slot + score;
        }
    }

    // Stickiness for nodes already running the resource.
    let stickiness = if ws.rsc(ix).stickiness == Score::ZERO {
        default_stickiness
    } else {
        ws.rsc(ix).stickiness
    };
    if stickiness != Score::ZERO {
        for node in ws.rsc(ix).running_on.clone() {
            if let Some(slot) = allowed.get_mut(&node) {
                *slot = *slot + stickiness;
            }
        }
    }

    // Failure history.
    let threshold = ws.rsc(ix).migration_threshold;
    if threshold > 0 {
        let banned: Vec<NodeId> = ws
            .rsc(ix)
            .fail_counts
            .iter()
            .filter(|(_, &count)| count >= threshold)
            .map(|(node, _)| node.clone())
            .collect();
        for node in banned {
            let id = ws.rsc(ix).id.clone();
            ws.log.warn(format!(
                "forcing '{id}' away from '{node}' after reaching migration-threshold"
            ));
            allowed.insert(node, Score::NEG_INFINITY);
        }
    }
    if ws.options.start_failure_is_fatal {
        for node in ws.rsc(ix).start_failed_on.clone() {
            allowed.insert(node, Score::NEG_INFINITY);
        }
    }

    apply_colocations(ws, allocator, &lineage, &mut allowed);
    apply_influence(ws, &lineage, &mut allowed);

    if let Some(pin) = pin {
        for (node, slot) in allowed.iter_mut() {
            if node != pin {
                *slot = Score::NEG_INFINITY;
            }
        }
    }

    allowed
}

/// Applies colocations where this resource (or an ancestor) is dependent.
fn apply_colocations(
    ws: &mut WorkingSet,
    allocator: &mut Allocator,
    lineage: &[ResourceIndex],
    allowed: &mut BTreeMap<NodeId, Score>,
) {
    let relevant: Vec<crate::model::ColocationConstraint> = ws
        .colocations
        .iter()
        .filter(|c| lineage.contains(&c.dependent))
        .cloned()
        .collect();

    for c in relevant {
        if c.dependent_role == Some(Role::Promoted) {
            continue;
        }

        // The primary must be placed (or proven unplaceable) first.
        let primary_root = root_of(ws, c.primary);
        if !ws.rsc(primary_root).placed && !allocator.visiting.contains(&primary_root) {
            allocate_resource(ws, allocator, primary_root);
        }

        let primary_nodes = placed_nodes(ws, c.primary, c.primary_role);
        if primary_nodes.is_empty() {
            if c.score.is_mandatory() {
                for slot in allowed.values_mut() {
                    *slot = Score::NEG_INFINITY;
                }
            }
            continue;
        }

        let values: BTreeSet<String> = primary_nodes
            .iter()
            .filter_map(|node| {
                ws.nodes
                    .get(node)
                    .and_then(|n| n.attribute(&c.node_attribute))
            })
            .collect();

        for (node, slot) in allowed.iter_mut() {
            let equivalent = ws
                .nodes
                .get(node)
                .and_then(|n| n.attribute(&c.node_attribute))
                .is_some_and(|v| values.contains(&v));
            if c.score.is_mandatory() {
                if !equivalent {
                    *slot = Score::NEG_INFINITY;
                }
            } else if c.score.is_ban() {
                if equivalent {
                    *slot = Score::NEG_INFINITY;
                }
            } else if equivalent {
                *slot = *slot + c.score;
            }
        }
    }
}

/// Applies the influence of not-yet-placed dependents on a primary:
/// dependents with influence pull the primary toward where they run.
fn apply_influence(
    ws: &WorkingSet,
    lineage: &[ResourceIndex],
    allowed: &mut BTreeMap<NodeId, Score>,
) {
    for c in &ws.colocations {
        if !lineage.contains(&c.primary) || !c.influence {
            continue;
        }
        if ws.rsc(root_of(ws, c.dependent)).placed {
            continue;
        }
        let dependent_nodes: Vec<NodeId> = ws
            .leaves(c.dependent)
            .into_iter()
            .flat_map(|leaf| ws.rsc(leaf).running_on.iter().cloned().collect::<Vec<_>>())
            .collect();
        if dependent_nodes.is_empty() || c.score.is_ban() {
            continue;
        }
        let values: BTreeSet<String> = dependent_nodes
            .iter()
            .filter_map(|node| {
                ws.nodes
                    .get(node)
                    .and_then(|n| n.attribute(&c.node_attribute))
            })
            .collect();
        for (node, slot) in allowed.iter_mut() {
            let equivalent = ws
                .nodes
                .get(node)
                .and_then(|n| n.attribute(&c.node_attribute))
                .is_some_and(|v| values.contains(&v));
            if equivalent {
                *slot = *slot + c.score;
            }
        }
    }
}

/// The root of a resource's tree.
pub(crate) fn root_of(ws: &WorkingSet, ix: ResourceIndex) -> ResourceIndex {
    ws.ancestors(ix).last().copied().unwrap_or(ix)
}

/// Nodes a (possibly collective) resource has been placed on, optionally
/// filtered to instances reaching `role`.
fn placed_nodes(
    ws: &WorkingSet,
    ix: ResourceIndex,
    role: Option<Role>,
) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = ws
        .leaves(ix)
        .into_iter()
        .filter(|&leaf| match role {
            Some(wanted) => ws.rsc(leaf).next_role >= wanted,
            None => true,
        })
        .filter_map(|leaf| ws.rsc(leaf).allocated.clone())
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

/// Picks the best candidate node from an allowed vector.
fn choose_node(
    ws: &WorkingSet,
    allocator: &Allocator,
    ix: ResourceIndex,
    allowed: &BTreeMap<NodeId, Score>,
) -> Option<NodeId> {
    let strategy = ws.options.placement_strategy;
    let resource = ws.rsc(ix);

    let mut candidates: Vec<(&NodeId, Score)> = allowed
        .iter()
        .filter(|(_, score)| !score.is_ban())
        .filter(|(node, _)| ws.nodes.get(*node).is_some_and(Node::can_host))
        .filter(|(node, _)| {
            !strategy.tracks_capacity()
                || allocator.capacity.fits(node, &resource.utilization)
        })
        .map(|(node, score)| (node, *score))
        .collect();

    // BTreeMap iteration already yields name order; the stable sort keeps
    // it as the final tie-break.
    candidates.sort_by(|(node_a, score_a), (node_b, score_b)| {
        score_b
            .cmp(score_a)
            .then_with(|| {
                let runs_a = resource.running_on.contains(*node_a);
                let runs_b = resource.running_on.contains(*node_b);
                runs_b.cmp(&runs_a)
            })
            .then_with(|| {
                let load_a = allocator.load.get(*node_a).copied().unwrap_or(0);
                let load_b = allocator.load.get(*node_b).copied().unwrap_or(0);
                match strategy {
                    PlacementStrategy::Balanced => load_a.cmp(&load_b),
                    PlacementStrategy::Utilization | PlacementStrategy::Minimal => {
                        load_b.cmp(&load_a)
                    }
                    PlacementStrategy::Default => std::cmp::Ordering::Equal,
                }
            })
    });

    candidates.first().map(|(node, _)| (*node).clone())
}

/// One-line summary of why no node was eligible, for the diagnostic.
fn ban_summary(ws: &WorkingSet, allowed: &BTreeMap<NodeId, Score>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (node, score) in allowed {
        let state = if !ws.nodes.get(node).is_some_and(Node::can_host) {
            "unavailable"
        } else if score.is_ban() {
            "banned"
        } else {
            continue;
        };
        parts.push(format!("{node}: {state}"));
    }
    if parts.is_empty() {
        "no nodes configured".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColocationConstraint, LocationConstraint, ProbeMode};
    use crate::unpack::testutil::{add_primitive, working_set};

    fn place(ws: &mut WorkingSet) {
        allocate(ws);
    }

    #[test]
    fn single_resource_lands_on_first_node_by_name() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n1")));
        assert_eq!(ws.rsc(a).next_role, Role::Started);
    }

    #[test]
    fn location_score_beats_name_order() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        let mut scores = BTreeMap::new();
        scores.insert(NodeId::new("n2"), Score::from(100));
        ws.locations.push(LocationConstraint {
            id: "loc".into(),
            rsc: a,
            role: None,
            scores,
            discovery: ProbeMode::Always,
        });
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n2")));
    }

    #[test]
    fn running_node_wins_ties() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n2"));
        ws.rsc_mut(a).role = Role::Started;
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n2")));
    }

    #[test]
    fn target_role_stopped_prevents_placement() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).target_role = Some(Role::Stopped);
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, None);
        assert_eq!(ws.rsc(a).next_role, Role::Stopped);
    }

    #[test]
    fn anti_colocation_separates_resources() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.colocations.push(ColocationConstraint {
            id: "c".into(),
            dependent: b,
            primary: a,
            score: Score::NEG_INFINITY,
            dependent_role: None,
            primary_role: None,
            node_attribute: "#uname".into(),
            influence: false,
        });
        place(&mut ws);
        let (na, nb) = (ws.rsc(a).allocated.clone(), ws.rsc(b).allocated.clone());
        assert!(na.is_some() && nb.is_some());
        assert_ne!(na, nb);
    }

    #[test]
    fn mandatory_colocation_follows_primary() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        let mut scores = BTreeMap::new();
        scores.insert(NodeId::new("n2"), Score::from(100));
        ws.locations.push(LocationConstraint {
            id: "loc".into(),
            rsc: a,
            role: None,
            scores,
            discovery: ProbeMode::Always,
        });
        ws.colocations.push(ColocationConstraint {
            id: "c".into(),
            dependent: b,
            primary: a,
            score: Score::INFINITY,
            dependent_role: None,
            primary_role: None,
            node_attribute: "#uname".into(),
            influence: false,
        });
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n2")));
        assert_eq!(ws.rsc(b).allocated, Some(NodeId::new("n2")));
    }

    #[test]
    fn dependent_of_stopped_primary_cannot_run() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.rsc_mut(a).target_role = Some(Role::Stopped);
        ws.colocations.push(ColocationConstraint {
            id: "c".into(),
            dependent: b,
            primary: a,
            score: Score::INFINITY,
            dependent_role: None,
            primary_role: None,
            node_attribute: "#uname".into(),
            influence: false,
        });
        place(&mut ws);
        assert_eq!(ws.rsc(b).allocated, None);
        assert_eq!(ws.rsc(b).next_role, Role::Stopped);
    }

    #[test]
    fn migration_threshold_bans_failing_node() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).migration_threshold = 2;
        ws.rsc_mut(a)
            .fail_counts
            .insert(NodeId::new("n1"), 2);
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n2")));
    }

    #[test]
    fn no_eligible_node_stops_resource_with_warning() {
        let mut ws = working_set(1);
        let a = add_primitive(&mut ws, "a");
        ws.nodes.get_mut(&NodeId::new("n1")).unwrap().standby = true;
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, None);
        assert!(ws
            .log
            .entries()
            .iter()
            .any(|d| d.message.contains("cannot run anywhere")));
    }

    #[test]
    fn asymmetric_cluster_needs_explicit_scores() {
        let mut ws = working_set(2);
        ws.options.symmetric_cluster = false;
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        let mut scores = BTreeMap::new();
        scores.insert(NodeId::new("n1"), Score::from(10));
        ws.locations.push(LocationConstraint {
            id: "loc".into(),
            rsc: b,
            role: None,
            scores,
            discovery: ProbeMode::Always,
        });
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, None, "no opt-in, no node");
        assert_eq!(ws.rsc(b).allocated, Some(NodeId::new("n1")));
    }

    #[test]
    fn quorum_loss_with_stop_policy_stops_everything() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.have_quorum = false;
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, None);
        assert_eq!(ws.rsc(a).next_role, Role::Stopped);
    }

    #[test]
    fn quorum_loss_with_freeze_keeps_running_resources() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n1"));
        ws.rsc_mut(a).role = Role::Started;
        ws.have_quorum = false;
        ws.options.no_quorum_policy = NoQuorumPolicy::Freeze;
        place(&mut ws);
        // The active resource keeps its node; the stopped one stays down.
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n1")));
        assert_eq!(ws.rsc(b).allocated, None);
    }

    #[test]
    fn balanced_strategy_spreads_load() {
        let mut ws = working_set(2);
        ws.options.placement_strategy = PlacementStrategy::Balanced;
        let a = add_primitive(&mut ws, "a");
        let b = add_primitive(&mut ws, "b");
        place(&mut ws);
        assert_ne!(ws.rsc(a).allocated, ws.rsc(b).allocated);
    }

    #[test]
    fn utilization_strategy_respects_capacity() {
        let mut ws = working_set(2);
        ws.options.placement_strategy = PlacementStrategy::Utilization;
        for (node, memory) in [("n1", 100_i64), ("n2", 1000)] {
            ws.nodes
                .get_mut(&NodeId::new(node))
                .unwrap()
                .capacity
                .insert("memory".into(), memory);
        }
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).utilization.insert("memory".into(), 500);
        place(&mut ws);
        assert_eq!(ws.rsc(a).allocated, Some(NodeId::new("n2")));
    }
}
