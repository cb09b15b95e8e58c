//! Clone and bundle instance placement, and promotion.
//!
//! A clone is placed by placing each numbered instance like a primitive,
//! with two extra limits: at most `clone-node-max` instances per node and
//! `clone-max` overall. Instances that are already running are placed
//! first so they stay put (clones get an implicit stickiness of 1).
//!
//! Promotable clones get a second pass: placed instances are ranked by
//! promotion score on their node and the best `promoted-max` become
//! promoted, at most `promoted-node-max` per node.

use std::collections::BTreeMap;

use atrio_core::{NodeId, Score};

use crate::model::{
    LocationConstraint, ProbeMode, ResourceIndex, Role, Variant, WorkingSet,
};

use super::{allocate_primitive, effective_target, Allocator};

pub(crate) fn allocate_clone(ws: &mut WorkingSet, allocator: &mut Allocator, ix: ResourceIndex) {
    let children = ws.rsc(ix).children.clone();
    let (node_max, total_max) = match &ws.rsc(ix).variant {
        Variant::Clone(config) => (
            config.node_max.max(1),
            config
                .max
                .unwrap_or(u32::try_from(children.len()).unwrap_or(u32::MAX)),
        ),
        Variant::Bundle { replicas } => (1, *replicas),
        _ => return,
    };
    let total_max = total_max.min(u32::try_from(children.len()).unwrap_or(u32::MAX));

    // Running instances first, each group in instance order.
    let mut order: Vec<ResourceIndex> = Vec::with_capacity(children.len());
    order.extend(children.iter().copied().filter(|&c| ws.rsc(c).is_active()));
    order.extend(children.iter().copied().filter(|&c| !ws.rsc(c).is_active()));

    let mut per_node: BTreeMap<NodeId, u32> = BTreeMap::new();
    let mut placed_count = 0_u32;

    for inst in order {
        if placed_count >= total_max {
            let resource = ws.rsc_mut(inst);
            resource.allocated = None;
            resource.next_role = Role::Stopped;
            resource.placed = true;
            continue;
        }

        // Ban nodes already at their per-node instance limit through a
        // synthetic location entry, removed again after placement.
        let full: BTreeMap<NodeId, Score> = per_node
            .iter()
            .filter(|(_, &count)| count >= node_max)
            .map(|(node, _)| (node.clone(), Score::NEG_INFINITY))
            .collect();
        let pushed = if full.is_empty() {
            false
        } else {
            ws.locations.push(LocationConstraint {
                id: format!("{}-node-max", ws.rsc(ix).id),
                rsc: inst,
                role: None,
                scores: full,
                discovery: ProbeMode::Always,
            });
            true
        };

        let chosen = allocate_primitive(ws, allocator, inst, None, Score::from(1));
        if pushed {
            ws.locations.pop();
        }
        if let Some(node) = chosen {
            *per_node.entry(node).or_insert(0) += 1;
            placed_count += 1;
        }
    }

    if ws.rsc(ix).is_promotable() {
        promote_instances(ws, ix);
    }

    let strongest = ws
        .rsc(ix)
        .children
        .iter()
        .map(|&c| ws.rsc(c).next_role)
        .max()
        .unwrap_or(Role::Stopped);
    let clone_rsc = ws.rsc_mut(ix);
    clone_rsc.allocated = None;
    clone_rsc.next_role = strongest;
}

/// Ranks placed instances by promotion score and promotes the best.
fn promote_instances(ws: &mut WorkingSet, ix: ResourceIndex) {
    let Some(config) = ws.rsc(ix).variant.clone_config().cloned() else {
        return;
    };
    if effective_target(ws, ix).is_some_and(|cap| cap < Role::Promoted) {
        return;
    }

    let children = ws.rsc(ix).children.clone();
    let mut candidates: Vec<(ResourceIndex, NodeId, Score)> = Vec::new();
    for inst in children {
        let Some(node) = ws.rsc(inst).allocated.clone() else {
            continue;
        };
        if ws.rsc(inst).next_role < Role::Unpromoted {
            continue;
        }
        if effective_target(ws, inst).is_some_and(|cap| cap < Role::Promoted) {
            continue;
        }
        let score = promotion_score(ws, inst, &node);
        if score.is_ban() {
            continue;
        }
        candidates.push((inst, node, score));
    }

    candidates.sort_by(|(inst_a, _, score_a), (inst_b, _, score_b)| {
        score_b
            .cmp(score_a)
            .then_with(|| ws.rsc(*inst_a).id.cmp(&ws.rsc(*inst_b).id))
    });

    let mut promoted_total = 0_u32;
    let mut promoted_per_node: BTreeMap<NodeId, u32> = BTreeMap::new();
    for (inst, node, score) in candidates {
        if promoted_total >= config.promoted_max {
            break;
        }
        let on_node = promoted_per_node.entry(node.clone()).or_insert(0);
        if *on_node >= config.promoted_node_max {
            continue;
        }
        *on_node += 1;
        promoted_total += 1;
        tracing::debug!(
            rsc = %ws.rsc(inst).id,
            node = %node,
            score = %score,
            "promoting instance"
        );
        ws.rsc_mut(inst).next_role = Role::Promoted;
    }
}

/// Promotion score of one instance on its node.
///
/// Built from the node's recorded promotion score, promoted-role location
/// preferences, promoted-role colocations, and a small retention bonus
/// for the instance currently holding the role.
fn promotion_score(ws: &WorkingSet, inst: ResourceIndex, node: &NodeId) -> Score {
    let mut lineage = vec![inst];
    lineage.extend(ws.ancestors(inst));

    let resource = ws.rsc(inst);
    let mut score = resource
        .promotion_scores
        .get(node)
        .copied()
        .unwrap_or(Score::ZERO);

    for loc in &ws.locations {
        if loc.role == Some(Role::Promoted) && lineage.contains(&loc.rsc) {
            if let Some(delta) = loc.scores.get(node) {
                score = score + *delta;
            }
        }
    }

    for c in &ws.colocations {
        if c.dependent_role != Some(Role::Promoted) || !lineage.contains(&c.dependent) {
            continue;
        }
        let primary_here = ws
            .leaves(c.primary)
            .into_iter()
            .filter_map(|leaf| ws.rsc(leaf).allocated.as_ref())
            .any(|allocated| {
                let (Some(a), Some(b)) = (ws.nodes.get(allocated), ws.nodes.get(node)) else {
                    return false;
                };
                a.attribute(&c.node_attribute) == b.attribute(&c.node_attribute)
            });
        if c.score.is_mandatory() {
            if !primary_here {
                return Score::NEG_INFINITY;
            }
        } else if c.score.is_ban() {
            if primary_here {
                return Score::NEG_INFINITY;
            }
        } else if primary_here {
            score = score + c.score;
        }
    }

    if resource.promoted_on.contains(node) {
        score = score + Score::from(1);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::super::allocate;
    use super::*;
    use crate::model::{CloneConfig, Resource};
    use crate::unpack::testutil::{add_primitive, working_set};
    use atrio_core::ResourceId;

    fn add_clone(
        ws: &mut WorkingSet,
        id: &str,
        instances: u32,
        config: CloneConfig,
    ) -> (ResourceIndex, Vec<ResourceIndex>) {
        let clone_ix = ws
            .add_resource(Resource::new(
                ResourceId::new(id),
                Variant::Clone(config),
            ))
            .unwrap();
        let mut children = Vec::new();
        for i in 0..instances {
            let child = add_primitive(ws, &format!("{id}-child:{i}"));
            ws.rsc_mut(child).parent = Some(clone_ix);
            ws.rsc_mut(clone_ix).children.push(child);
            children.push(child);
        }
        (clone_ix, children)
    }

    #[test]
    fn instances_spread_one_per_node() {
        let mut ws = working_set(3);
        let (_, children) = add_clone(&mut ws, "c", 3, CloneConfig::default());
        allocate(&mut ws);
        let mut nodes: Vec<_> = children
            .iter()
            .filter_map(|&c| ws.rsc(c).allocated.clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        assert_eq!(nodes.len(), 3, "one instance per node");
    }

    #[test]
    fn clone_max_limits_instances() {
        let mut ws = working_set(3);
        let config = CloneConfig {
            max: Some(2),
            ..CloneConfig::default()
        };
        let (_, children) = add_clone(&mut ws, "c", 3, config);
        allocate(&mut ws);
        let placed = children
            .iter()
            .filter(|&&c| ws.rsc(c).allocated.is_some())
            .count();
        assert_eq!(placed, 2);
    }

    #[test]
    fn node_max_allows_stacking() {
        let mut ws = working_set(1);
        let config = CloneConfig {
            node_max: 2,
            ..CloneConfig::default()
        };
        let (_, children) = add_clone(&mut ws, "c", 2, config);
        allocate(&mut ws);
        let placed = children
            .iter()
            .filter(|&&c| ws.rsc(c).allocated.is_some())
            .count();
        assert_eq!(placed, 2, "both instances fit on one node");
    }

    #[test]
    fn running_instances_keep_their_nodes() {
        let mut ws = working_set(2);
        let (_, children) = add_clone(&mut ws, "c", 2, CloneConfig::default());
        ws.rsc_mut(children[1])
            .running_on
            .insert(NodeId::new("n2"));
        ws.rsc_mut(children[1]).role = Role::Started;
        allocate(&mut ws);
        assert_eq!(
            ws.rsc(children[1]).allocated,
            Some(NodeId::new("n2")),
            "stickiness holds the running instance"
        );
        assert_eq!(ws.rsc(children[0]).allocated, Some(NodeId::new("n1")));
    }

    #[test]
    fn promotion_picks_highest_score() {
        let mut ws = working_set(3);
        let config = CloneConfig {
            promotable: true,
            ..CloneConfig::default()
        };
        let (_, children) = add_clone(&mut ws, "c", 3, config);
        // Instance scores arrive per node via status attributes.
        for (i, node, score) in [(0, "n1", 100_i64), (1, "n2", 50), (2, "n3", 50)] {
            ws.rsc_mut(children[i])
                .promotion_scores
                .insert(NodeId::new(node), Score::from(score));
            ws.rsc_mut(children[i])
                .running_on
                .insert(NodeId::new(node));
            ws.rsc_mut(children[i]).role = Role::Unpromoted;
        }
        allocate(&mut ws);
        let promoted: Vec<_> = children
            .iter()
            .filter(|&&c| ws.rsc(c).next_role == Role::Promoted)
            .collect();
        assert_eq!(promoted.len(), 1);
        assert_eq!(
            ws.rsc(*promoted[0]).allocated,
            Some(NodeId::new("n1")),
            "highest promotion score wins"
        );
        assert!(children
            .iter()
            .filter(|&&c| ws.rsc(c).next_role == Role::Unpromoted)
            .count()
            == 2);
    }

    #[test]
    fn promoted_max_bounds_promotions() {
        let mut ws = working_set(3);
        let config = CloneConfig {
            promotable: true,
            promoted_max: 2,
            ..CloneConfig::default()
        };
        let (_, children) = add_clone(&mut ws, "c", 3, config);
        allocate(&mut ws);
        let promoted = children
            .iter()
            .filter(|&&c| ws.rsc(c).next_role == Role::Promoted)
            .count();
        assert_eq!(promoted, 2);
    }

    #[test]
    fn target_role_unpromoted_blocks_promotion() {
        let mut ws = working_set(2);
        let config = CloneConfig {
            promotable: true,
            ..CloneConfig::default()
        };
        let (clone_ix, children) = add_clone(&mut ws, "c", 2, config);
        ws.rsc_mut(clone_ix).target_role = Some(Role::Unpromoted);
        allocate(&mut ws);
        assert!(children
            .iter()
            .all(|&c| ws.rsc(c).next_role != Role::Promoted));
    }

    #[test]
    fn negative_promotion_score_is_never_promoted() {
        let mut ws = working_set(1);
        let config = CloneConfig {
            promotable: true,
            ..CloneConfig::default()
        };
        let (_, children) = add_clone(&mut ws, "c", 1, config);
        ws.rsc_mut(children[0])
            .promotion_scores
            .insert(NodeId::new("n1"), Score::NEG_INFINITY);
        allocate(&mut ws);
        assert_eq!(ws.rsc(children[0]).next_role, Role::Unpromoted);
    }
}
