//! The action factory.
//!
//! Walks every leaf resource's (current, next) role pair and produces the
//! actions that carry it there: stops and demotes on vacated nodes, starts
//! and promotes on the chosen node, live-migration pairs where permitted,
//! probes for unknown state, cancels for recurring monitors on vacated
//! nodes, and recurring monitors on the destination.
//!
//! Fencing is handled here too: every unclean node gets a fence
//! pseudo-action, and actions on such a node become pseudo-actions the
//! fence implies. The ordering engine wires the edges afterwards.

use atrio_core::{NodeId, Score};

use crate::model::{op_key, ProbeMode, ResourceIndex, Role, Task, WorkingSet};

/// The key of the fence action for `node`.
#[must_use]
pub fn fence_key(node: &NodeId) -> String {
    format!("stonith-{node}")
}

/// Creates all resource and fencing actions for the pass.
pub fn create_actions(ws: &mut WorkingSet) {
    create_fencing(ws);
    for ix in 0..ws.resources.len() {
        if ws.resources[ix].children.is_empty() {
            resource_actions(ws, ix);
        }
    }
}

/// One fence pseudo-action per unclean node (when fencing is on).
fn create_fencing(ws: &mut WorkingSet) {
    let unclean: Vec<NodeId> = ws
        .nodes
        .values()
        .filter(|node| node.unclean)
        .map(|node| node.name.clone())
        .collect();
    for node in unclean {
        if !ws.options.stonith_enabled {
            ws.log.warn(format!(
                "node '{node}' is unclean but fencing is disabled; its resources \
                 cannot be recovered"
            ));
            continue;
        }
        let delay_ms = ws.options.priority_fencing_delay.num_milliseconds();
        let fence = ws.new_action(None, Task::Fence, 0, Some(node.clone()), fence_key(&node));
        let action = ws.action_mut(fence);
        action.flags.pseudo = true;
        action.priority = Score::INFINITY.value();
        action.reason = Some(format!("node '{node}' is unclean"));
        if delay_ms > 0 {
            action
                .meta
                .insert("priority-fencing-delay".to_string(), delay_ms.to_string());
        }
    }
}

fn resource_actions(ws: &mut WorkingSet, ix: ResourceIndex) {
    let id = ws.rsc(ix).id.clone();
    if !ws.rsc(ix).flags.managed || ws.rsc(ix).flags.frozen {
        ws.log
            .info(format!("resource '{id}' is unmanaged; scheduling nothing for it"));
        return;
    }

    let target = ws.rsc(ix).allocated.clone();
    let next_role = ws.rsc(ix).next_role;
    let current_nodes: Vec<NodeId> = ws.rsc(ix).running_on.iter().cloned().collect();
    let migration = migration_target(ws, ix, target.as_ref(), &current_nodes);

    // A resource on an unclean node that will not be fenced is stuck: its
    // real state is unknowable, so it cannot be recovered elsewhere.
    let stuck = current_nodes.iter().any(|node| {
        ws.nodes
            .get(node)
            .is_some_and(|n| n.unclean && !ws.options.stonith_enabled)
    });
    if stuck {
        ws.log.warn(format!(
            "resource '{id}' is on an unfenceable node; leaving it alone"
        ));
        return;
    }

    // Stops and demotes on nodes being vacated (or fenced).
    for node in &current_nodes {
        let staying = target.as_ref() == Some(node);
        let fenced = ws.nodes.get(node).is_some_and(|n| n.unclean);
        let failed_here = ws.rsc(ix).failed_on.contains(node);

        if staying && !fenced && !failed_here {
            continue;
        }

        let promoted_here = ws.rsc(ix).promoted_on.contains(node);
        if promoted_here && (!staying || next_role < Role::Promoted || fenced || failed_here) {
            let demote = ws.new_action(
                Some(ix),
                Task::Demote,
                0,
                Some(node.clone()),
                op_key(&id, Task::Demote, 0),
            );
            if fenced {
                let action = ws.action_mut(demote);
                action.flags.pseudo = true;
                action.flags.implied_by_fencing = true;
            }
        }

        // Cancel recurring monitors before taking the resource down.
        if !fenced {
            for interval in ws
                .rsc(ix)
                .active_monitors
                .get(node)
                .cloned()
                .unwrap_or_default()
            {
                ws.new_action(
                    Some(ix),
                    Task::Cancel,
                    interval,
                    Some(node.clone()),
                    op_key(&id, Task::Cancel, interval),
                );
            }
        }

        let stop = ws.new_action(
            Some(ix),
            Task::Stop,
            0,
            Some(node.clone()),
            op_key(&id, Task::Stop, 0),
        );
        apply_operation_timeout(ws, ix, stop, "stop", 0);
        if fenced {
            let action = ws.action_mut(stop);
            action.flags.pseudo = true;
            action.flags.implied_by_fencing = true;
            action.reason = Some(format!("'{id}' is implied stopped by fencing of '{node}'"));
        } else if let Some(source) = &migration {
            if source == node {
                // The stop on the migration source is cleanup, ordered
                // after the migration completes.
                ws.action_mut(stop).reason =
                    Some(format!("cleanup of '{id}' after migration from '{node}'"));
            }
        }
    }

    // Starts and promotes on the chosen node.
    if let Some(target_node) = &target {
        let running_there = current_nodes.contains(target_node);
        let failed_there = ws.rsc(ix).failed_on.contains(target_node);

        if !running_there || failed_there {
            let start = ws.new_action(
                Some(ix),
                Task::Start,
                0,
                Some(target_node.clone()),
                op_key(&id, Task::Start, 0),
            );
            apply_operation_timeout(ws, ix, start, "start", 0);
            if let Some(source) = &migration {
                let migrate_to = ws.new_action(
                    Some(ix),
                    Task::MigrateTo,
                    0,
                    Some(source.clone()),
                    op_key(&id, Task::MigrateTo, 0),
                );
                ws.action_mut(migrate_to).meta.insert(
                    "migration-target".to_string(),
                    target_node.to_string(),
                );
                let migrate_from = ws.new_action(
                    Some(ix),
                    Task::MigrateFrom,
                    0,
                    Some(target_node.clone()),
                    op_key(&id, Task::MigrateFrom, 0),
                );
                ws.action_mut(migrate_from)
                    .meta
                    .insert("migration-source".to_string(), source.to_string());
                // The start still exists for ordering mirrors, but the
                // executor never sees it.
                let phantom = ws.action_mut(start);
                phantom.flags.pseudo = true;
                phantom.flags.migrate_runnable = true;
            }
        }

        if next_role == Role::Promoted && !ws.rsc(ix).promoted_on.contains(target_node) {
            let promote = ws.new_action(
                Some(ix),
                Task::Promote,
                0,
                Some(target_node.clone()),
                op_key(&id, Task::Promote, 0),
            );
            apply_operation_timeout(ws, ix, promote, "promote", 0);
        }
        if next_role < Role::Promoted && ws.rsc(ix).promoted_on.contains(target_node) {
            let demote = ws.new_action(
                Some(ix),
                Task::Demote,
                0,
                Some(target_node.clone()),
                op_key(&id, Task::Demote, 0),
            );
            apply_operation_timeout(ws, ix, demote, "demote", 0);
        }
    }

    create_probes(ws, ix);
    create_recurring_monitors(ws, ix);
}

/// The migration source node, if this transition is a live migration.
fn migration_target(
    ws: &WorkingSet,
    ix: ResourceIndex,
    target: Option<&NodeId>,
    current: &[NodeId],
) -> Option<NodeId> {
    let resource = ws.rsc(ix);
    let target = target?;
    if !resource.flags.allow_migrate
        || resource.flags.failed
        || resource.role != Role::Started
        || current.len() != 1
        || current[0] == *target
    {
        return None;
    }
    let source = &current[0];
    let both_usable = [source, target].iter().all(|node| {
        ws.nodes
            .get(*node)
            .is_some_and(crate::model::Node::can_run_actions)
    });
    both_usable.then(|| source.clone())
}

/// Interval-0 probes on every node whose state for the resource is unknown.
fn create_probes(ws: &mut WorkingSet, ix: ResourceIndex) {
    if !ws.options.enable_startup_probes {
        return;
    }
    let id = ws.rsc(ix).id.clone();

    // Nodes where discovery was disabled for this resource.
    let mut lineage = vec![ix];
    lineage.extend(ws.ancestors(ix));
    let never: Vec<NodeId> = ws
        .locations
        .iter()
        .filter(|loc| loc.discovery == ProbeMode::Never && lineage.contains(&loc.rsc))
        .flat_map(|loc| loc.scores.keys().cloned())
        .collect();

    let candidates: Vec<NodeId> = ws
        .nodes
        .values()
        .filter(|node| node.online && !node.unclean && !node.pending)
        .map(|node| node.name.clone())
        .filter(|node| !ws.rsc(ix).known_on.contains(node))
        .filter(|node| !never.contains(node))
        .collect();

    for node in candidates {
        let probe = ws.new_action(
            Some(ix),
            Task::Monitor,
            0,
            Some(node),
            op_key(&id, Task::Monitor, 0),
        );
        apply_operation_timeout(ws, ix, probe, "monitor", 0);
    }
}

/// Recurring monitors for the role the resource will rest in.
fn create_recurring_monitors(ws: &mut WorkingSet, ix: ResourceIndex) {
    let Some(target) = ws.rsc(ix).allocated.clone() else {
        return;
    };
    let next_role = ws.rsc(ix).next_role;
    if !next_role.is_active() {
        return;
    }
    let id = ws.rsc(ix).id.clone();
    let operations = ws.rsc(ix).operations.clone();
    let promotable_instance = ws
        .rsc(ix)
        .parent
        .is_some_and(|p| ws.rsc(p).is_promotable());
    for op in operations {
        if op.task != "monitor" || op.interval_ms == 0 || !op.enabled {
            continue;
        }
        // Role-less monitors cover the default active role; a promoted
        // instance needs an explicit Promoted monitor.
        let role_matches = match op.role {
            None => !(promotable_instance && next_role == Role::Promoted),
            Some(role) => role == next_role,
        };
        if !role_matches {
            continue;
        }
        let monitor = ws.new_action(
            Some(ix),
            Task::Monitor,
            op.interval_ms,
            Some(target.clone()),
            op_key(&id, Task::Monitor, op.interval_ms),
        );
        if let Some(timeout) = op.timeout_ms {
            ws.action_mut(monitor).timeout_ms = timeout;
        }
        if let Some(role) = op.role {
            ws.action_mut(monitor)
                .meta
                .insert("role".to_string(), role.to_string());
        }
    }
}

/// Copies a matching operation definition's timeout onto an action.
fn apply_operation_timeout(
    ws: &mut WorkingSet,
    ix: ResourceIndex,
    action: crate::model::ActionIndex,
    task: &str,
    interval_ms: u32,
) {
    let timeout = ws
        .rsc(ix)
        .operations
        .iter()
        .find(|op| op.task == task && op.interval_ms == interval_ms)
        .and_then(|op| op.timeout_ms);
    if let Some(timeout) = timeout {
        ws.action_mut(action).timeout_ms = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_TIMEOUT_MS;
    use crate::placement;
    use crate::unpack::testutil::{add_primitive, working_set};

    fn find(ws: &WorkingSet, key: &str, node: &str) -> Option<usize> {
        ws.find_action(key, Some(&NodeId::new(node)))
    }

    #[test]
    fn stopped_resource_gets_a_start_and_probes() {
        let mut ws = working_set(2);
        add_primitive(&mut ws, "a");
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "a_start_0", "n1").is_some());
        // State is unknown everywhere: probe both nodes.
        assert!(find(&ws, "a_monitor_0", "n1").is_some());
        assert!(find(&ws, "a_monitor_0", "n2").is_some());
    }

    #[test]
    fn known_state_suppresses_probes() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        for node in ["n1", "n2"] {
            ws.rsc_mut(a).known_on.insert(NodeId::new(node));
        }
        placement::allocate(&mut ws);
        create_actions(&mut ws);
        assert!(find(&ws, "a_monitor_0", "n1").is_none());
        assert!(find(&ws, "a_monitor_0", "n2").is_none());
    }

    #[test]
    fn move_produces_stop_and_start() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n2"));
        ws.rsc_mut(a).role = Role::Started;
        ws.rsc_mut(a).known_on.insert(NodeId::new("n1"));
        ws.rsc_mut(a).known_on.insert(NodeId::new("n2"));
        // Pin it away from where it runs.
        ws.rsc_mut(a).migration_threshold = 1;
        ws.rsc_mut(a).fail_counts.insert(NodeId::new("n2"), 1);
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "a_stop_0", "n2").is_some());
        assert!(find(&ws, "a_start_0", "n1").is_some());
    }

    #[test]
    fn migration_produces_pair_and_phantom_start() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).flags.allow_migrate = true;
        ws.rsc_mut(a).running_on.insert(NodeId::new("n2"));
        ws.rsc_mut(a).role = Role::Started;
        for node in ["n1", "n2"] {
            ws.rsc_mut(a).known_on.insert(NodeId::new(node));
        }
        ws.rsc_mut(a).stickiness = Score::from(-1);
        // Prefer the other node so the resource moves.
        ws.rsc_mut(a).migration_threshold = 0;
        let mut scores = std::collections::BTreeMap::new();
        scores.insert(NodeId::new("n1"), Score::from(100));
        ws.locations.push(crate::model::LocationConstraint {
            id: "prefer-n1".into(),
            rsc: a,
            role: None,
            scores,
            discovery: ProbeMode::Always,
        });
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "a_migrate_to_0", "n2").is_some());
        assert!(find(&ws, "a_migrate_from_0", "n1").is_some());
        assert!(find(&ws, "a_stop_0", "n2").is_some());
        let start = find(&ws, "a_start_0", "n1").unwrap();
        let flags = &ws.action(start).flags;
        assert!(flags.pseudo && flags.migrate_runnable);
    }

    #[test]
    fn unclean_node_gets_fence_and_implied_stop() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n1"));
        ws.rsc_mut(a).role = Role::Started;
        for node in ["n1", "n2"] {
            ws.rsc_mut(a).known_on.insert(NodeId::new(node));
        }
        ws.nodes.get_mut(&NodeId::new("n1")).unwrap().unclean = true;
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "stonith-n1", "n1").is_some());
        let stop = find(&ws, "a_stop_0", "n1").unwrap();
        let flags = &ws.action(stop).flags;
        assert!(flags.pseudo && flags.implied_by_fencing);
        // Recovery start on the surviving node.
        assert!(find(&ws, "a_start_0", "n2").is_some());
    }

    #[test]
    fn fencing_disabled_blocks_recovery() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.options.stonith_enabled = false;
        ws.rsc_mut(a).running_on.insert(NodeId::new("n1"));
        ws.rsc_mut(a).role = Role::Started;
        ws.nodes.get_mut(&NodeId::new("n1")).unwrap().unclean = true;
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(ws.find_action("stonith-n1", Some(&NodeId::new("n1"))).is_none());
        assert!(find(&ws, "a_start_0", "n2").is_none());
        assert!(ws
            .log
            .entries()
            .iter()
            .any(|d| d.message.contains("unfenceable")));
    }

    #[test]
    fn recurring_monitor_uses_configured_timeout() {
        let mut ws = working_set(1);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).operations.push(crate::model::Operation {
            id: "a-mon".into(),
            task: "monitor".into(),
            interval_ms: 10_000,
            timeout_ms: Some(45_000),
            role: None,
            enabled: true,
        });
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        let monitor = find(&ws, "a_monitor_10000", "n1").unwrap();
        assert_eq!(ws.action(monitor).timeout_ms, 45_000);
        let start = find(&ws, "a_start_0", "n1").unwrap();
        assert_eq!(ws.action(start).timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn cancel_emitted_for_monitors_on_vacated_node() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n2"));
        ws.rsc_mut(a).role = Role::Started;
        ws.rsc_mut(a)
            .active_monitors
            .insert(NodeId::new("n2"), vec![10_000]);
        for node in ["n1", "n2"] {
            ws.rsc_mut(a).known_on.insert(NodeId::new(node));
        }
        ws.rsc_mut(a).migration_threshold = 1;
        ws.rsc_mut(a).fail_counts.insert(NodeId::new("n2"), 1);
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "a_cancel_10000", "n2").is_some());
    }

    #[test]
    fn idle_resource_produces_only_monitors() {
        let mut ws = working_set(2);
        let a = add_primitive(&mut ws, "a");
        ws.rsc_mut(a).running_on.insert(NodeId::new("n1"));
        ws.rsc_mut(a).role = Role::Started;
        for node in ["n1", "n2"] {
            ws.rsc_mut(a).known_on.insert(NodeId::new(node));
        }
        ws.rsc_mut(a).operations.push(crate::model::Operation {
            id: "a-mon".into(),
            task: "monitor".into(),
            interval_ms: 10_000,
            timeout_ms: None,
            role: None,
            enabled: true,
        });
        placement::allocate(&mut ws);
        create_actions(&mut ws);

        assert!(find(&ws, "a_start_0", "n1").is_none());
        assert!(find(&ws, "a_stop_0", "n1").is_none());
        assert!(find(&ws, "a_monitor_10000", "n1").is_some());
    }
}
