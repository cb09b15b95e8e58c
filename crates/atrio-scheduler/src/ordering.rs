//! The ordering engine.
//!
//! Materializes every edge of the action DAG: intrinsic role sequences
//! (stop before start, demote before stop, start before promote),
//! collective bracket pseudo-actions, group and ordered-clone chaining,
//! constraint edges with symmetric inversion, clone-min gates, fencing
//! implications, and migration mirroring. Finally propagates
//! unrunnability along `runnable-left` edges and provides the
//! deterministic topological sort used by the graph emitter.

use std::collections::VecDeque;

use atrio_core::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::model::{
    op_key, ActionIndex, OrderEndpoint, OrderFlags, OrderingConstraint, ResourceIndex, Task,
    Variant, WorkingSet,
};
use crate::unpack::{apply_restart_type, ordering_flags, Direction as OrderDir};

/// Builds every ordering edge for the pass.
pub fn apply_orderings(ws: &mut WorkingSet) {
    collective_brackets(ws);
    intrinsic_orderings(ws);
    group_chains(ws);
    ordered_clone_chains(ws);
    fencing_orderings(ws);
    constraint_orderings(ws);
    propagate_unrunnable(ws);
}

/// The bracketing pseudo-action phases of a collective resource.
const PHASES: [(Task, Task); 4] = [
    (Task::Start, Task::Running),
    (Task::Stop, Task::Stopped),
    (Task::Promote, Task::Promoted),
    (Task::Demote, Task::Demoted),
];

/// Creates pre/post pseudo-actions around each phase of a collective:
/// `start C` precedes every instance start, which all precede `running C`.
fn collective_brackets(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        if !ws.resources[ix].variant.is_collective() {
            continue;
        }
        let id = ws.rsc(ix).id.clone();
        let leaves = ws.leaves(ix);

        for (task, done_task) in PHASES {
            let child_actions: Vec<ActionIndex> = leaves
                .iter()
                .flat_map(|&leaf| ws.rsc_actions(leaf, task))
                .collect();
            if child_actions.is_empty() {
                continue;
            }
            let pre = ws.new_action(Some(ix), task, 0, None, op_key(&id, task, 0));
            ws.action_mut(pre).flags.pseudo = true;
            let post = ws.new_action(Some(ix), done_task, 0, None, op_key(&id, done_task, 0));
            ws.action_mut(post).flags.pseudo = true;

            ws.order(pre, post, OrderFlags::default());
            for child in child_actions {
                ws.order(pre, child, OrderFlags::default());
                ws.order(child, post, OrderFlags::default());
            }
        }

        // Phase sequencing at the collective level.
        let find = |ws: &WorkingSet, task: Task| ws.find_action(&op_key(&id, task, 0), None);
        let pairs = [
            (Task::Demoted, Task::Stop),
            (Task::Stopped, Task::Start),
            (Task::Running, Task::Promote),
            (Task::Demote, Task::Promote),
        ];
        for (first, then) in pairs {
            if let (Some(f), Some(t)) = (find(ws, first), find(ws, then)) {
                ws.order(f, t, OrderFlags::default());
            }
        }
    }
}

/// Per-resource role-transition edges.
fn intrinsic_orderings(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        if !ws.resources[ix].children.is_empty() {
            continue;
        }
        let stops = ws.rsc_actions(ix, Task::Stop);
        let starts = ws.rsc_actions(ix, Task::Start);
        let promotes = ws.rsc_actions(ix, Task::Promote);
        let demotes = ws.rsc_actions(ix, Task::Demote);
        let probes: Vec<ActionIndex> = ws
            .rsc_actions(ix, Task::Monitor)
            .into_iter()
            .filter(|&a| ws.action(a).is_probe())
            .collect();
        let monitors: Vec<ActionIndex> = ws
            .rsc_actions(ix, Task::Monitor)
            .into_iter()
            .filter(|&a| !ws.action(a).is_probe())
            .collect();
        let cancels = ws.rsc_actions(ix, Task::Cancel);
        let migrate_to = ws.rsc_actions(ix, Task::MigrateTo);
        let migrate_from = ws.rsc_actions(ix, Task::MigrateFrom);

        // A stop precedes any start of the same resource, except the
        // phantom start standing in for a live migration.
        for &stop in &stops {
            for &start in &starts {
                if ws.action(start).flags.migrate_runnable {
                    continue;
                }
                ws.order(
                    stop,
                    start,
                    OrderFlags {
                        runnable_left: true,
                        ..OrderFlags::default()
                    },
                );
            }
        }
        for &demote in &demotes {
            for &stop in &stops {
                ws.order(demote, stop, OrderFlags::default());
            }
            for &promote in &promotes {
                ws.order(demote, promote, OrderFlags::default());
            }
        }
        for &start in &starts {
            for &promote in &promotes {
                ws.order(
                    start,
                    promote,
                    OrderFlags {
                        runnable_left: true,
                        ..OrderFlags::default()
                    },
                );
            }
        }

        // Migration: to, then from, then cleanup stop; the phantom start
        // follows the arrival.
        for &to in &migrate_to {
            for &from in &migrate_from {
                ws.order(
                    to,
                    from,
                    OrderFlags {
                        runnable_left: true,
                        ..OrderFlags::default()
                    },
                );
            }
        }
        for &from in &migrate_from {
            for &stop in &stops {
                ws.order(from, stop, OrderFlags::default());
            }
            for &start in &starts {
                if ws.action(start).flags.migrate_runnable {
                    ws.order(from, start, OrderFlags::default());
                }
            }
        }

        // Probes complete before the resource is started anywhere.
        for &probe in &probes {
            for &start in &starts {
                ws.order(probe, start, OrderFlags::default());
            }
            for &to in &migrate_to {
                ws.order(probe, to, OrderFlags::default());
            }
        }

        // Cancels precede the stop on their node.
        for &cancel in &cancels {
            for &stop in &stops {
                if ws.action(cancel).node == ws.action(stop).node {
                    ws.order(cancel, stop, OrderFlags::default());
                }
            }
        }

        // Recurring monitors follow the action establishing their role.
        for &monitor in &monitors {
            let wants_promoted = ws.action(monitor).meta.get("role").map(String::as_str)
                == Some("Promoted");
            let anchors = if wants_promoted { &promotes } else { &starts };
            for &anchor in anchors {
                if ws.action(anchor).node == ws.action(monitor).node {
                    ws.order(anchor, monitor, OrderFlags::optional());
                }
            }
        }
    }
}

/// Group members start in order and stop in reverse order.
fn group_chains(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        if !matches!(ws.resources[ix].variant, Variant::Group) {
            continue;
        }
        let children = ws.rsc(ix).children.clone();
        for pair in children.windows(2) {
            chain_actions(ws, pair[0], pair[1], Task::Start);
            chain_actions(ws, pair[1], pair[0], Task::Stop);
        }
    }
}

/// Ordered clones start their instances sequentially.
fn ordered_clone_chains(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        let ordered = ws.resources[ix]
            .variant
            .clone_config()
            .is_some_and(|c| c.ordered);
        if !ordered {
            continue;
        }
        let children = ws.rsc(ix).children.clone();
        for pair in children.windows(2) {
            chain_actions(ws, pair[0], pair[1], Task::Start);
            chain_actions(ws, pair[1], pair[0], Task::Stop);
        }
    }
}

fn chain_actions(ws: &mut WorkingSet, first: ResourceIndex, then: ResourceIndex, task: Task) {
    let firsts = ws.rsc_actions(first, task);
    let thens = ws.rsc_actions(then, task);
    for &f in &firsts {
        for &t in &thens {
            ws.order(
                f,
                t,
                OrderFlags {
                    runnable_left: task == Task::Start,
                    ..OrderFlags::default()
                },
            );
        }
    }
}

/// Orders fencing before everything it implies, and serializes fence
/// actions themselves unless concurrent fencing is allowed.
fn fencing_orderings(ws: &mut WorkingSet) {
    let fences: Vec<(ActionIndex, atrio_core::NodeId)> = (0..ws.actions.len())
        .filter(|&a| ws.actions[a].task == Task::Fence)
        .filter_map(|a| ws.actions[a].node.clone().map(|n| (a, n)))
        .collect();

    for (fence, node) in &fences {
        let implied: Vec<ActionIndex> = (0..ws.actions.len())
            .filter(|&a| {
                ws.actions[a].flags.implied_by_fencing
                    && ws.actions[a].node.as_ref() == Some(node)
            })
            .collect();
        for action in implied {
            ws.order(*fence, action, OrderFlags::default());
        }
    }

    if !ws.options.concurrent_fencing {
        for pair in fences.windows(2) {
            ws.order(
                pair[0].0,
                pair[1].0,
                OrderFlags {
                    serialize_only: true,
                    ..OrderFlags::default()
                },
            );
        }
    }
}

/// Maps a constraint endpoint to concrete actions.
///
/// For collectives, the `first` side resolves to the post ("all done")
/// bracket and the `then` side to the pre bracket, so orderings against a
/// clone wait for every instance.
fn endpoint_actions(
    ws: &mut WorkingSet,
    endpoint: &OrderEndpoint,
    is_first_side: bool,
) -> Vec<ActionIndex> {
    match endpoint {
        OrderEndpoint::Gate { key, requires } => {
            let gate = ws.pseudo_action(Task::OneOrMore, key.clone());
            let action = ws.action_mut(gate);
            action.flags.requires_any = true;
            action.required_runnable_before = (*requires).max(action.required_runnable_before);
            vec![gate]
        }
        OrderEndpoint::Resource { rsc, task } => {
            let collective = ws.rsc(*rsc).variant.is_collective();
            if collective {
                let mapped = if is_first_side {
                    match task {
                        Task::Start => Task::Running,
                        Task::Stop => Task::Stopped,
                        Task::Promote => Task::Promoted,
                        Task::Demote => Task::Demoted,
                        other => *other,
                    }
                } else {
                    match task {
                        Task::Running => Task::Start,
                        Task::Stopped => Task::Stop,
                        Task::Promoted => Task::Promote,
                        Task::Demoted => Task::Demote,
                        other => *other,
                    }
                };
                let key = op_key(&ws.rsc(*rsc).id, mapped, 0);
                ws.find_action(&key, None).into_iter().collect()
            } else {
                ws.rsc_actions(*rsc, *task)
            }
        }
    }
}

fn constraint_orderings(ws: &mut WorkingSet) {
    let constraints = ws.orderings.clone();
    for constraint in &constraints {
        apply_constraint(ws, constraint);
        if constraint.symmetrical {
            apply_inverse(ws, constraint);
        }
    }
}

fn apply_constraint(ws: &mut WorkingSet, constraint: &OrderingConstraint) {
    // clone-min: instances feed a gate that must see enough runnable
    // starts before the dependent side may proceed.
    if constraint.clone_min > 0 {
        if let (
            OrderEndpoint::Resource {
                rsc: first_rsc,
                task: first_task,
            },
            then_endpoint,
        ) = (&constraint.first, &constraint.then)
        {
            let gate_key = format!("clone-one-or-more:{}", constraint.id);
            let gate = ws.pseudo_action(Task::OneOrMore, gate_key);
            {
                let action = ws.action_mut(gate);
                action.flags.requires_any = true;
                action.required_runnable_before = constraint.clone_min;
            }
            let leaves = ws.leaves(*first_rsc);
            for leaf in leaves {
                for action in ws.rsc_actions(leaf, *first_task) {
                    ws.order(
                        action,
                        gate,
                        OrderFlags {
                            one_or_more: true,
                            ..OrderFlags::default()
                        },
                    );
                }
            }
            let then_actions = endpoint_actions(ws, then_endpoint, false);
            for then_action in then_actions {
                let mut flags = constraint.flags;
                flags.runnable_left = true;
                ws.order(gate, then_action, flags);
            }
            return;
        }
    }

    if apply_interleaved(ws, constraint) {
        return;
    }

    let first_actions = endpoint_actions(ws, &constraint.first, true);
    let then_actions = endpoint_actions(ws, &constraint.then, false);
    for &first in &first_actions {
        for &then in &then_actions {
            ws.order(first, then, constraint.flags);
        }
    }

    migration_mirror(ws, constraint);
}

/// Interleaved clone orderings pair instances by node instead of going
/// through the whole-clone barriers: the dependent instance on a node
/// waits only for the peer instance on that same node.
///
/// Returns true if the constraint was handled here.
fn apply_interleaved(ws: &mut WorkingSet, constraint: &OrderingConstraint) -> bool {
    let (
        OrderEndpoint::Resource {
            rsc: first_rsc,
            task: first_task,
        },
        OrderEndpoint::Resource {
            rsc: then_rsc,
            task: then_task,
        },
    ) = (&constraint.first, &constraint.then)
    else {
        return false;
    };
    let both_clones = ws.rsc(*first_rsc).variant.clone_config().is_some()
        && ws.rsc(*then_rsc).variant.clone_config().is_some();
    let interleave = ws
        .rsc(*then_rsc)
        .variant
        .clone_config()
        .is_some_and(|c| c.interleave);
    if !both_clones || !interleave {
        return false;
    }

    let first_leaves = ws.leaves(*first_rsc);
    for then_leaf in ws.leaves(*then_rsc) {
        let Some(node) = ws.rsc(then_leaf).allocated.clone() else {
            continue;
        };
        let peer = first_leaves
            .iter()
            .copied()
            .find(|&leaf| ws.rsc(leaf).allocated.as_ref() == Some(&node));
        let firsts: Vec<ActionIndex> = match peer {
            Some(peer) => ws.rsc_actions(peer, *first_task),
            // No peer instance on this node: fall back to the barrier.
            None => endpoint_actions(ws, &constraint.first, true),
        };
        let thens = ws.rsc_actions(then_leaf, *then_task);
        for &first in &firsts {
            for &then in &thens {
                ws.order(first, then, constraint.flags);
            }
        }
    }
    true
}

/// The symmetric inverse: inverted tasks, swapped roles, inverse flags.
fn apply_inverse(ws: &mut WorkingSet, constraint: &OrderingConstraint) {
    let (
        OrderEndpoint::Resource {
            rsc: first_rsc,
            task: first_task,
        },
        OrderEndpoint::Resource {
            rsc: then_rsc,
            task: then_task,
        },
    ) = (&constraint.first, &constraint.then)
    else {
        return;
    };
    let (Some(inv_first), Some(inv_then)) = (first_task.inverse(), then_task.inverse()) else {
        ws.log.warn(format!(
            "cannot invert ordering '{}' (please specify the inverse manually)",
            constraint.id
        ));
        return;
    };

    let mut flags = ordering_flags(constraint.kind, inv_then, OrderDir::Inverse, true);
    apply_restart_type(
        &mut flags,
        constraint.kind,
        ws.rsc(*then_rsc).restart_type,
        OrderDir::Inverse,
    );

    let first_actions = endpoint_actions(
        ws,
        &OrderEndpoint::Resource {
            rsc: *then_rsc,
            task: inv_then,
        },
        true,
    );
    let then_actions = endpoint_actions(
        ws,
        &OrderEndpoint::Resource {
            rsc: *first_rsc,
            task: inv_first,
        },
        false,
    );
    for &first in &first_actions {
        for &then in &then_actions {
            ws.order(first, then, flags);
        }
    }
}

/// Duplicates start/stop orderings onto migration actions so migrated
/// resources still respect them.
fn migration_mirror(ws: &mut WorkingSet, constraint: &OrderingConstraint) {
    let (
        OrderEndpoint::Resource {
            rsc: first_rsc,
            task: first_task,
        },
        OrderEndpoint::Resource {
            rsc: then_rsc,
            task: then_task,
        },
    ) = (&constraint.first, &constraint.then)
    else {
        return;
    };
    if first_task != then_task || !matches!(first_task, Task::Start | Task::Stop) {
        return;
    }

    // The migration counterpart of "being started" is the arrival; of
    // "being stopped", the departure.
    let counterpart = match first_task {
        Task::Start => Task::MigrateFrom,
        _ => Task::MigrateTo,
    };
    let first_migrates: Vec<ActionIndex> = ws
        .leaves(*first_rsc)
        .into_iter()
        .flat_map(|leaf| ws.rsc_actions(leaf, counterpart))
        .collect();
    // On the then side both cases anchor on the departure half.
    let then_migrates: Vec<ActionIndex> = ws
        .leaves(*then_rsc)
        .into_iter()
        .flat_map(|leaf| ws.rsc_actions(leaf, Task::MigrateTo))
        .collect();

    if first_migrates.is_empty() && then_migrates.is_empty() {
        return;
    }

    let first_plain: Vec<ActionIndex> = endpoint_actions(ws, &constraint.first, true);
    let then_plain: Vec<ActionIndex> = endpoint_actions(ws, &constraint.then, false);

    let one_sided = first_migrates.is_empty() != then_migrates.is_empty();
    let mut flags = constraint.flags;
    if one_sided {
        flags.apply_first_non_migratable = true;
    }

    let firsts = if first_migrates.is_empty() {
        first_plain
    } else {
        first_migrates
    };
    let thens = if then_migrates.is_empty() {
        then_plain
    } else {
        then_migrates
    };
    for &first in &firsts {
        for &then in &thens {
            ws.order(first, then, flags);
        }
    }
}

/// Marks actions unrunnable and propagates along the graph.
///
/// A real action needs a usable execution node. `runnable-left` edges
/// carry unrunnability forward; `requires_any` gates become runnable once
/// enough of their feeders are.
fn propagate_unrunnable(ws: &mut WorkingSet) {
    for action in &mut ws.actions {
        if action.flags.pseudo {
            continue;
        }
        let usable = action
            .node
            .as_ref()
            .and_then(|node| ws.nodes.get(node))
            .is_some_and(crate::model::Node::can_run_actions);
        if !usable {
            action.flags.runnable = false;
        }
    }

    // Fixpoint: each pass can only turn runnable actions unrunnable.
    loop {
        let mut changed = false;

        for edge_ix in 0..ws.edges.len() {
            let edge = ws.edges[edge_ix];
            if !edge.flags.runnable_left {
                continue;
            }
            if !ws.actions[edge.first].flags.runnable && ws.actions[edge.then].flags.runnable {
                ws.actions[edge.then].flags.runnable = false;
                changed = true;
            }
        }

        for gate in 0..ws.actions.len() {
            if !ws.actions[gate].flags.requires_any || !ws.actions[gate].flags.runnable {
                continue;
            }
            let runnable_feeders = ws
                .edges
                .iter()
                .filter(|e| e.then == gate && e.flags.one_or_more)
                .filter(|e| ws.actions[e.first].flags.runnable)
                .count();
            if runnable_feeders < ws.actions[gate].required_runnable_before as usize {
                ws.actions[gate].flags.runnable = false;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
}

/// Deterministic topological sort of the action arena.
///
/// Kahn's algorithm with arena order as the tie-break, so identical
/// inputs always serialize identically. A cycle aborts the pass with the
/// participating action keys.
pub fn sort_actions(ws: &WorkingSet) -> Result<Vec<ActionIndex>> {
    let mut graph: DiGraph<ActionIndex, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..ws.actions.len())
        .map(|ix| graph.add_node(ix))
        .collect();
    for edge in &ws.edges {
        graph.add_edge(nodes[edge.first], nodes[edge.then], ());
    }

    let mut in_degree: Vec<usize> = vec![0; ws.actions.len()];
    for edge in graph.edge_references() {
        in_degree[graph[edge.target()]] += 1;
    }

    let mut queue: VecDeque<NodeIndex> = nodes
        .iter()
        .copied()
        .filter(|&n| in_degree[graph[n]] == 0)
        .collect();

    let mut sorted = Vec::with_capacity(ws.actions.len());
    while let Some(node) = queue.pop_front() {
        let action_ix = graph[node];
        sorted.push(action_ix);

        let mut neighbors: Vec<NodeIndex> =
            graph.neighbors_directed(node, Direction::Outgoing).collect();
        neighbors.sort_by_key(|&n| graph[n]);
        for neighbor in neighbors {
            let target = graph[neighbor];
            in_degree[target] = in_degree[target].saturating_sub(1);
            if in_degree[target] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if sorted.len() != ws.actions.len() {
        let mut cycle: Vec<String> = (0..ws.actions.len())
            .filter(|&ix| in_degree[ix] > 0)
            .map(|ix| ws.actions[ix].key.clone())
            .collect();
        cycle.sort();
        cycle.dedup();
        return Err(Error::CycleDetected { cycle });
    }
    Ok(sorted)
}
