//! The graph emitter.
//!
//! Finalizes the pass: topologically sorts the action arena, drops
//! actions that cannot or need not execute (unrunnable real actions,
//! pseudo-actions nothing is connected to), assigns stable integer IDs in
//! topological order, resolves each action's predecessor set, and
//! serializes the result.

use std::collections::BTreeMap;

use atrio_core::{Diagnostic, NodeId, ResourceId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ActionIndex, WorkingSet};
use crate::ordering;
use crate::xml::output;

/// One emitted action of the transition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAction {
    /// Stable integer ID within this graph, dense and in execution order.
    pub id: u32,
    /// The action's identity key, e.g. `db_start_0`.
    pub key: String,
    /// Owning resource, if any.
    pub resource: Option<ResourceId>,
    /// Task name.
    pub task: String,
    /// Execution node; None for unlocated pseudo-actions.
    pub node: Option<NodeId>,
    /// Monitor interval in milliseconds.
    pub interval_ms: u32,
    /// Scheduling priority.
    pub priority: i64,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u32,
    /// Whether the executor should skip this action.
    pub pseudo: bool,
    /// Operation meta-attributes.
    pub meta: BTreeMap<String, String>,
    /// IDs of actions that must complete first.
    pub inputs: Vec<u32>,
}

/// A finished transition graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transition {
    /// Actions in topological (execution) order.
    pub actions: Vec<GraphAction>,
}

impl Transition {
    /// Returns the emitted action with the given key, if any.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&GraphAction> {
        self.actions.iter().find(|a| a.key == key)
    }

    /// Returns every emitted action with the given key.
    #[must_use]
    pub fn find_all(&self, key: &str) -> Vec<&GraphAction> {
        self.actions.iter().filter(|a| a.key == key).collect()
    }

    /// Returns true if `first` precedes `then` through any input chain.
    #[must_use]
    pub fn orders_before(&self, first_id: u32, then_id: u32) -> bool {
        let mut stack = vec![then_id];
        let mut seen = std::collections::BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(action) = self.actions.iter().find(|a| a.id == current) else {
                continue;
            };
            for &input in &action.inputs {
                if input == first_id {
                    return true;
                }
                stack.push(input);
            }
        }
        false
    }
}

/// Everything a scheduling pass returns.
#[derive(Debug)]
pub struct ScheduleOutput {
    /// The transition graph, in typed form.
    pub transition: Transition,
    /// The same graph, serialized.
    pub graph_xml: String,
    /// Earliest future instant a rule's value could change.
    pub next_recheck: Option<DateTime<Utc>>,
    /// Diagnostics collected during the pass.
    pub diagnostics: Vec<Diagnostic>,
}

/// Finalizes the working set into a [`ScheduleOutput`].
///
/// # Errors
///
/// Returns the cycle error from the topological sort, or an internal
/// error if serialization fails. No partial graph is ever produced.
pub fn emit(mut ws: WorkingSet) -> Result<ScheduleOutput> {
    let sorted = ordering::sort_actions(&ws)?;
    let emitted = select_emitted(&mut ws, &sorted);

    // Dense IDs in topological order.
    let mut ids: BTreeMap<ActionIndex, u32> = BTreeMap::new();
    for &ix in &sorted {
        if emitted[ix] {
            let id = u32::try_from(ids.len()).unwrap_or(u32::MAX);
            ids.insert(ix, id);
        }
    }

    // Predecessor sets, deduplicated and sorted.
    let mut inputs: BTreeMap<ActionIndex, Vec<u32>> = BTreeMap::new();
    for edge in &ws.edges {
        if emitted[edge.first] && emitted[edge.then] {
            let (Some(&first_id), Some(_)) = (ids.get(&edge.first), ids.get(&edge.then)) else {
                continue;
            };
            inputs.entry(edge.then).or_default().push(first_id);
        }
    }

    let mut actions = Vec::with_capacity(ids.len());
    for &ix in &sorted {
        let Some(&id) = ids.get(&ix) else {
            continue;
        };
        let action = &ws.actions[ix];
        let mut action_inputs = inputs.remove(&ix).unwrap_or_default();
        action_inputs.sort_unstable();
        action_inputs.dedup();
        actions.push(GraphAction {
            id,
            key: action.key.clone(),
            resource: action.rsc.map(|rsc| ws.resources[rsc].id.clone()),
            task: action.task.to_string(),
            node: action.node.clone(),
            interval_ms: action.interval_ms,
            priority: action.priority,
            timeout_ms: action.timeout_ms,
            pseudo: action.flags.pseudo,
            meta: action.meta.clone(),
            inputs: action_inputs,
        });
    }

    let transition = Transition { actions };
    let next_recheck = ws.recheck.at();
    let graph_xml = output::write_graph(&transition, next_recheck)?;

    Ok(ScheduleOutput {
        transition,
        graph_xml,
        next_recheck,
        diagnostics: ws.log.into_entries(),
    })
}

/// Decides which arena actions appear in the graph.
///
/// Unrunnable real actions are dropped with a warning; pseudo-actions
/// survive only while connected to at least one emitted neighbor.
fn select_emitted(ws: &mut WorkingSet, sorted: &[ActionIndex]) -> Vec<bool> {
    let mut emitted: Vec<bool> = ws
        .actions
        .iter()
        .map(|action| action.flags.runnable)
        .collect();

    let blocked: Vec<String> = ws
        .actions
        .iter()
        .filter(|action| !action.flags.runnable && !action.flags.pseudo)
        .map(|action| action.key.clone())
        .collect();
    for key in blocked {
        ws.log
            .warn(format!("action '{key}' is blocked and will not be executed"));
    }

    // Peel isolated pseudo-actions until none are left; removing one can
    // isolate the next.
    loop {
        let mut changed = false;
        for &ix in sorted {
            if !emitted[ix] || !ws.actions[ix].flags.pseudo {
                continue;
            }
            let connected = ws
                .edges
                .iter()
                .any(|e| (e.first == ix && emitted[e.then]) || (e.then == ix && emitted[e.first]));
            if !connected {
                emitted[ix] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    emitted
}
