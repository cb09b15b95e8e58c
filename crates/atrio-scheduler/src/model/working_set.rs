//! The per-pass working set.
//!
//! One `WorkingSet` is built from the input documents for every scheduling
//! pass and discarded at its end; nothing survives between passes except
//! the recheck hint returned to the caller. All collections are keyed by
//! ID so that iteration order is deterministic.

use std::collections::BTreeMap;

use atrio_core::{DiagnosticLog, NodeId, ResourceId, TicketId};
use chrono::{DateTime, Utc};

use crate::options::ClusterOptions;
use crate::rules::Recheck;

use super::action::{op_key, Action, ActionIndex, OrderFlags, OrderingEdge, Task};
use super::constraint::{
    ColocationConstraint, LocationConstraint, OrderingConstraint, TicketConstraint,
};
use super::node::Node;
use super::resource::{Resource, ResourceIndex};
use super::ticket::Ticket;

/// The root container for one scheduling pass.
#[derive(Debug)]
pub struct WorkingSet {
    /// Typed cluster options.
    pub options: ClusterOptions,
    /// Whether this partition holds quorum.
    pub have_quorum: bool,
    /// All nodes, keyed by name.
    pub nodes: BTreeMap<NodeId, Node>,
    /// The resource arena; parent/child edges are indices into it.
    pub resources: Vec<Resource>,
    /// Tag ID to member resource IDs, in declaration order.
    pub tags: BTreeMap<String, Vec<ResourceId>>,
    /// Template ID to the IDs of resources instantiating it.
    pub templates: BTreeMap<String, Vec<ResourceId>>,
    /// All tickets, keyed by ID.
    pub tickets: BTreeMap<TicketId, Ticket>,
    /// Unpacked location constraints.
    pub locations: Vec<LocationConstraint>,
    /// Unpacked colocation constraints.
    pub colocations: Vec<ColocationConstraint>,
    /// Unpacked ordering constraints.
    pub orderings: Vec<OrderingConstraint>,
    /// Unpacked ticket constraints.
    pub ticket_constraints: Vec<TicketConstraint>,
    /// The action arena.
    pub actions: Vec<Action>,
    /// Ordering edges between actions.
    pub edges: Vec<OrderingEdge>,
    /// The pass time; the only clock the scheduler ever sees.
    pub now: DateTime<Utc>,
    /// Earliest future instant at which a rule could change value.
    pub recheck: Recheck,
    /// Diagnostics collected during the pass.
    pub log: DiagnosticLog,

    index: BTreeMap<ResourceId, ResourceIndex>,
    action_index: BTreeMap<(String, Option<NodeId>), ActionIndex>,
}

impl WorkingSet {
    /// Creates an empty working set for a pass at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            options: ClusterOptions::default(),
            have_quorum: true,
            nodes: BTreeMap::new(),
            resources: Vec::new(),
            tags: BTreeMap::new(),
            templates: BTreeMap::new(),
            tickets: BTreeMap::new(),
            locations: Vec::new(),
            colocations: Vec::new(),
            orderings: Vec::new(),
            ticket_constraints: Vec::new(),
            actions: Vec::new(),
            edges: Vec::new(),
            now,
            recheck: Recheck::new(now),
            log: DiagnosticLog::new(),
            index: BTreeMap::new(),
            action_index: BTreeMap::new(),
        }
    }

    // ── Resources ───────────────────────────────────────────────────

    /// Adds a resource to the arena.
    ///
    /// Duplicate IDs are rejected with a config-error diagnostic.
    pub fn add_resource(&mut self, resource: Resource) -> Option<ResourceIndex> {
        if self.index.contains_key(&resource.id) {
            self.log.config_error(format!(
                "ignoring resource '{}' because that ID is already in use",
                resource.id
            ));
            return None;
        }
        let ix = self.resources.len();
        self.index.insert(resource.id.clone(), ix);
        self.resources.push(resource);
        Some(ix)
    }

    /// Looks up a resource by ID.
    #[must_use]
    pub fn resource_index(&self, id: &ResourceId) -> Option<ResourceIndex> {
        self.index.get(id).copied()
    }

    /// Borrows the resource at `ix`.
    ///
    /// # Panics
    ///
    /// Panics if `ix` is out of bounds; indices come from this arena.
    #[must_use]
    pub fn rsc(&self, ix: ResourceIndex) -> &Resource {
        &self.resources[ix]
    }

    /// Mutably borrows the resource at `ix`.
    ///
    /// # Panics
    ///
    /// Panics if `ix` is out of bounds; indices come from this arena.
    pub fn rsc_mut(&mut self, ix: ResourceIndex) -> &mut Resource {
        &mut self.resources[ix]
    }

    /// Indices of top-level resources, in arena (declaration) order.
    #[must_use]
    pub fn top_level(&self) -> Vec<ResourceIndex> {
        (0..self.resources.len())
            .filter(|&ix| self.resources[ix].parent.is_none())
            .collect()
    }

    /// Walks from `ix` to the root of its tree.
    #[must_use]
    pub fn ancestors(&self, ix: ResourceIndex) -> Vec<ResourceIndex> {
        let mut out = Vec::new();
        let mut cursor = self.resources[ix].parent;
        while let Some(parent) = cursor {
            out.push(parent);
            cursor = self.resources[parent].parent;
        }
        out
    }

    /// Leaf (primitive) resources under `ix`, including `ix` itself.
    #[must_use]
    pub fn leaves(&self, ix: ResourceIndex) -> Vec<ResourceIndex> {
        let mut out = Vec::new();
        let mut stack = vec![ix];
        while let Some(current) = stack.pop() {
            let rsc = &self.resources[current];
            if rsc.children.is_empty() {
                out.push(current);
            } else {
                // Reverse so declaration order is preserved.
                stack.extend(rsc.children.iter().rev().copied());
            }
        }
        out
    }

    // ── Actions ─────────────────────────────────────────────────────

    /// Finds or creates the action identified by (`key`, `node`).
    ///
    /// Creating the same action twice returns the existing index, keeping
    /// action keys unique across the graph.
    pub fn new_action(
        &mut self,
        rsc: Option<ResourceIndex>,
        task: Task,
        interval_ms: u32,
        node: Option<NodeId>,
        key: String,
    ) -> ActionIndex {
        if let Some(&existing) = self.action_index.get(&(key.clone(), node.clone())) {
            return existing;
        }
        let mut action = Action::new(rsc, task, interval_ms, node.clone(), key.clone());
        if let Some(rsc_ix) = rsc {
            action.priority = self.resources[rsc_ix].priority;
        }
        let ix = self.actions.len();
        self.action_index.insert((key, node), ix);
        self.actions.push(action);
        ix
    }

    /// Finds or creates the canonical interval-0 action for a resource.
    pub fn new_rsc_action(
        &mut self,
        rsc: ResourceIndex,
        task: Task,
        node: Option<NodeId>,
    ) -> ActionIndex {
        let key = op_key(&self.resources[rsc].id, task, 0);
        self.new_action(Some(rsc), task, 0, node, key)
    }

    /// Finds or creates a pseudo-action with the given key.
    pub fn pseudo_action(&mut self, task: Task, key: String) -> ActionIndex {
        let ix = self.new_action(None, task, 0, None, key);
        self.actions[ix].flags.pseudo = true;
        ix
    }

    /// Finds an existing action by key and node.
    #[must_use]
    pub fn find_action(&self, key: &str, node: Option<&NodeId>) -> Option<ActionIndex> {
        self.action_index
            .get(&(key.to_string(), node.cloned()))
            .copied()
    }

    /// All actions of `rsc` with the given task.
    #[must_use]
    pub fn rsc_actions(&self, rsc: ResourceIndex, task: Task) -> Vec<ActionIndex> {
        (0..self.actions.len())
            .filter(|&ix| {
                let a = &self.actions[ix];
                a.rsc == Some(rsc) && a.task == task
            })
            .collect()
    }

    /// Borrows the action at `ix`.
    ///
    /// # Panics
    ///
    /// Panics if `ix` is out of bounds; indices come from this arena.
    #[must_use]
    pub fn action(&self, ix: ActionIndex) -> &Action {
        &self.actions[ix]
    }

    /// Mutably borrows the action at `ix`.
    ///
    /// # Panics
    ///
    /// Panics if `ix` is out of bounds; indices come from this arena.
    pub fn action_mut(&mut self, ix: ActionIndex) -> &mut Action {
        &mut self.actions[ix]
    }

    // ── Ordering ────────────────────────────────────────────────────

    /// Adds an ordering edge. Self-edges are ignored.
    pub fn order(&mut self, first: ActionIndex, then: ActionIndex, flags: OrderFlags) {
        if first == then {
            return;
        }
        self.edges.push(OrderingEdge { first, then, flags });
    }

    // ── Status helpers ──────────────────────────────────────────────

    /// Marks a node unclean, scheduling it for fencing.
    pub fn mark_unclean(&mut self, node: &NodeId, reason: &str) {
        if let Some(state) = self.nodes.get_mut(node) {
            if !state.unclean {
                state.unclean = true;
                self.log.warn(format!("node '{node}' is unclean: {reason}"));
            }
        }
    }

    /// Returns the ticket with `id`, creating a revoked placeholder if the
    /// status document never mentioned it.
    pub fn ticket_or_default(&mut self, id: &TicketId) -> &Ticket {
        self.tickets
            .entry(id.clone())
            .or_insert_with(|| Ticket::new(id.clone()))
    }
}
