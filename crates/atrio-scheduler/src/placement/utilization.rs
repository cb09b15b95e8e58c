//! Capacity accounting for utilization-aware placement.
//!
//! When the placement strategy tracks capacity, every node's remaining
//! capacity is decremented as resources are assigned to it, and a node
//! without room for every named utilization attribute is not a candidate.

use std::collections::BTreeMap;

use atrio_core::NodeId;

use crate::model::WorkingSet;

/// Remaining capacity per node, consumed as resources are placed.
#[derive(Debug, Default)]
pub struct CapacityTracker {
    remaining: BTreeMap<NodeId, BTreeMap<String, i64>>,
}

impl CapacityTracker {
    /// Seeds the tracker from node capacities, minus whatever currently
    /// running resources already consume.
    #[must_use]
    pub fn new(ws: &WorkingSet) -> Self {
        let mut remaining: BTreeMap<NodeId, BTreeMap<String, i64>> = ws
            .nodes
            .values()
            .map(|node| (node.name.clone(), node.capacity.clone()))
            .collect();
        for resource in &ws.resources {
            if resource.children.is_empty() {
                for node in &resource.running_on {
                    if let Some(capacity) = remaining.get_mut(node) {
                        subtract(capacity, &resource.utilization);
                    }
                }
            }
        }
        Self { remaining }
    }

    /// Returns true if `node` still has room for `demand`.
    #[must_use]
    pub fn fits(&self, node: &NodeId, demand: &BTreeMap<String, i64>) -> bool {
        let Some(capacity) = self.remaining.get(node) else {
            return false;
        };
        demand
            .iter()
            .all(|(attr, amount)| capacity.get(attr).copied().unwrap_or(0) >= *amount)
    }

    /// Consumes `demand` from `node`.
    pub fn consume(&mut self, node: &NodeId, demand: &BTreeMap<String, i64>) {
        if let Some(capacity) = self.remaining.get_mut(node) {
            subtract(capacity, demand);
        }
    }

    /// Releases `demand` back to `node` (a resource leaving it).
    pub fn release(&mut self, node: &NodeId, demand: &BTreeMap<String, i64>) {
        if let Some(capacity) = self.remaining.get_mut(node) {
            for (attr, amount) in demand {
                *capacity.entry(attr.clone()).or_insert(0) += amount;
            }
        }
    }
}

fn subtract(capacity: &mut BTreeMap<String, i64>, demand: &BTreeMap<String, i64>) {
    for (attr, amount) in demand {
        *capacity.entry(attr.clone()).or_insert(0) -= amount;
    }
}
