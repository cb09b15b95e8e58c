//! Typed constraints produced by the unpacker.
//!
//! Rules and resource references are resolved before these are built:
//! location rules have already been evaluated into per-node scores, tag
//! and template references expanded, and set sugar lowered to pairwise
//! records.

use std::collections::BTreeMap;

use atrio_core::{NodeId, Score, TicketId};

use super::action::{OrderFlags, Task};
use super::resource::{ResourceIndex, Role};
use super::ticket::LossPolicy;

/// Whether the resource's state is probed on nodes it cannot run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// Probe everywhere.
    #[default]
    Always,
    /// Never probe for this resource on the constrained nodes.
    Never,
    /// Probe (and run) only on the constrained nodes.
    Exclusive,
}

/// A location preference: per-node score deltas for one resource.
#[derive(Debug, Clone)]
pub struct LocationConstraint {
    /// The constraint's XML ID.
    pub id: String,
    /// The affected resource.
    pub rsc: ResourceIndex,
    /// Restrict the preference to one role.
    pub role: Option<Role>,
    /// Score delta per node, after rule evaluation.
    pub scores: BTreeMap<NodeId, Score>,
    /// Probe behavior on the constrained nodes.
    pub discovery: ProbeMode,
}

/// A colocation between a dependent and a primary resource.
#[derive(Debug, Clone)]
pub struct ColocationConstraint {
    /// The constraint's XML ID.
    pub id: String,
    /// The resource placed relative to the primary.
    pub dependent: ResourceIndex,
    /// The resource placed first.
    pub primary: ResourceIndex,
    /// Attraction (positive) or repulsion (negative).
    pub score: Score,
    /// Role filter on the dependent side.
    pub dependent_role: Option<Role>,
    /// Role filter on the primary side.
    pub primary_role: Option<Role>,
    /// Node attribute defining "same place" (default `#uname`).
    pub node_attribute: String,
    /// Whether the dependent's preferences pull on the primary.
    pub influence: bool,
}

/// The strength of an ordering constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderKind {
    /// Sequence the actions if both happen to be scheduled.
    Optional,
    /// The then action requires the first action.
    #[default]
    Mandatory,
    /// Never run the two actions concurrently.
    Serialize,
}

/// One endpoint of an ordering constraint.
#[derive(Debug, Clone)]
pub enum OrderEndpoint {
    /// An action of a resource.
    Resource {
        /// The resource.
        rsc: ResourceIndex,
        /// Which of its actions.
        task: Task,
    },
    /// A synthesized gate action, e.g. for `require-all=false` sets.
    Gate {
        /// Unique key of the gate pseudo-action.
        key: String,
        /// Feeders that must be runnable before the gate is.
        requires: u32,
    },
}

/// An ordering between two endpoints.
#[derive(Debug, Clone)]
pub struct OrderingConstraint {
    /// The constraint's XML ID (set-expanded records share theirs).
    pub id: String,
    /// The earlier endpoint.
    pub first: OrderEndpoint,
    /// The later endpoint.
    pub then: OrderEndpoint,
    /// Constraint strength.
    pub kind: OrderKind,
    /// Whether the inverse edge is implied.
    pub symmetrical: bool,
    /// Minimum runnable `first` instances before `then` may proceed.
    pub clone_min: u32,
    /// Flags for the declared-direction edge.
    pub flags: OrderFlags,
}

/// A dependency of a resource on a ticket.
#[derive(Debug, Clone)]
pub struct TicketConstraint {
    /// The constraint's XML ID.
    pub id: String,
    /// The dependent resource.
    pub rsc: ResourceIndex,
    /// The gating ticket.
    pub ticket: TicketId,
    /// Role the dependency applies to.
    pub role: Option<Role>,
    /// What revocation does to the dependent.
    pub loss_policy: LossPolicy,
}
