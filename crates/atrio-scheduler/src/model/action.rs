//! Actions and ordering edges.
//!
//! Actions are identified by (resource, task, interval) plus the node they
//! execute on; creating the same action twice returns the existing one.
//! Pseudo-actions carry no executor work and exist purely as ordering
//! anchors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use atrio_core::{NodeId, ResourceId};
use serde::{Deserialize, Serialize};

use super::resource::ResourceIndex;

/// Index of an action in the working set arena.
pub type ActionIndex = usize;

/// The default timeout applied when no operation definition matches.
pub const DEFAULT_TIMEOUT_MS: u32 = 20_000;

/// What an action does.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Start the resource.
    Start,
    /// Stop the resource.
    Stop,
    /// Promote an unpromoted instance.
    Promote,
    /// Demote a promoted instance.
    Demote,
    /// Barrier: every start of a collective resource completed.
    Running,
    /// Barrier: every stop of a collective resource completed.
    Stopped,
    /// Barrier: every promote of a collective resource completed.
    Promoted,
    /// Barrier: every demote of a collective resource completed.
    Demoted,
    /// Probe or recurring health check.
    Monitor,
    /// First half of a live migration, on the source node.
    MigrateTo,
    /// Second half of a live migration, on the target node.
    MigrateFrom,
    /// Deliver a notification to an instance.
    Notify,
    /// Barrier: a notification phase completed.
    Notified,
    /// Cancel a recurring monitor.
    Cancel,
    /// Fence a node.
    Fence,
    /// Gate that becomes runnable once enough feeders are runnable.
    OneOrMore,
}

impl Task {
    /// The task ordered symmetrically opposite to this one, if defined.
    #[must_use]
    pub fn inverse(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::Stop),
            Self::Stop => Some(Self::Start),
            Self::Promote => Some(Self::Demote),
            Self::Demote => Some(Self::Promote),
            Self::Running => Some(Self::Stopped),
            Self::Stopped => Some(Self::Running),
            Self::Promoted => Some(Self::Demoted),
            Self::Demoted => Some(Self::Promoted),
            _ => None,
        }
    }

    /// Parses an action name from an ordering constraint.
    #[must_use]
    pub fn from_constraint_action(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "promote" => Some(Self::Promote),
            "demote" => Some(Self::Demote),
            "started" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "promoted" => Some(Self::Promoted),
            "demoted" => Some(Self::Demoted),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Promote => "promote",
            Self::Demote => "demote",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Promoted => "promoted",
            Self::Demoted => "demoted",
            Self::Monitor => "monitor",
            Self::MigrateTo => "migrate_to",
            Self::MigrateFrom => "migrate_from",
            Self::Notify => "notify",
            Self::Notified => "notified",
            Self::Cancel => "cancel",
            Self::Fence => "stonith",
            Self::OneOrMore => "one-or-more",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "promote" => Ok(Self::Promote),
            "demote" => Ok(Self::Demote),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "promoted" => Ok(Self::Promoted),
            "demoted" => Ok(Self::Demoted),
            "monitor" => Ok(Self::Monitor),
            "migrate_to" => Ok(Self::MigrateTo),
            "migrate_from" => Ok(Self::MigrateFrom),
            "notify" => Ok(Self::Notify),
            "notified" => Ok(Self::Notified),
            "cancel" => Ok(Self::Cancel),
            "stonith" => Ok(Self::Fence),
            "one-or-more" => Ok(Self::OneOrMore),
            other => Err(format!("invalid task '{other}'")),
        }
    }
}

/// Boolean action properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFlags {
    /// The action need not run; it orders others if it does.
    pub optional: bool,
    /// The action can be executed in this transition.
    pub runnable: bool,
    /// No executor work; ordering anchor only.
    pub pseudo: bool,
    /// Runnable once `required_runnable_before` feeders are runnable.
    pub requires_any: bool,
    /// Phantom start/stop standing in for a live migration.
    pub migrate_runnable: bool,
    /// A stop that fencing will perform implicitly.
    pub implied_by_fencing: bool,
}

impl Default for ActionFlags {
    fn default() -> Self {
        Self {
            optional: false,
            runnable: true,
            pseudo: false,
            requires_any: false,
            migrate_runnable: false,
            implied_by_fencing: false,
        }
    }
}

/// One action in the transition being built.
#[derive(Debug, Clone)]
pub struct Action {
    /// Owning resource, if any; fencing and set gates have none.
    pub rsc: Option<ResourceIndex>,
    /// What the action does.
    pub task: Task,
    /// Monitor interval in milliseconds (0 for everything else).
    pub interval_ms: u32,
    /// Executing node; None for pseudo-actions without a location.
    pub node: Option<NodeId>,
    /// Stable identity string, e.g. `db_start_0`.
    pub key: String,
    /// Boolean properties.
    pub flags: ActionFlags,
    /// For `requires_any` gates: feeders that must be runnable.
    pub required_runnable_before: u32,
    /// Scheduling priority, inherited from the resource.
    pub priority: i64,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u32,
    /// Operation meta-attributes carried into the graph.
    pub meta: BTreeMap<String, String>,
    /// Why the action exists, for diagnostics.
    pub reason: Option<String>,
}

impl Action {
    /// Creates a runnable real action.
    #[must_use]
    pub fn new(
        rsc: Option<ResourceIndex>,
        task: Task,
        interval_ms: u32,
        node: Option<NodeId>,
        key: String,
    ) -> Self {
        Self {
            rsc,
            task,
            interval_ms,
            node,
            key,
            flags: ActionFlags::default(),
            required_runnable_before: 0,
            priority: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            meta: BTreeMap::new(),
            reason: None,
        }
    }

    /// Marks this action as a pseudo-action.
    #[must_use]
    pub fn into_pseudo(mut self) -> Self {
        self.flags.pseudo = true;
        self
    }

    /// Returns true if this is an interval-0 probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.task == Task::Monitor && self.interval_ms == 0
    }
}

/// Builds the canonical action key for a resource operation.
#[must_use]
pub fn op_key(rsc: &ResourceId, task: Task, interval_ms: u32) -> String {
    format!("{rsc}_{task}_{interval_ms}")
}

/// Properties of an ordering edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderFlags {
    /// Ordering applies only if both actions are already scheduled.
    pub optional: bool,
    /// If the first action runs, the then action must run too.
    pub implies_then: bool,
    /// If the then action runs, the first action must run too.
    pub implies_first: bool,
    /// The then action is unrunnable while the first action is.
    pub runnable_left: bool,
    /// The edge feeds a `requires_any` gate.
    pub one_or_more: bool,
    /// Synthesized from a colocation ban.
    pub anti_colocation: bool,
    /// Prevents parallel execution without forcing either action.
    pub serialize_only: bool,
    /// Apply only to the non-migratable side of a mirrored edge.
    pub apply_first_non_migratable: bool,
    /// One-way ordering with no symmetric inverse.
    pub asymmetrical: bool,
}

impl OrderFlags {
    /// Flags for an edge that merely sequences already-scheduled actions.
    #[must_use]
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    /// Flags for a mandatory edge in the declared direction.
    #[must_use]
    pub fn mandatory() -> Self {
        Self {
            implies_then: true,
            ..Self::default()
        }
    }
}

/// A directed ordering edge between two actions.
#[derive(Debug, Clone, Copy)]
pub struct OrderingEdge {
    /// The action that goes first.
    pub first: ActionIndex,
    /// The action that follows.
    pub then: ActionIndex,
    /// Edge properties.
    pub flags: OrderFlags,
}
