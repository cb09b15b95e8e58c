//! The resource forest.
//!
//! Resources are stored in an arena on the working set; `parent` and
//! `children` edges are arena indices, never owning pointers. Variants are
//! a sum type so that allocation and action generation can match on the
//! tag instead of dispatching virtually.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use atrio_core::{NodeId, ResourceId, Score};
use serde::{Deserialize, Serialize};

/// Index of a resource in the working set arena.
pub type ResourceIndex = usize;

/// A resource's role on a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// State not yet probed.
    #[default]
    Unknown,
    /// Not running.
    Stopped,
    /// Running (the only active role for non-promotable resources).
    Started,
    /// Running in the subordinate role of a promotable clone.
    Unpromoted,
    /// Running in the promoted role. Only reachable from Unpromoted.
    Promoted,
}

impl Role {
    /// Returns true if the role means the resource is active.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Unpromoted | Self::Promoted)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Started => write!(f, "Started"),
            Self::Unpromoted => write!(f, "Unpromoted"),
            Self::Promoted => write!(f, "Promoted"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Stopped" => Ok(Self::Stopped),
            "Started" => Ok(Self::Started),
            // The legacy role names remain accepted.
            "Unpromoted" | "Slave" => Ok(Self::Unpromoted),
            "Promoted" | "Master" => Ok(Self::Promoted),
            other => Err(format!("invalid role '{other}'")),
        }
    }
}

/// Legacy per-resource restart behavior for optional orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartType {
    /// Ordering has no restart side effect.
    #[default]
    Ignore,
    /// Optional orderings also restart this resource.
    Restart,
}

/// Clone-specific configuration.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    /// Total instances (default: one per cluster node).
    pub max: Option<u32>,
    /// Instances allowed per node.
    pub node_max: u32,
    /// Instances that must be runnable before dependents may proceed.
    pub min: u32,
    /// Whether instances have Promoted/Unpromoted roles.
    pub promotable: bool,
    /// Maximum promoted instances cluster-wide.
    pub promoted_max: u32,
    /// Maximum promoted instances per node.
    pub promoted_node_max: u32,
    /// Whether dependents order against same-node instances only.
    pub interleave: bool,
    /// Whether instances start sequentially.
    pub ordered: bool,
    /// Whether each instance has distinct state.
    pub globally_unique: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            max: None,
            node_max: 1,
            min: 0,
            promotable: false,
            promoted_max: 1,
            promoted_node_max: 1,
            interleave: false,
            ordered: false,
            globally_unique: false,
        }
    }
}

/// The resource variants.
#[derive(Debug, Clone)]
pub enum Variant {
    /// A single service managed by a resource agent.
    Primitive {
        /// Agent standard (`ocf`, `systemd`, `stonith`, ...).
        class: String,
        /// Agent provider, for standards that have one.
        provider: Option<String>,
        /// Agent name.
        agent: String,
    },
    /// An ordered, colocated list of children.
    Group,
    /// A resource instantiated multiple times across nodes.
    Clone(CloneConfig),
    /// A containerized clone; replicas are modeled as clone instances.
    Bundle {
        /// Number of container replicas.
        replicas: u32,
    },
}

impl Variant {
    /// Returns true for variants whose children carry the real work.
    #[must_use]
    pub fn is_collective(&self) -> bool {
        !matches!(self, Self::Primitive { .. })
    }

    /// Returns the clone configuration, if this is a clone.
    #[must_use]
    pub fn clone_config(&self) -> Option<&CloneConfig> {
        match self {
            Self::Clone(config) => Some(config),
            _ => None,
        }
    }

    /// Allocation rank: clones first, then groups, then primitives.
    #[must_use]
    pub fn allocation_rank(&self) -> u8 {
        match self {
            Self::Clone(_) | Self::Bundle { .. } => 0,
            Self::Group => 1,
            Self::Primitive { .. } => 2,
        }
    }
}

/// Boolean resource properties.
#[derive(Debug, Clone)]
pub struct ResourceFlags {
    /// Whether the scheduler may act on this resource.
    pub managed: bool,
    /// Present in status but not in configuration.
    pub orphan: bool,
    /// A failed operation was recorded for it.
    pub failed: bool,
    /// Whether live migration is permitted.
    pub allow_migrate: bool,
    /// Whether this resource may drag its colocation primaries.
    pub critical: bool,
    /// Whether notifications are sent around state changes.
    pub notify: bool,
    /// Whether the resource must not be recovered until fencing completes.
    pub frozen: bool,
}

impl Default for ResourceFlags {
    fn default() -> Self {
        Self {
            managed: true,
            orphan: false,
            failed: false,
            allow_migrate: false,
            critical: true,
            notify: false,
            frozen: false,
        }
    }
}

/// A configured operation (monitor intervals, timeouts).
#[derive(Debug, Clone)]
pub struct Operation {
    /// The operation's XML ID.
    pub id: String,
    /// Task name (`monitor`, `start`, ...).
    pub task: String,
    /// Interval in milliseconds; 0 for one-shot definitions.
    pub interval_ms: u32,
    /// Timeout in milliseconds, if configured.
    pub timeout_ms: Option<u32>,
    /// Role this operation applies to (recurring monitors).
    pub role: Option<Role>,
    /// Whether the operation is enabled.
    pub enabled: bool,
}

/// One resource in the working set.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Unique ID across the working set.
    pub id: ResourceId,
    /// The variant and its payload.
    pub variant: Variant,
    /// Arena index of the parent, if any.
    pub parent: Option<ResourceIndex>,
    /// Arena indices of children, in declaration order.
    pub children: Vec<ResourceIndex>,
    /// Boolean properties.
    pub flags: ResourceFlags,
    /// Meta-attributes as declared.
    pub meta: BTreeMap<String, String>,
    /// Instance parameters as declared.
    pub params: BTreeMap<String, String>,
    /// Utilization demands per attribute.
    pub utilization: BTreeMap<String, i64>,
    /// Configured operations.
    pub operations: Vec<Operation>,
    /// Placement stickiness.
    pub stickiness: Score,
    /// Allocation priority; higher allocates first.
    pub priority: i64,
    /// Failures per node before the node is banned (0 = never).
    pub migration_threshold: u32,
    /// Legacy restart behavior for optional orderings.
    pub restart_type: RestartType,
    /// Administrative role ceiling from `target-role`.
    pub target_role: Option<Role>,
    /// The template this primitive was instantiated from.
    pub template: Option<String>,

    // Status-derived state.
    /// Role recorded by the most recent operations.
    pub role: Role,
    /// Nodes currently running this resource.
    pub running_on: BTreeSet<NodeId>,
    /// Nodes where this resource is currently promoted.
    pub promoted_on: BTreeSet<NodeId>,
    /// Failure counts per node.
    pub fail_counts: BTreeMap<NodeId, u32>,
    /// Nodes where an operation failed.
    pub failed_on: BTreeSet<NodeId>,
    /// Nodes where a start failed.
    pub start_failed_on: BTreeSet<NodeId>,
    /// Nodes where the resource state is known (probed or operated on).
    pub known_on: BTreeSet<NodeId>,
    /// Promotion scores per node.
    pub promotion_scores: BTreeMap<NodeId, Score>,
    /// Recurring operations observed in the history, per node.
    pub active_monitors: BTreeMap<NodeId, Vec<u32>>,

    // Computed during the pass.
    /// Final allowed-node score vector.
    pub allowed: BTreeMap<NodeId, Score>,
    /// The chosen node, or None if the resource will be stopped.
    pub allocated: Option<NodeId>,
    /// The role the resource should end the transition in.
    pub next_role: Role,
    /// Whether placement has decided this resource yet.
    pub placed: bool,
}

impl Resource {
    /// Creates a resource with the given ID and variant, defaults elsewhere.
    #[must_use]
    pub fn new(id: ResourceId, variant: Variant) -> Self {
        Self {
            id,
            variant,
            parent: None,
            children: Vec::new(),
            flags: ResourceFlags::default(),
            meta: BTreeMap::new(),
            params: BTreeMap::new(),
            utilization: BTreeMap::new(),
            operations: Vec::new(),
            stickiness: Score::ZERO,
            priority: 0,
            migration_threshold: 0,
            restart_type: RestartType::Ignore,
            target_role: None,
            template: None,
            role: Role::Unknown,
            running_on: BTreeSet::new(),
            promoted_on: BTreeSet::new(),
            fail_counts: BTreeMap::new(),
            failed_on: BTreeSet::new(),
            start_failed_on: BTreeSet::new(),
            known_on: BTreeSet::new(),
            promotion_scores: BTreeMap::new(),
            active_monitors: BTreeMap::new(),
            allowed: BTreeMap::new(),
            allocated: None,
            next_role: Role::Unknown,
            placed: false,
        }
    }

    /// Returns true if this resource is currently active anywhere.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.running_on.is_empty()
    }

    /// Returns the recorded failure count on `node`.
    #[must_use]
    pub fn fail_count(&self, node: &NodeId) -> u32 {
        self.fail_counts.get(node).copied().unwrap_or(0)
    }

    /// Returns true if this is a promotable clone.
    #[must_use]
    pub fn is_promotable(&self) -> bool {
        self.variant
            .clone_config()
            .is_some_and(|c| c.promotable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_accepts_legacy_names() {
        assert_eq!("Master".parse::<Role>().unwrap(), Role::Promoted);
        assert_eq!("Slave".parse::<Role>().unwrap(), Role::Unpromoted);
        assert_eq!("Started".parse::<Role>().unwrap(), Role::Started);
        assert!("Running".parse::<Role>().is_err());
    }

    #[test]
    fn active_roles() {
        assert!(Role::Started.is_active());
        assert!(Role::Promoted.is_active());
        assert!(!Role::Stopped.is_active());
        assert!(!Role::Unknown.is_active());
    }

    #[test]
    fn allocation_rank_orders_variants() {
        let clone = Variant::Clone(CloneConfig::default());
        let group = Variant::Group;
        let prim = Variant::Primitive {
            class: "ocf".into(),
            provider: None,
            agent: "Dummy".into(),
        };
        assert!(clone.allocation_rank() < group.allocation_rank());
        assert!(group.allocation_rank() < prim.allocation_rank());
    }

    #[test]
    fn fresh_resource_is_unknown_and_unplaced() {
        let rsc = Resource::new(
            ResourceId::new("db"),
            Variant::Primitive {
                class: "ocf".into(),
                provider: Some("heartbeat".into()),
                agent: "pgsql".into(),
            },
        );
        assert_eq!(rsc.role, Role::Unknown);
        assert!(rsc.allocated.is_none());
        assert!(rsc.flags.managed);
        assert!(rsc.flags.critical);
    }
}
