//! Cluster node state.

use std::collections::BTreeMap;

use atrio_core::NodeId;
use serde::{Deserialize, Serialize};

/// How a node participates in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A full cluster member.
    #[default]
    Member,
    /// A remote node managed over the remote protocol.
    Remote,
    /// A guest node backed by a resource running elsewhere.
    Guest,
}

/// One cluster node and its live state.
///
/// Configuration supplies the name, kind, permanent attributes, and
/// capacity; the status document supplies membership and the transient
/// attributes.
#[derive(Debug, Clone)]
pub struct Node {
    /// The node's unique name.
    pub name: NodeId,
    /// How this node participates in the cluster.
    pub kind: NodeKind,
    /// Whether the node is a current cluster member.
    pub online: bool,
    /// Whether the node's state is unknown and it must be fenced.
    pub unclean: bool,
    /// Whether the node is cleanly shutting down.
    pub shutdown: bool,
    /// Whether the node is administratively excluded from hosting resources.
    pub standby: bool,
    /// Whether resource management is suspended on this node.
    pub maintenance: bool,
    /// Whether the node is joining and not yet fully a member.
    pub pending: bool,
    /// Merged permanent and transient attributes, including `#health-*`.
    pub attributes: BTreeMap<String, String>,
    /// Capacity per utilization attribute.
    pub capacity: BTreeMap<String, i64>,
}

impl Node {
    /// Creates an offline node with the given name.
    #[must_use]
    pub fn new(name: NodeId) -> Self {
        Self {
            name,
            kind: NodeKind::Member,
            online: false,
            unclean: false,
            shutdown: false,
            standby: false,
            maintenance: false,
            pending: false,
            attributes: BTreeMap::new(),
            capacity: BTreeMap::new(),
        }
    }

    /// Returns true if resources may be placed on this node.
    #[must_use]
    pub fn can_host(&self) -> bool {
        self.online
            && !self.unclean
            && !self.standby
            && !self.shutdown
            && !self.maintenance
            && !self.pending
    }

    /// Returns true if actions can be executed on this node right now.
    ///
    /// Weaker than [`Node::can_host`]: a node that is shutting down can
    /// still run the stops that get it there.
    #[must_use]
    pub fn can_run_actions(&self) -> bool {
        self.online && !self.unclean && !self.pending
    }

    /// Looks up an attribute, synthesizing `#uname` and `#kind`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "#uname" => Some(self.name.to_string()),
            "#kind" => Some(
                match self.kind {
                    NodeKind::Member => "member",
                    NodeKind::Remote => "remote",
                    NodeKind::Guest => "container",
                }
                .to_string(),
            ),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// Returns the health attributes (`#health-*`) of this node.
    pub fn health_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter(|(k, _)| k.starts_with("#health"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
