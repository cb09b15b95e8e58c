//! Cluster tickets.
//!
//! A ticket is a cluster-wide boolean token, typically granted by an
//! external arbitrator, gating a set of resources across sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrio_core::TicketId;

/// What happens to dependent resources when a ticket is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LossPolicy {
    /// Stop the dependent resources.
    #[default]
    Stop,
    /// Demote promoted dependents but leave them running.
    Demote,
    /// Leave everything as-is; no recovery either.
    Freeze,
    /// Fence the nodes running dependents.
    Fence,
}

/// The live state of one ticket.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// The ticket's ID.
    pub id: TicketId,
    /// Whether this site currently holds the ticket.
    pub granted: bool,
    /// Whether the ticket is administratively on standby.
    ///
    /// Standby keeps dependents from being recovered or started but does
    /// not trigger the loss policy.
    pub standby: bool,
    /// When the ticket was last granted.
    pub last_granted: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Creates an ungranted ticket.
    #[must_use]
    pub fn new(id: TicketId) -> Self {
        Self {
            id,
            granted: false,
            standby: false,
            last_granted: None,
        }
    }
}
