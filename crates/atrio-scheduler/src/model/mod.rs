//! The typed working set: everything one scheduling pass operates on.
//!
//! Built fresh from the input documents on every pass. Resources form a
//! forest stored in an arena; actions and ordering edges accumulate in
//! arenas of their own as the pipeline stages run.

pub mod action;
pub mod constraint;
pub mod node;
pub mod resource;
pub mod ticket;
pub mod working_set;

pub use action::{
    op_key, Action, ActionFlags, ActionIndex, OrderFlags, OrderingEdge, Task, DEFAULT_TIMEOUT_MS,
};
pub use constraint::{
    ColocationConstraint, LocationConstraint, OrderEndpoint, OrderKind, OrderingConstraint,
    ProbeMode, TicketConstraint,
};
pub use node::{Node, NodeKind};
pub use resource::{
    CloneConfig, Operation, Resource, ResourceFlags, ResourceIndex, RestartType, Role, Variant,
};
pub use ticket::{LossPolicy, Ticket};
pub use working_set::WorkingSet;
