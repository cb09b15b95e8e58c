//! # atrio-core
//!
//! Core abstractions shared across the Atrio cluster transition scheduler.
//!
//! This crate provides the foundational types used by the policy engine:
//!
//! - **Identifiers**: Strongly-typed names for nodes, resources, and tickets
//! - **Scores**: Bounded placement score arithmetic with infinity semantics
//! - **Error Types**: Shared error definitions and result types
//! - **Diagnostics**: The per-pass diagnostic log returned to callers
//!
//! ## Crate Boundary
//!
//! `atrio-core` is the only crate allowed to define shared primitives.
//! It has no opinion about XML, placement, or graph construction; those
//! live in `atrio-scheduler`.
//!
//! ## Example
//!
//! ```rust
//! use atrio_core::prelude::*;
//!
//! let node: NodeId = "node-1".parse().unwrap();
//! let score = Score::from(100) + Score::INFINITY;
//! assert!(score.is_infinite());
//! assert_eq!(node.as_str(), "node-1");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod diagnostics;
pub mod error;
pub mod id;
pub mod score;

pub use diagnostics::{DeprecationGate, Diagnostic, DiagnosticLog, Severity};
pub use error::{Error, Result};
pub use id::{NodeId, ResourceId, TicketId};
pub use score::Score;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use atrio_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::diagnostics::{DeprecationGate, Diagnostic, DiagnosticLog, Severity};
    pub use crate::error::{Error, Result};
    pub use crate::id::{NodeId, ResourceId, TicketId};
    pub use crate::score::Score;
}
