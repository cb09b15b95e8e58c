//! # atrio-scheduler
//!
//! The Atrio policy engine: a pure function from a declarative cluster
//! configuration, the cluster's live status, and a point in time to a
//! transition graph, the partially-ordered set of actions (start, stop,
//! promote, demote, monitor, migrate, fence) that moves the cluster from
//! where it is toward where it should be.
//!
//! ## Pipeline
//!
//! A pass runs the stages in order, leaves first:
//!
//! 1. **Input** ([`xml::input`]): parse both documents into the typed
//!    [`model::WorkingSet`].
//! 2. **Constraint unpacking** ([`unpack`]): tags, templates, resource
//!    sets, rules, and deprecated syntax become typed constraints.
//! 3. **Placement** ([`placement`]): every resource gets a node or a
//!    decision to stop.
//! 4. **Action factory** ([`actions`]): role transitions become actions.
//! 5. **Ordering** ([`ordering`]): the action DAG is materialized.
//! 6. **Notifications** ([`notify`]): clones that want them get their
//!    pre/post protocol.
//! 7. **Emission** ([`emit`]): topological IDs, pruning, serialization.
//!
//! ## Guarantees
//!
//! - **Pure**: only the supplied `now` is ever consulted, never the wall
//!   clock; nothing is persisted, executed, or sent anywhere.
//! - **Deterministic**: identical inputs produce byte-identical graphs.
//!   Every internal collection iterates in ID order.
//! - **Non-fatal configuration errors**: invalid constraints are skipped
//!   and reported as diagnostics; only an ordering cycle (or an internal
//!   invariant violation) aborts a pass, and then no graph is returned.
//!
//! ## Example
//!
//! ```rust
//! use atrio_scheduler::{schedule, ScheduleInput};
//!
//! let configuration = r#"
//!     <configuration>
//!       <nodes>
//!         <node id="1" uname="n1"/>
//!         <node id="2" uname="n2"/>
//!       </nodes>
//!       <resources>
//!         <primitive id="web" class="ocf" provider="heartbeat" type="apache"/>
//!       </resources>
//!     </configuration>"#;
//! let status = r#"
//!     <status have-quorum="true">
//!       <node_state uname="n1" online="true"/>
//!       <node_state uname="n2" online="true"/>
//!     </status>"#;
//!
//! let output = schedule(&ScheduleInput {
//!     configuration_xml: configuration,
//!     status_xml: status,
//!     now: "2026-08-01T12:00:00Z".parse().unwrap(),
//! })
//! .unwrap();
//!
//! assert!(output.transition.find("web_start_0").is_some());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

use atrio_core::Diagnostic;
use chrono::{DateTime, Utc};

pub mod actions;
pub mod emit;
pub mod model;
pub mod notify;
pub mod options;
pub mod ordering;
pub mod placement;
pub mod rules;
pub mod unpack;
pub mod xml;

pub use emit::{GraphAction, ScheduleOutput, Transition};

/// The inputs of one scheduling pass.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleInput<'a> {
    /// The configuration subtree: options, nodes, resources, constraints.
    pub configuration_xml: &'a str,
    /// The live status: node membership, resource history, tickets.
    pub status_xml: &'a str,
    /// The instant rules are evaluated against.
    pub now: DateTime<Utc>,
}

/// A failed pass, carrying whatever diagnostics had been collected.
///
/// No partial graph exists when this is returned.
#[derive(Debug, thiserror::Error)]
#[error("scheduling pass failed: {source}")]
pub struct ScheduleFailure {
    /// What aborted the pass.
    #[source]
    pub source: atrio_core::Error,
    /// Diagnostics collected up to the failure.
    pub diagnostics: Vec<Diagnostic>,
}

/// Computes one transition graph.
///
/// This is the crate's entire public surface in one call: parse, unpack,
/// place, build actions, order, notify, emit. The pass owns all of its
/// state; two calls with identical inputs return identical outputs.
///
/// # Errors
///
/// Returns [`ScheduleFailure`] when a document is malformed, the ordering
/// graph contains a cycle, or an internal invariant is violated. The
/// failure carries all diagnostics collected before the abort.
pub fn schedule(input: &ScheduleInput<'_>) -> Result<ScheduleOutput, Box<ScheduleFailure>> {
    let parsed = xml::input::parse(input.configuration_xml, input.status_xml, input.now);
    let (mut ws, raw) = match parsed {
        Ok(parsed) => parsed,
        Err(source) => {
            return Err(Box::new(ScheduleFailure {
                source,
                diagnostics: Vec::new(),
            }))
        }
    };

    unpack::unpack_constraints(&mut ws, raw);
    placement::allocate(&mut ws);
    actions::create_actions(&mut ws);
    ordering::apply_orderings(&mut ws);
    notify::build_notifications(&mut ws);

    // Emission consumes the working set; recover the diagnostics if the
    // final sort rejects the graph.
    let diagnostics_snapshot: Vec<Diagnostic> = ws.log.entries().to_vec();
    emit::emit(ws).map_err(|source| {
        let mut diagnostics = diagnostics_snapshot;
        if matches!(source, atrio_core::Error::CycleDetected { .. }) {
            diagnostics.push(Diagnostic {
                severity: atrio_core::Severity::ConfigError,
                message: source.to_string(),
            });
        }
        Box::new(ScheduleFailure {
            source,
            diagnostics,
        })
    })
}
