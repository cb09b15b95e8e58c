//! The per-pass diagnostic log.
//!
//! The scheduler never writes to stderr or panics on bad configuration:
//! every problem it can recover from is recorded here and returned to the
//! caller alongside the transition graph. Messages are mirrored to
//! `tracing` at the matching level for ambient observability.
//!
//! Deprecation warnings fire at most once per pass, gated by
//! [`DeprecationGate`]; the gates live on the log rather than in process
//! globals so that concurrent passes cannot interfere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Detailed trace of a scheduling decision.
    Trace,
    /// Informational; no action required.
    Info,
    /// Something suboptimal, e.g. a resource that cannot run anywhere.
    Warn,
    /// An unexpected condition that did not abort the pass.
    Error,
    /// A configuration element was invalid and has been skipped.
    ConfigError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::ConfigError => write!(f, "config-error"),
        }
    }
}

/// A single diagnostic emitted during a scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the condition is.
    pub severity: Severity,
    /// Human-readable description, including the offending element's ID.
    pub message: String,
}

/// Deprecated syntax warned about at most once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeprecationGate {
    /// `score` on an ordering constraint instead of `kind`.
    OrderScore,
    /// `require-all` on an ordering constraint instead of `clone-min`.
    RequireAll,
    /// The `restart-type` resource meta-attribute.
    RestartType,
    /// `symmetrical` on a colocation constraint.
    ColocationSymmetrical,
    /// A `lifetime` block nested in a constraint.
    Lifetime,
    /// The `remove-after-stop` resource meta-attribute.
    RemoveAfterStop,
}

/// Collects diagnostics for one scheduling pass.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
    fired: BTreeSet<DeprecationGate>,
}

impl DiagnosticLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a trace-level diagnostic.
    pub fn trace(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!("{message}");
        self.push(Severity::Trace, message);
    }

    /// Records an info-level diagnostic.
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{message}");
        self.push(Severity::Info, message);
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.push(Severity::Warn, message);
    }

    /// Records an error that did not abort the pass.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.push(Severity::Error, message);
    }

    /// Records a configuration error; the offending element is skipped.
    pub fn config_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind = "config-error", "{message}");
        self.push(Severity::ConfigError, message);
    }

    /// Records a deprecation warning unless its gate already fired.
    pub fn warn_once(&mut self, gate: DeprecationGate, message: impl Into<String>) {
        if self.fired.insert(gate) {
            self.warn(message);
        }
    }

    /// Returns the diagnostics recorded so far.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Returns true if any diagnostic at `severity` or above was recorded.
    #[must_use]
    pub fn has_at_least(&self, severity: Severity) -> bool {
        self.entries.iter().any(|d| d.severity >= severity)
    }

    /// Consumes the log, returning its diagnostics.
    #[must_use]
    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    fn push(&mut self, severity: Severity, message: String) {
        self.entries.push(Diagnostic { severity, message });
    }
}
