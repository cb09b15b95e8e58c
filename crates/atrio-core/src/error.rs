//! Error types and result aliases for Atrio.
//!
//! Errors are structured for programmatic handling: a malformed constraint
//! carries its constraint ID, a dependency cycle carries its members.
//! Configuration problems inside a scheduling pass are usually reported as
//! diagnostics rather than errors; the variants here are reserved for
//! conditions that abort the pass or reject an input document outright.

/// The result type used throughout Atrio.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while computing a cluster transition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input document could not be parsed as XML.
    #[error("malformed {document} document: {message}")]
    MalformedDocument {
        /// Which document failed ("configuration" or "status").
        document: &'static str,
        /// Parser-provided detail.
        message: String,
    },

    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A score string could not be parsed.
    #[error("invalid score '{value}'")]
    InvalidScore {
        /// The unparseable score text.
        value: String,
    },

    /// A cycle was detected in the action ordering graph.
    ///
    /// Cycles are a configuration error, but one that cannot be skipped:
    /// no partial graph is emitted.
    #[error("ordering cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// The action keys participating in the cycle, in order.
        cycle: Vec<String>,
    },

    /// A configuration element was rejected outright.
    ///
    /// Most configuration problems degrade to diagnostics; this variant is
    /// used where the caller asked for strict validation of a single
    /// element.
    #[error("invalid configuration in '{id}': {message}")]
    InvalidConfiguration {
        /// The XML ID of the offending element.
        id: String,
        /// Description of the problem.
        message: String,
    },

    /// An internal invariant was violated.
    ///
    /// Indicates a bug in the scheduler itself; the pass is aborted and no
    /// graph is emitted.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl Error {
    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a new invalid-configuration error.
    #[must_use]
    pub fn invalid_configuration(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            id: id.into(),
            message: message.into(),
        }
    }
}
