//! Strongly-typed identifiers for cluster entities.
//!
//! All identifiers come from the cluster document, so unlike generated IDs
//! they are arbitrary user-supplied strings. The newtypes exist to prevent
//! mixing up entity kinds at compile time and to give every map iterated
//! by the scheduler a stable, deterministic key order.
//!
//! # Example
//!
//! ```rust
//! use atrio_core::id::{NodeId, ResourceId};
//!
//! let node: NodeId = "node-1".parse().unwrap();
//! let rsc: ResourceId = "database".parse().unwrap();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: NodeId = rsc;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! cluster_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier without validation.
            ///
            /// Prefer [`FromStr`] for text coming from an input document.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                if s.is_empty() {
                    return Err(Error::InvalidId {
                        message: concat!("empty ", $kind, " identifier").to_string(),
                    });
                }
                if s.chars().any(char::is_whitespace) {
                    return Err(Error::InvalidId {
                        message: format!(concat!($kind, " identifier '{}' contains whitespace"), s),
                    });
                }
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

cluster_id! {
    /// The unique name of a cluster node.
    ///
    /// Node names double as the default equivalence attribute for
    /// colocation (`#uname`).
    NodeId, "node"
}

cluster_id! {
    /// The unique ID of a configured resource.
    ///
    /// Clone instances use the `<template>:<n>` convention, so instance IDs
    /// sort adjacent to their template.
    ResourceId, "resource"
}

cluster_id! {
    /// The ID of a cluster-wide ticket.
    TicketId, "ticket"
}

impl ResourceId {
    /// Returns the ID of the `index`-th instance of this resource.
    #[must_use]
    pub fn instance(&self, index: u32) -> Self {
        Self(format!("{}:{index}", self.0))
    }

    /// Returns the template ID if this is a numbered instance ID.
    #[must_use]
    pub fn template(&self) -> Option<Self> {
        let (base, suffix) = self.0.rsplit_once(':')?;
        if base.is_empty() || suffix.parse::<u32>().is_err() {
            return None;
        }
        Some(Self(base.to_string()))
    }
}
