//! XML adapters.
//!
//! The only modules allowed to know about XML. Input documents are parsed
//! once into the typed working set; the transition graph is emitted once
//! at the end. Nothing in between touches tag names.

pub mod input;
pub mod output;
