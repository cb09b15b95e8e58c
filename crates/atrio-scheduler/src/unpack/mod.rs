//! Constraint ingestion.
//!
//! Turns the raw constraint records produced by the input parser into
//! typed constraints attached to the working set. Tag and template
//! references are expanded here, resource sets lowered to pairwise
//! records, rules evaluated, and deprecated syntax honored behind
//! once-per-pass warnings.
//!
//! Invalid constraints are skipped with a config-error diagnostic;
//! unpacking always continues.

use std::collections::BTreeMap;

use atrio_core::{DeprecationGate, ResourceId, Score};

use crate::model::{ResourceIndex, WorkingSet};
use crate::rules::{EvalContext, Rule};

mod colocation;
mod location;
mod ordering;
mod sets;
mod ticket;

pub use sets::expand_reference;
pub(crate) use ordering::{apply_restart_type, ordering_flags, Direction};

/// Which constraint element a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawConstraintKind {
    /// `<rsc_location>`
    Location,
    /// `<rsc_colocation>`
    Colocation,
    /// `<rsc_order>`
    Ordering,
    /// `<rsc_ticket>`
    Ticket,
}

/// A resource set as declared, before expansion.
#[derive(Debug, Clone)]
pub struct RawSet {
    /// The set's XML ID.
    pub id: String,
    /// Member references (resources, tags, or templates), in order.
    pub members: Vec<String>,
    /// Whether members are chained in order.
    pub sequential: bool,
    /// Ordering sets: whether every member must be runnable.
    pub require_all: bool,
    /// Role filter for the whole set.
    pub role: Option<String>,
    /// Action override for ordering sets.
    pub action: Option<String>,
    /// Score override for colocation sets.
    pub score: Option<Score>,
}

/// A constraint as parsed, references unresolved.
#[derive(Debug, Clone)]
pub struct RawConstraint {
    /// The constraint's XML ID.
    pub id: String,
    /// Which element it came from.
    pub kind: RawConstraintKind,
    /// All XML attributes, verbatim.
    pub attrs: BTreeMap<String, String>,
    /// Nested location rules.
    pub rules: Vec<Rule>,
    /// Deprecated lifetime rule, already warned about.
    pub lifetime: Option<Rule>,
    /// Resource sets, in declaration order.
    pub sets: Vec<RawSet>,
}

impl RawConstraint {
    /// Returns an XML attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Unpacks every raw constraint into the working set.
pub fn unpack_constraints(ws: &mut WorkingSet, raw: Vec<RawConstraint>) {
    for constraint in raw {
        tracing::trace!(id = %constraint.id, "unpacking constraint");

        if let Some(lifetime) = &constraint.lifetime {
            let ctx = EvalContext::time_only(ws.now);
            let mut recheck = ws.recheck;
            let active = lifetime.evaluate(&ctx, &mut recheck);
            ws.recheck = recheck;
            if !active {
                ws.log.info(format!(
                    "constraint '{}' is not active at this time",
                    constraint.id
                ));
                continue;
            }
        }

        match constraint.kind {
            RawConstraintKind::Location => location::unpack(ws, &constraint),
            RawConstraintKind::Colocation => colocation::unpack(ws, &constraint),
            RawConstraintKind::Ordering => ordering::unpack(ws, &constraint),
            RawConstraintKind::Ticket => ticket::unpack(ws, &constraint),
        }
    }
}

/// Resolves a single (non-tag) resource reference.
///
/// Emits a config-error diagnostic and returns None when the reference
/// does not name a configured resource.
pub(crate) fn resolve_resource(
    ws: &mut WorkingSet,
    constraint_id: &str,
    reference: &str,
) -> Option<ResourceIndex> {
    let id = ResourceId::new(reference);
    match ws.resource_index(&id) {
        Some(ix) => Some(ix),
        None => {
            ws.log.config_error(format!(
                "ignoring constraint '{constraint_id}' because resource '{reference}' \
                 does not exist"
            ));
            None
        }
    }
}

/// Resolves a reference plus an optional clone instance number.
pub(crate) fn resolve_instance(
    ws: &mut WorkingSet,
    constraint_id: &str,
    reference: &str,
    instance: Option<&str>,
) -> Option<ResourceIndex> {
    let base = resolve_resource(ws, constraint_id, reference)?;
    let Some(instance) = instance else {
        return Some(base);
    };
    if ws.rsc(base).variant.clone_config().is_none() {
        ws.log.config_error(format!(
            "ignoring constraint '{constraint_id}' because resource '{reference}' is not \
             a clone but instance '{instance}' was requested"
        ));
        return None;
    }
    let found = ws.rsc(base).children.iter().copied().find(|&child| {
        ws.rsc(child)
            .id
            .as_str()
            .ends_with(&format!(":{instance}"))
    });
    if found.is_none() {
        ws.log.config_error(format!(
            "ignoring constraint '{constraint_id}' because resource '{reference}' has no \
             instance '{instance}'"
        ));
    }
    found
}

/// Emits the legacy-attribute warning for `symmetrical` on colocations.
pub(crate) fn warn_colocation_symmetrical(ws: &mut WorkingSet, constraint_id: &str) {
    ws.log.warn_once(
        DeprecationGate::ColocationSymmetrical,
        format!(
            "the 'symmetrical' attribute (on colocation '{constraint_id}') is not \
             supported and has no effect"
        ),
    );
}

#[cfg(test)]
pub(crate) mod testutil {
    use atrio_core::{NodeId, ResourceId};

    use crate::model::{Node, Resource, ResourceIndex, Variant, WorkingSet};
    use crate::rules::parse_datetime;

    /// A working set with `nodes` online nodes named n1..nN.
    pub fn working_set(nodes: u32) -> WorkingSet {
        let mut ws = WorkingSet::new(parse_datetime("2026-08-01 12:00:00").unwrap());
        for i in 1..=nodes {
            let name = NodeId::new(format!("n{i}"));
            let mut node = Node::new(name.clone());
            node.online = true;
            ws.nodes.insert(name, node);
        }
        ws
    }

    /// Adds a primitive with the given ID.
    pub fn add_primitive(ws: &mut WorkingSet, id: &str) -> ResourceIndex {
        ws.add_resource(Resource::new(
            ResourceId::new(id),
            Variant::Primitive {
                class: "ocf".into(),
                provider: None,
                agent: "Dummy".into(),
            },
        ))
        .expect("unique id")
    }
}
