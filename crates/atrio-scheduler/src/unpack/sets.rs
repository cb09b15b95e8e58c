//! Tag and template expansion, and resource-set plumbing.
//!
//! A constraint may reference a concrete resource, a template (all
//! resources instantiating it), or a tag (an explicit list). References
//! inside resource sets are replaced in place by their members, in
//! declaration order, before any pairwise expansion happens.

use atrio_core::ResourceId;

use crate::model::{ResourceIndex, WorkingSet};

use super::RawSet;

/// Expands one reference into concrete resource IDs.
///
/// Returns None if the reference names nothing. The order is the tag or
/// template's declaration order; a concrete resource expands to itself.
#[must_use]
pub fn expand_reference(ws: &WorkingSet, reference: &str) -> Option<Vec<ResourceId>> {
    let id = ResourceId::new(reference);
    if ws.resource_index(&id).is_some() {
        return Some(vec![id]);
    }
    if let Some(members) = ws.tags.get(reference) {
        return Some(members.clone());
    }
    if let Some(members) = ws.templates.get(reference) {
        return Some(members.clone());
    }
    None
}

/// Returns true if the reference names a tag or template, not a resource.
#[must_use]
pub fn is_collection_reference(ws: &WorkingSet, reference: &str) -> bool {
    ws.resource_index(&ResourceId::new(reference)).is_none()
        && (ws.tags.contains_key(reference) || ws.templates.contains_key(reference))
}

/// Expands a set's members to resource indices, tags included.
///
/// Any unresolvable reference invalidates the whole constraint: a
/// config-error diagnostic is emitted and None returned.
pub(crate) fn expand_set(
    ws: &mut WorkingSet,
    constraint_id: &str,
    set: &RawSet,
) -> Option<Vec<ResourceIndex>> {
    let mut out = Vec::new();
    for member in &set.members {
        let Some(ids) = expand_reference(ws, member) else {
            ws.log.config_error(format!(
                "ignoring constraint '{constraint_id}' because '{member}' does not name \
                 a resource, tag, or template"
            ));
            return None;
        };
        for id in ids {
            match ws.resource_index(&id) {
                Some(ix) => out.push(ix),
                None => {
                    ws.log.config_error(format!(
                        "ignoring constraint '{constraint_id}' because tag member '{id}' \
                         does not exist"
                    ));
                    return None;
                }
            }
        }
    }
    Some(out)
}

/// Lowers a lone reference (which may be a tag) into set form.
///
/// Constraints written against a tag behave exactly as if the tag's
/// members had been listed in an unordered set.
pub(crate) fn reference_as_set(
    ws: &mut WorkingSet,
    constraint_id: &str,
    reference: &str,
    sequential: bool,
) -> Option<RawSet> {
    let Some(ids) = expand_reference(ws, reference) else {
        ws.log.config_error(format!(
            "ignoring constraint '{constraint_id}' because resource '{reference}' \
             does not exist"
        ));
        return None;
    };
    Some(RawSet {
        id: format!("{constraint_id}-{reference}"),
        members: ids.iter().map(ToString::to_string).collect(),
        sequential,
        require_all: true,
        role: None,
        action: None,
        score: None,
    })
}
