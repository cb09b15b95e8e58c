//! Colocation constraint unpacking.
//!
//! A colocation places the dependent resource relative to its primary
//! under a node-attribute equivalence (`#uname` by default, so "the same
//! node"). Score zero means nothing and is dropped; a ban (-INFINITY)
//! additionally synthesizes orderings that keep the pair from acquiring
//! their roles simultaneously during a transition.

use atrio_core::Score;

use crate::model::{
    ColocationConstraint, OrderEndpoint, OrderFlags, OrderKind, OrderingConstraint,
    ResourceIndex, Role, Task, WorkingSet,
};
use crate::options::parse_bool;

use super::{sets, warn_colocation_symmetrical, RawConstraint};

pub(super) fn unpack(ws: &mut WorkingSet, c: &RawConstraint) {
    if c.attr("symmetrical").is_some() {
        warn_colocation_symmetrical(ws, &c.id);
    }

    let score = match c.attr("score").map(str::parse::<Score>) {
        None => Score::ZERO,
        Some(Ok(score)) => score,
        Some(Err(_)) => {
            ws.log.config_error(format!(
                "ignoring colocation '{}' with invalid score",
                c.id
            ));
            return;
        }
    };

    if !c.sets.is_empty() {
        unpack_sets(ws, c, score);
        return;
    }

    let (Some(dependent_ref), Some(primary_ref)) = (c.attr("rsc"), c.attr("with-rsc")) else {
        ws.log.config_error(format!(
            "ignoring colocation '{}' without both rsc and with-rsc",
            c.id
        ));
        return;
    };

    // Tags expand to their members; both sides being tags is ambiguous
    // about which pairs are meant and is rejected.
    let dependent_is_tag = sets::is_collection_reference(ws, dependent_ref);
    let primary_is_tag = sets::is_collection_reference(ws, primary_ref);
    if dependent_is_tag && primary_is_tag {
        ws.log.config_error(format!(
            "ignoring colocation '{}' between two tags",
            c.id
        ));
        return;
    }

    let Some(dependents) = resolve_side(ws, &c.id, dependent_ref) else {
        return;
    };
    let Some(primaries) = resolve_side(ws, &c.id, primary_ref) else {
        return;
    };

    let dependent_role = match parse_role(ws, &c.id, c.attr("rsc-role")) {
        Ok(role) => role,
        Err(()) => return,
    };
    let primary_role = match parse_role(ws, &c.id, c.attr("with-rsc-role")) {
        Ok(role) => role,
        Err(()) => return,
    };

    for &dependent in &dependents {
        for &primary in &primaries {
            add_colocation(
                ws,
                &c.id,
                dependent,
                primary,
                score,
                dependent_role,
                primary_role,
                c.attr("node-attribute"),
                c.attr("influence"),
            );
        }
    }
}

fn unpack_sets(ws: &mut WorkingSet, c: &RawConstraint, default_score: Score) {
    let mut expanded: Vec<(Vec<ResourceIndex>, Score, bool)> = Vec::new();
    for set in &c.sets {
        let Some(members) = sets::expand_set(ws, &c.id, set) else {
            return;
        };
        expanded.push((members, set.score.unwrap_or(default_score), set.sequential));
    }

    // Within a sequential set, consecutive members chain: each depends on
    // the one after it, so the tail of the set is placed first.
    for (members, score, sequential) in &expanded {
        if *sequential {
            for pair in members.windows(2) {
                add_colocation(ws, &c.id, pair[0], pair[1], *score, None, None, None, None);
            }
        }
    }

    // Between adjacent sets: the cross product, earlier depending on later.
    for window in expanded.windows(2) {
        let (earlier, score, _) = &window[0];
        let (later, _, _) = &window[1];
        for &dependent in earlier {
            for &primary in later {
                add_colocation(ws, &c.id, dependent, primary, *score, None, None, None, None);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn add_colocation(
    ws: &mut WorkingSet,
    id: &str,
    dependent: ResourceIndex,
    primary: ResourceIndex,
    score: Score,
    dependent_role: Option<Role>,
    primary_role: Option<Role>,
    node_attribute: Option<&str>,
    influence: Option<&str>,
) {
    if score == Score::ZERO {
        ws.log.trace(format!(
            "ignoring colocation '{id}' between '{}' and '{}' because score is 0",
            ws.rsc(dependent).id,
            ws.rsc(primary).id
        ));
        return;
    }
    if dependent == primary {
        ws.log.config_error(format!(
            "ignoring colocation '{id}' of '{}' with itself",
            ws.rsc(dependent).id
        ));
        return;
    }

    let influence = influence
        .and_then(parse_bool)
        .unwrap_or(ws.rsc(dependent).flags.critical);

    ws.colocations.push(ColocationConstraint {
        id: id.to_string(),
        dependent,
        primary,
        score,
        dependent_role,
        primary_role,
        node_attribute: node_attribute.unwrap_or("#uname").to_string(),
        influence,
    });

    // A ban also forbids acquiring roles at the same moment: each side
    // must be out of its constrained role before the other claims its own.
    if score.is_ban() {
        anti_colocation_order(ws, id, dependent, dependent_role, primary, primary_role);
        anti_colocation_order(ws, id, primary, primary_role, dependent, dependent_role);
    }
}

/// Synthesizes the orderings that keep one side of a banned colocation
/// from gaining its role while the other still holds its own.
///
/// The tasks depend on the constrained roles: losing Promoted means a
/// demote, losing any other role means a stop (and leaving Unpromoted can
/// also happen by promoting); gaining Promoted means a promote, gaining
/// any other role means a start (and reaching Unpromoted can also happen
/// by demoting). Every first-task/then-task pair gets an edge.
fn anti_colocation_order(
    ws: &mut WorkingSet,
    id: &str,
    first: ResourceIndex,
    first_role: Option<Role>,
    then: ResourceIndex,
    then_role: Option<Role>,
) {
    // An explicit Started role constrains nothing here, same as no role.
    let first_role = first_role.filter(|&role| role != Role::Started);
    let then_role = then_role.filter(|&role| role != Role::Started);

    // Actions that make the first resource lose its role.
    let mut first_tasks = vec![];
    if first_role == Some(Role::Promoted) {
        first_tasks.push(Task::Demote);
    } else {
        first_tasks.push(Task::Stop);
        if first_role == Some(Role::Unpromoted) {
            first_tasks.push(Task::Promote);
        }
    }

    // Actions that make the then resource gain its role.
    let mut then_tasks = vec![];
    if then_role == Some(Role::Promoted) {
        then_tasks.push(Task::Promote);
    } else {
        then_tasks.push(Task::Start);
        if then_role == Some(Role::Unpromoted) {
            then_tasks.push(Task::Demote);
        }
    }

    let flags = OrderFlags {
        optional: true,
        anti_colocation: true,
        asymmetrical: true,
        ..OrderFlags::default()
    };
    for &first_task in &first_tasks {
        for &then_task in &then_tasks {
            ws.orderings.push(OrderingConstraint {
                id: format!("{id}-anti"),
                first: OrderEndpoint::Resource {
                    rsc: first,
                    task: first_task,
                },
                then: OrderEndpoint::Resource {
                    rsc: then,
                    task: then_task,
                },
                kind: OrderKind::Optional,
                symmetrical: false,
                clone_min: 0,
                flags,
            });
        }
    }
}

fn resolve_side(
    ws: &mut WorkingSet,
    constraint_id: &str,
    reference: &str,
) -> Option<Vec<ResourceIndex>> {
    let ids = match sets::expand_reference(ws, reference) {
        Some(ids) => ids,
        None => {
            ws.log.config_error(format!(
                "ignoring constraint '{constraint_id}' because resource '{reference}' \
                 does not exist"
            ));
            return None;
        }
    };
    let mut out = Vec::new();
    for id in ids {
        out.push(ws.resource_index(&id)?);
    }
    Some(out)
}

fn parse_role(
    ws: &mut WorkingSet,
    constraint_id: &str,
    text: Option<&str>,
) -> Result<Option<Role>, ()> {
    match text.map(str::parse::<Role>) {
        None => Ok(None),
        Some(Ok(role)) => Ok(Some(role)),
        Some(Err(err)) => {
            ws.log
                .config_error(format!("ignoring colocation '{constraint_id}': {err}"));
            Err(())
        }
    }
}
