//! Ordering constraint unpacking.
//!
//! Orderings are resolved to resource/task endpoint pairs here; turning
//! endpoints into concrete action edges happens later, once the action
//! factory has run. Legacy syntax (`score`, `require-all`) is honored
//! behind one-shot deprecation warnings, and the modern attribute always
//! wins when both are present.

use atrio_core::{DeprecationGate, Score};

use crate::model::{
    OrderEndpoint, OrderFlags, OrderKind, OrderingConstraint, ResourceIndex, RestartType, Task,
    WorkingSet,
};
use crate::options::parse_bool;

use super::{resolve_instance, sets, RawConstraint};

/// Edge direction for flag computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// The declared first-then direction.
    Declared,
    /// The synthesized inverse of a symmetric constraint.
    Inverse,
}

/// Minimal edge flags appropriate to an ordering kind.
pub(crate) fn ordering_flags(
    kind: OrderKind,
    first_task: Task,
    direction: Direction,
    symmetric: bool,
) -> OrderFlags {
    let mut flags = OrderFlags::default();
    match kind {
        OrderKind::Optional => flags.optional = true,
        OrderKind::Serialize => {
            flags.optional = true;
            flags.serialize_only = true;
        }
        OrderKind::Mandatory => {
            if !symmetric {
                flags.asymmetrical = true;
                flags.implies_then = true;
            } else {
                match direction {
                    Direction::Declared => {
                        flags.implies_then = true;
                        if matches!(first_task, Task::Start | Task::Promote) {
                            flags.runnable_left = true;
                        }
                    }
                    Direction::Inverse => flags.implies_first = true,
                }
            }
        }
    }
    flags
}

/// The legacy restart-type upgrade: optional orderings whose `then`
/// resource asks for it behave as if mandatory in the relevant direction.
pub(crate) fn apply_restart_type(
    flags: &mut OrderFlags,
    kind: OrderKind,
    then_restart: RestartType,
    direction: Direction,
) {
    if kind == OrderKind::Optional && then_restart == RestartType::Restart {
        match direction {
            Direction::Declared => flags.implies_then = true,
            Direction::Inverse => flags.implies_first = true,
        }
    }
}

pub(super) fn unpack(ws: &mut WorkingSet, c: &RawConstraint) {
    let kind = parse_kind(ws, c);
    let symmetrical = parse_symmetry(ws, c, kind);

    if !c.sets.is_empty() {
        unpack_sets(ws, c, kind, symmetrical);
        return;
    }

    let (Some(first_ref), Some(then_ref)) = (c.attr("first"), c.attr("then")) else {
        ws.log.config_error(format!(
            "ignoring ordering '{}' without both first and then",
            c.id
        ));
        return;
    };

    // A tag on either side lowers the constraint into set form.
    if sets::is_collection_reference(ws, first_ref) || sets::is_collection_reference(ws, then_ref)
    {
        let Some(first_set) = sets::reference_as_set(ws, &c.id, first_ref, false) else {
            return;
        };
        let Some(then_set) = sets::reference_as_set(ws, &c.id, then_ref, false) else {
            return;
        };
        let mut lowered = c.clone();
        lowered.sets = vec![first_set, then_set];
        unpack_sets(ws, &lowered, kind, symmetrical);
        return;
    }

    let Some(first) = resolve_instance(ws, &c.id, first_ref, c.attr("first-instance")) else {
        return;
    };
    let Some(then) = resolve_instance(ws, &c.id, then_ref, c.attr("then-instance")) else {
        return;
    };

    let Some(first_task) = parse_action(ws, c, c.attr("first-action"), Task::Start) else {
        return;
    };
    let Some(then_task) = parse_action(ws, c, c.attr("then-action"), first_task) else {
        return;
    };

    let clone_min = minimum_first_instances(ws, c, first);

    let mut flags = ordering_flags(kind, first_task, Direction::Declared, symmetrical);
    apply_restart_type(&mut flags, kind, ws.rsc(then).restart_type, Direction::Declared);

    ws.orderings.push(OrderingConstraint {
        id: c.id.clone(),
        first: OrderEndpoint::Resource {
            rsc: first,
            task: first_task,
        },
        then: OrderEndpoint::Resource {
            rsc: then,
            task: then_task,
        },
        kind,
        symmetrical,
        clone_min,
        flags,
    });
}

fn parse_kind(ws: &mut WorkingSet, c: &RawConstraint) -> OrderKind {
    match c.attr("kind") {
        Some("Mandatory") => OrderKind::Mandatory,
        Some("Optional") => OrderKind::Optional,
        Some("Serialize") => OrderKind::Serialize,
        Some(other) => {
            ws.log.config_error(format!(
                "resetting kind for ordering '{}' to Mandatory because '{other}' is not valid",
                c.id
            ));
            OrderKind::Mandatory
        }
        None => {
            if let Some(score_text) = c.attr("score") {
                ws.log.warn_once(
                    DeprecationGate::OrderScore,
                    "support for 'score' in orderings is deprecated (use 'kind' instead)",
                );
                match score_text.parse::<Score>() {
                    Ok(score) if score == Score::ZERO => OrderKind::Optional,
                    _ => OrderKind::Mandatory,
                }
            } else {
                OrderKind::Mandatory
            }
        }
    }
}

fn parse_symmetry(ws: &mut WorkingSet, c: &RawConstraint, kind: OrderKind) -> bool {
    match c.attr("symmetrical").and_then(parse_bool) {
        Some(true) => {
            if kind == OrderKind::Serialize {
                ws.log.warn(format!(
                    "ignoring symmetrical for ordering '{}' because it is not valid with \
                     kind Serialize",
                    c.id
                ));
                false
            } else {
                true
            }
        }
        Some(false) => false,
        None => kind != OrderKind::Serialize,
    }
}

fn parse_action(
    ws: &mut WorkingSet,
    c: &RawConstraint,
    text: Option<&str>,
    default: Task,
) -> Option<Task> {
    match text {
        None => Some(default),
        Some(name) => match Task::from_constraint_action(name) {
            Some(task) => Some(task),
            None => {
                ws.log.config_error(format!(
                    "ignoring ordering '{}' with invalid action '{name}'",
                    c.id
                ));
                None
            }
        },
    }
}

/// Minimum runnable `first` instances before `then` may proceed.
///
/// `clone-min` on the clone wins; `require-all=false` on the constraint
/// is its deprecated spelling of 1.
fn minimum_first_instances(ws: &mut WorkingSet, c: &RawConstraint, first: ResourceIndex) -> u32 {
    let Some(config) = ws.rsc(first).variant.clone_config() else {
        return 0;
    };
    if config.min > 0 {
        return config.min;
    }
    if let Some(value) = c.attr("require-all") {
        ws.log.warn_once(
            DeprecationGate::RequireAll,
            "support for require-all in orderings is deprecated \
             (use the clone-min meta-attribute instead)",
        );
        if parse_bool(value) == Some(false) {
            return 1;
        }
    }
    0
}

fn unpack_sets(ws: &mut WorkingSet, c: &RawConstraint, kind: OrderKind, symmetrical: bool) {
    struct ExpandedSet {
        members: Vec<ResourceIndex>,
        task: Task,
        sequential: bool,
        require_all: bool,
        gate_key: String,
    }

    let mut expanded = Vec::new();
    for (position, set) in c.sets.iter().enumerate() {
        let Some(members) = sets::expand_set(ws, &c.id, set) else {
            return;
        };
        let task = match set.action.as_deref() {
            None => Task::Start,
            Some(name) => match Task::from_constraint_action(name) {
                Some(task) => task,
                None => {
                    ws.log.config_error(format!(
                        "ignoring ordering '{}' with invalid set action '{name}'",
                        c.id
                    ));
                    return;
                }
            },
        };
        expanded.push(ExpandedSet {
            members,
            task,
            sequential: set.sequential,
            require_all: set.require_all,
            gate_key: format!("one-or-more:{}:{position}", c.id),
        });
    }

    let mut push = |ws: &mut WorkingSet,
                    first: OrderEndpoint,
                    then: OrderEndpoint,
                    first_task: Task,
                    extra: OrderFlags| {
        let mut flags = ordering_flags(kind, first_task, Direction::Declared, symmetrical);
        flags.one_or_more |= extra.one_or_more;
        flags.runnable_left |= extra.runnable_left;
        ws.orderings.push(OrderingConstraint {
            id: c.id.clone(),
            first,
            then,
            kind,
            symmetrical,
            clone_min: 0,
            flags,
        });
    };

    // Chain consecutive members inside each sequential set.
    for set in &expanded {
        if set.sequential {
            for pair in set.members.windows(2) {
                push(
                    ws,
                    OrderEndpoint::Resource {
                        rsc: pair[0],
                        task: set.task,
                    },
                    OrderEndpoint::Resource {
                        rsc: pair[1],
                        task: set.task,
                    },
                    set.task,
                    OrderFlags::default(),
                );
            }
        }
    }

    // Between adjacent sets: cross product, or a one-or-more gate when the
    // earlier set does not require all members.
    for window in expanded.windows(2) {
        let (earlier, later) = (&window[0], &window[1]);
        if earlier.require_all {
            for &first in &earlier.members {
                for &then in &later.members {
                    push(
                        ws,
                        OrderEndpoint::Resource {
                            rsc: first,
                            task: earlier.task,
                        },
                        OrderEndpoint::Resource {
                            rsc: then,
                            task: later.task,
                        },
                        earlier.task,
                        OrderFlags::default(),
                    );
                }
            }
        } else {
            let gate = OrderEndpoint::Gate {
                key: earlier.gate_key.clone(),
                requires: 1,
            };
            for &first in &earlier.members {
                push(
                    ws,
                    OrderEndpoint::Resource {
                        rsc: first,
                        task: earlier.task,
                    },
                    gate.clone(),
                    earlier.task,
                    OrderFlags {
                        one_or_more: true,
                        ..OrderFlags::default()
                    },
                );
            }
            for &then in &later.members {
                push(
                    ws,
                    gate.clone(),
                    OrderEndpoint::Resource {
                        rsc: then,
                        task: later.task,
                    },
                    earlier.task,
                    OrderFlags {
                        runnable_left: true,
                        ..OrderFlags::default()
                    },
                );
            }
        }
    }
}
