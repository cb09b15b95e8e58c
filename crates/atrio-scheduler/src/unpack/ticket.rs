//! Ticket constraint unpacking.
//!
//! A ticket constraint binds resources to a cluster-wide token. When the
//! ticket is revoked, the loss policy decides what happens to them.

use atrio_core::TicketId;

use crate::model::{LossPolicy, ResourceIndex, Role, TicketConstraint, WorkingSet};

use super::{sets, RawConstraint};

pub(super) fn unpack(ws: &mut WorkingSet, c: &RawConstraint) {
    let Some(ticket_id) = c.attr("ticket") else {
        ws.log.config_error(format!(
            "ignoring ticket constraint '{}' without a ticket",
            c.id
        ));
        return;
    };
    let ticket = TicketId::new(ticket_id);
    if !ws.tickets.contains_key(&ticket) {
        ws.log.info(format!(
            "ticket '{ticket}' referenced by constraint '{}' has no recorded state; \
             treating it as revoked",
            c.id
        ));
        ws.ticket_or_default(&ticket);
    }

    if !c.sets.is_empty() {
        for set in &c.sets {
            let role = match set.role.as_deref().map(str::parse::<Role>) {
                None => None,
                Some(Ok(role)) => Some(role),
                Some(Err(err)) => {
                    ws.log
                        .config_error(format!("ignoring ticket constraint '{}': {err}", c.id));
                    return;
                }
            };
            let Some(members) = sets::expand_set(ws, &c.id, set) else {
                return;
            };
            for member in members {
                push(ws, c, member, &ticket, role);
            }
        }
        return;
    }

    let Some(reference) = c.attr("rsc") else {
        ws.log.config_error(format!(
            "ignoring ticket constraint '{}' without rsc",
            c.id
        ));
        return;
    };
    let Some(ids) = sets::expand_reference(ws, reference) else {
        ws.log.config_error(format!(
            "ignoring ticket constraint '{}' because resource '{reference}' does not exist",
            c.id
        ));
        return;
    };
    let role = match c.attr("rsc-role").map(str::parse::<Role>) {
        None => None,
        Some(Ok(role)) => Some(role),
        Some(Err(err)) => {
            ws.log
                .config_error(format!("ignoring ticket constraint '{}': {err}", c.id));
            return;
        }
    };
    for id in ids {
        if let Some(ix) = ws.resource_index(&id) {
            push(ws, c, ix, &ticket, role);
        }
    }
}

fn push(
    ws: &mut WorkingSet,
    c: &RawConstraint,
    rsc: ResourceIndex,
    ticket: &TicketId,
    role: Option<Role>,
) {
    let loss_policy = match c.attr("loss-policy") {
        Some("stop") => LossPolicy::Stop,
        Some("demote") => LossPolicy::Demote,
        Some("freeze") => LossPolicy::Freeze,
        Some("fence") => LossPolicy::Fence,
        // Promoted-role dependents default to demotion, everything else
        // to a stop.
        None => {
            if role == Some(Role::Promoted) {
                LossPolicy::Demote
            } else {
                LossPolicy::Stop
            }
        }
        Some(other) => {
            ws.log.config_error(format!(
                "ignoring ticket constraint '{}' with invalid loss-policy '{other}'",
                c.id
            ));
            return;
        }
    };
    ws.ticket_constraints.push(TicketConstraint {
        id: c.id.clone(),
        rsc,
        ticket: ticket.clone(),
        role,
        loss_policy,
    });
}
