//! The notification builder.
//!
//! Clones with `notify=true` wrap every state-changing phase in a
//! pre/post notification protocol: a pre pseudo-action fans out `notify`
//! actions to every active instance, a confirmation barrier gates the
//! real work, and a post round follows it. Each notify action carries
//! meta-attribute lists describing the whole clone's transition, sorted
//! and deduplicated so the payload is deterministic.

use std::collections::BTreeMap;

use crate::actions::fence_key;
use crate::model::{op_key, ActionIndex, OrderFlags, ResourceIndex, Task, WorkingSet};

/// The clone phases that trigger notifications.
const NOTIFY_PHASES: [(Task, Task, &str); 4] = [
    (Task::Start, Task::Running, "start"),
    (Task::Stop, Task::Stopped, "stop"),
    (Task::Promote, Task::Promoted, "promote"),
    (Task::Demote, Task::Demoted, "demote"),
];

/// Builds notification actions for every clone that wants them.
pub fn build_notifications(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        if ws.resources[ix].variant.is_collective() && ws.resources[ix].flags.notify {
            notify_clone(ws, ix);
        }
    }
}

fn notify_clone(ws: &mut WorkingSet, ix: ResourceIndex) {
    let id = ws.rsc(ix).id.clone();
    let payload = notification_payload(ws, ix);

    for (task, done_task, op_name) in NOTIFY_PHASES {
        // Only phases the transition actually contains get notifications.
        let Some(bracket_pre) = ws.find_action(&op_key(&id, task, 0), None) else {
            continue;
        };
        let Some(bracket_post) = ws.find_action(&op_key(&id, done_task, 0), None) else {
            continue;
        };

        let pre = notify_pseudo(ws, ix, &id, "pre", op_name, Task::Notify);
        let pre_done = notify_pseudo(ws, ix, &id, "confirmed-pre", op_name, Task::Notified);
        let post = notify_pseudo(ws, ix, &id, "post", op_name, Task::Notify);
        let post_done = notify_pseudo(ws, ix, &id, "confirmed-post", op_name, Task::Notified);

        ws.order(pre, pre_done, OrderFlags::default());
        ws.order(pre_done, bracket_pre, OrderFlags::default());
        ws.order(bracket_post, post, OrderFlags::default());
        ws.order(post, post_done, OrderFlags::default());
        // Every node sees "pre" confirmed before any "post" arrives.
        ws.order(pre_done, post, OrderFlags::default());

        create_instance_notifies(ws, ix, op_name, "pre", pre, pre_done, &payload);
        create_instance_notifies(ws, ix, op_name, "post", post, post_done, &payload);

        // Recurring monitors wait for the post round to finish.
        let leaves = ws.leaves(ix);
        for leaf in leaves {
            for monitor in ws.rsc_actions(leaf, Task::Monitor) {
                if !ws.action(monitor).is_probe() {
                    ws.order(post_done, monitor, OrderFlags::optional());
                }
            }
        }

        // Stops the fence performs still notify, once the fence is done.
        if task == Task::Stop {
            let fenced: Vec<ActionIndex> = ws
                .leaves(ix)
                .into_iter()
                .flat_map(|leaf| ws.rsc_actions(leaf, Task::Stop))
                .filter(|&stop| ws.action(stop).flags.implied_by_fencing)
                .filter_map(|stop| ws.action(stop).node.clone())
                .filter_map(|node| ws.find_action(&fence_key(&node), Some(&node)))
                .collect();
            for fence in fenced {
                ws.order(fence, post, OrderFlags::default());
            }
        }
    }
}

fn notify_pseudo(
    ws: &mut WorkingSet,
    ix: ResourceIndex,
    id: &atrio_core::ResourceId,
    phase: &str,
    op_name: &str,
    task: Task,
) -> ActionIndex {
    let key = format!("{id}_{phase}_notify_{op_name}_0");
    let action = ws.new_action(Some(ix), task, 0, None, key);
    let slot = ws.action_mut(action);
    slot.flags.pseudo = true;
    slot.meta
        .insert("notify_key_type".to_string(), phase.trim_start_matches("confirmed-").to_string());
    slot.meta
        .insert("notify_key_operation".to_string(), op_name.to_string());
    action
}

/// One real `notify` action per active instance, between the phase's
/// pseudo-action and its confirmation barrier.
fn create_instance_notifies(
    ws: &mut WorkingSet,
    ix: ResourceIndex,
    op_name: &str,
    phase: &str,
    fan_out: ActionIndex,
    barrier: ActionIndex,
    payload: &BTreeMap<String, String>,
) {
    let instances = ws.leaves(ix);
    for inst in instances {
        let node = ws
            .rsc(inst)
            .allocated
            .clone()
            .or_else(|| ws.rsc(inst).running_on.iter().next().cloned());
        let Some(node) = node else {
            continue;
        };
        if !ws
            .nodes
            .get(&node)
            .is_some_and(crate::model::Node::can_run_actions)
        {
            continue;
        }
        let inst_id = ws.rsc(inst).id.clone();
        let key = format!("{inst_id}_{phase}_notify_{op_name}_0");
        let notify = ws.new_action(Some(inst), Task::Notify, 0, Some(node), key);
        {
            let action = ws.action_mut(notify);
            action
                .meta
                .insert("notify_type".to_string(), phase.to_string());
            action
                .meta
                .insert("notify_operation".to_string(), op_name.to_string());
            for (name, value) in payload {
                action.meta.insert(name.clone(), value.clone());
            }
        }
        ws.order(fan_out, notify, OrderFlags::default());
        ws.order(notify, barrier, OrderFlags::default());
    }
}

/// Builds the deterministic notification environment for one clone.
///
/// Every list is sorted by resource ID then node name and deduplicated
/// before being flattened into `notify_<list>_resource` and
/// `notify_<list>_uname` strings.
fn notification_payload(ws: &WorkingSet, ix: ResourceIndex) -> BTreeMap<String, String> {
    let instances = ws.leaves(ix);

    let mut start = Vec::new();
    let mut stop = Vec::new();
    let mut promote = Vec::new();
    let mut demote = Vec::new();
    let mut active = Vec::new();
    let mut inactive = Vec::new();
    let mut promoted = Vec::new();
    let mut unpromoted = Vec::new();
    let mut all = Vec::new();

    for &inst in &instances {
        let resource = ws.rsc(inst);
        let id = resource.id.to_string();
        all.push((id.clone(), String::new()));

        for (bucket, task) in [
            (&mut start, Task::Start),
            (&mut stop, Task::Stop),
            (&mut promote, Task::Promote),
            (&mut demote, Task::Demote),
        ] {
            for action in ws.rsc_actions(inst, task) {
                if let Some(node) = &ws.action(action).node {
                    bucket.push((id.clone(), node.to_string()));
                }
            }
        }

        if resource.running_on.is_empty() {
            inactive.push((id.clone(), String::new()));
        }
        for node in &resource.running_on {
            active.push((id.clone(), node.to_string()));
            if resource.promoted_on.contains(node) {
                promoted.push((id.clone(), node.to_string()));
            } else {
                unpromoted.push((id.clone(), node.to_string()));
            }
        }
    }

    let available: Vec<(String, String)> = ws
        .nodes
        .values()
        .filter(|node| node.can_host())
        .map(|node| (String::new(), node.name.to_string()))
        .collect();
    let everyone: Vec<(String, String)> = ws
        .nodes
        .values()
        .map(|node| (String::new(), node.name.to_string()))
        .collect();

    let mut payload = BTreeMap::new();
    let mut put = |name: &str, mut entries: Vec<(String, String)>| {
        entries.sort();
        entries.dedup();
        let resources: Vec<&str> = entries
            .iter()
            .map(|(rsc, _)| rsc.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        let unames: Vec<&str> = entries
            .iter()
            .map(|(_, node)| node.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        payload.insert(
            format!("notify_{name}_resource"),
            resources.join(" "),
        );
        payload.insert(format!("notify_{name}_uname"), unames.join(" "));
    };

    put("start", start);
    put("stop", stop);
    put("promote", promote);
    put("demote", demote);
    put("active", active);
    put("inactive", inactive);
    put("promoted", promoted);
    put("unpromoted", unpromoted);
    put("available", available);
    let mut all_with_nodes = all;
    all_with_nodes.extend(everyone);
    put("all", all_with_nodes);

    payload
}
