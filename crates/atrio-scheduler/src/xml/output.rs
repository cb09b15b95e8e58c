//! Transition graph serialization.
//!
//! Streams the finished transition into XML. Every action carries its
//! assigned integer ID, task, execution node, operation meta-attributes,
//! and the IDs of the actions it waits for.

use atrio_core::{Error, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::emit::{GraphAction, Transition};

/// Serializes a transition graph to XML.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the writer fails, which would indicate
/// a bug rather than bad input.
pub fn write_graph(
    transition: &Transition,
    next_recheck: Option<DateTime<Utc>>,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut root = BytesStart::new("transition_graph");
    root.push_attribute(("transition_id", "0"));
    if let Some(recheck) = next_recheck {
        root.push_attribute(("recheck-epoch", recheck.timestamp().to_string().as_str()));
    }
    write(&mut writer, Event::Start(root))?;

    for action in &transition.actions {
        write_action(&mut writer, action)?;
    }

    write(&mut writer, Event::End(BytesEnd::new("transition_graph")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| Error::Internal {
        message: format!("graph serialization produced invalid UTF-8: {e}"),
    })
}

fn write_action(writer: &mut Writer<Vec<u8>>, action: &GraphAction) -> Result<()> {
    let mut el = BytesStart::new("action");
    el.push_attribute(("id", action.id.to_string().as_str()));
    el.push_attribute(("key", action.key.as_str()));
    el.push_attribute(("operation", action.task.as_str()));
    if let Some(resource) = &action.resource {
        el.push_attribute(("resource", resource.as_str()));
    }
    if let Some(node) = &action.node {
        el.push_attribute(("on_node", node.as_str()));
    }
    el.push_attribute(("interval-ms", action.interval_ms.to_string().as_str()));
    el.push_attribute(("priority", action.priority.to_string().as_str()));
    el.push_attribute(("timeout-ms", action.timeout_ms.to_string().as_str()));
    el.push_attribute(("pseudo", if action.pseudo { "true" } else { "false" }));

    let bare = action.meta.is_empty() && action.inputs.is_empty();
    if bare {
        write(writer, Event::Empty(el))?;
        return Ok(());
    }
    write(writer, Event::Start(el))?;

    if !action.meta.is_empty() {
        write(writer, Event::Start(BytesStart::new("attributes")))?;
        for (name, value) in &action.meta {
            let mut nvpair = BytesStart::new("nvpair");
            nvpair.push_attribute(("name", name.as_str()));
            nvpair.push_attribute(("value", value.as_str()));
            write(writer, Event::Empty(nvpair))?;
        }
        write(writer, Event::End(BytesEnd::new("attributes")))?;
    }

    if !action.inputs.is_empty() {
        write(writer, Event::Start(BytesStart::new("inputs")))?;
        for input in &action.inputs {
            let mut trigger = BytesStart::new("trigger");
            trigger.push_attribute(("action-id", input.to_string().as_str()));
            write(writer, Event::Empty(trigger))?;
        }
        write(writer, Event::End(BytesEnd::new("inputs")))?;
    }

    write(writer, Event::End(BytesEnd::new("action")))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(|e| Error::Internal {
        message: format!("failed to write graph XML: {e}"),
    })
}
