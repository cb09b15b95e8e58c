//! Property tests for the scheduler's universal invariants.
//!
//! Random small clusters are generated as XML, scheduled, and the
//! resulting graphs checked for determinism, acyclicity, and action-key
//! uniqueness.

use std::collections::BTreeSet;

use proptest::prelude::*;

use atrio_scheduler::{schedule, ScheduleInput, ScheduleOutput};
use chrono::{DateTime, Utc};

fn now() -> DateTime<Utc> {
    "2026-08-01T12:00:00Z".parse().unwrap()
}

#[derive(Debug, Clone)]
struct ClusterSpec {
    nodes: u32,
    resources: Vec<ResourceSpec>,
    orderings: Vec<(usize, usize)>,
    colocations: Vec<(usize, usize, i64)>,
}

#[derive(Debug, Clone)]
struct ResourceSpec {
    stickiness: i64,
    running_node: Option<u32>,
    banned_node: Option<u32>,
}

fn arb_resource(nodes: u32) -> impl Strategy<Value = ResourceSpec> {
    (
        -50i64..50,
        prop::option::of(1..=nodes),
        prop::option::of(1..=nodes),
    )
        .prop_map(|(stickiness, running_node, banned_node)| ResourceSpec {
            stickiness,
            running_node,
            banned_node,
        })
}

fn arb_cluster() -> impl Strategy<Value = ClusterSpec> {
    (2u32..=4).prop_flat_map(|nodes| {
        prop::collection::vec(arb_resource(nodes), 1..=4).prop_flat_map(move |resources| {
            let count = resources.len();
            (
                Just(resources),
                prop::collection::vec((0..count, 0..count), 0..=2),
                prop::collection::vec((0..count, 0..count, -100i64..100), 0..=2),
            )
                .prop_map(move |(resources, orderings, colocations)| ClusterSpec {
                    nodes,
                    resources,
                    orderings,
                    colocations,
                })
        })
    })
}

fn render(spec: &ClusterSpec) -> (String, String) {
    let nodes_xml: String = (1..=spec.nodes)
        .map(|i| format!(r#"<node id="{i}" uname="n{i}"/>"#))
        .collect();

    let resources_xml: String = spec
        .resources
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                r#"<primitive id="r{i}" class="ocf" type="Dummy">
                     <meta_attributes>
                       <nvpair name="resource-stickiness" value="{}"/>
                     </meta_attributes>
                   </primitive>"#,
                r.stickiness
            )
        })
        .collect();

    let mut constraints = String::new();
    for (i, r) in spec.resources.iter().enumerate() {
        if let Some(node) = r.banned_node {
            constraints.push_str(&format!(
                r#"<rsc_location id="ban-r{i}" rsc="r{i}" node="n{node}" score="-INFINITY"/>"#
            ));
        }
    }
    for (pos, (first, then)) in spec.orderings.iter().enumerate() {
        if first != then {
            constraints.push_str(&format!(
                r#"<rsc_order id="o{pos}" first="r{first}" then="r{then}" kind="Mandatory" symmetrical="false"/>"#
            ));
        }
    }
    for (pos, (dependent, primary, score)) in spec.colocations.iter().enumerate() {
        if dependent != primary {
            constraints.push_str(&format!(
                r#"<rsc_colocation id="c{pos}" rsc="r{dependent}" with-rsc="r{primary}" score="{score}"/>"#
            ));
        }
    }

    let configuration = format!(
        "<configuration><nodes>{nodes_xml}</nodes>\
         <resources>{resources_xml}</resources>\
         <constraints>{constraints}</constraints></configuration>"
    );

    let status_nodes: String = (1..=spec.nodes)
        .map(|n| {
            let histories: String = spec
                .resources
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let op = if r.running_node == Some(n) {
                        r#"<operation task="start" rc="0"/>"#
                    } else {
                        r#"<operation task="monitor" rc="7" interval-ms="0"/>"#
                    };
                    format!(r#"<resource_history id="r{i}">{op}</resource_history>"#)
                })
                .collect();
            format!(r#"<node_state uname="n{n}" online="true">{histories}</node_state>"#)
        })
        .collect();
    let status = format!(r#"<status have-quorum="true">{status_nodes}</status>"#);

    (configuration, status)
}

fn run(spec: &ClusterSpec) -> Option<ScheduleOutput> {
    let (configuration, status) = render(spec);
    schedule(&ScheduleInput {
        configuration_xml: &configuration,
        status_xml: &status,
        now: now(),
    })
    .ok()
}

proptest! {
    /// Two passes over identical inputs produce byte-identical graphs.
    #[test]
    fn identical_inputs_identical_graphs(spec in arb_cluster()) {
        let first = run(&spec);
        let second = run(&spec);
        match (first, second) {
            (Some(a), Some(b)) => prop_assert_eq!(a.graph_xml, b.graph_xml),
            (None, None) => {}
            _ => prop_assert!(false, "one pass failed, the other succeeded"),
        }
    }

    /// Emitted IDs are topological: every input precedes its dependent.
    #[test]
    fn graphs_are_acyclic(spec in arb_cluster()) {
        if let Some(output) = run(&spec) {
            for action in &output.transition.actions {
                for &input in &action.inputs {
                    prop_assert!(
                        input < action.id,
                        "input {} does not precede action {} ({})",
                        input,
                        action.id,
                        action.key
                    );
                }
            }
        }
    }

    /// No two emitted actions share an identity.
    #[test]
    fn action_keys_are_unique(spec in arb_cluster()) {
        if let Some(output) = run(&spec) {
            let mut seen = BTreeSet::new();
            for action in &output.transition.actions {
                let identity = (
                    action.key.clone(),
                    action.node.as_ref().map(ToString::to_string),
                );
                prop_assert!(
                    seen.insert(identity),
                    "duplicate action identity: {} on {:?}",
                    action.key,
                    action.node
                );
            }
        }
    }

    /// The recheck hint, when present, is strictly in the future.
    #[test]
    fn recheck_is_strictly_future(spec in arb_cluster()) {
        if let Some(output) = run(&spec) {
            if let Some(recheck) = output.next_recheck {
                prop_assert!(recheck > now());
            }
        }
    }

    /// Anti-colocated pairs never share a node.
    #[test]
    fn bans_are_respected(spec in arb_cluster()) {
        if let Some(output) = run(&spec) {
            for (i, resource) in spec.resources.iter().enumerate() {
                if let Some(banned) = resource.banned_node {
                    let key = format!("r{i}_start_0");
                    if let Some(start) = output.transition.find(&key) {
                        prop_assert_ne!(
                            start.node.as_ref().map(ToString::to_string),
                            Some(format!("n{banned}"))
                        );
                    }
                }
            }
        }
    }
}
