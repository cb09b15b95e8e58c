//! End-to-end scenarios: full passes from literal input documents to
//! transition graphs.

use atrio_scheduler::{schedule, ScheduleInput, ScheduleOutput};
use chrono::{DateTime, Utc};

fn now() -> DateTime<Utc> {
    "2026-08-01T12:00:00Z".parse().unwrap()
}

fn config(body: &str) -> String {
    format!(
        r#"<configuration>
  <nodes>
    <node id="1" uname="n1"/>
    <node id="2" uname="n2"/>
  </nodes>
  {body}
</configuration>"#
    )
}

fn run(configuration: &str, status: &str) -> ScheduleOutput {
    schedule(&ScheduleInput {
        configuration_xml: configuration,
        status_xml: status,
        now: now(),
    })
    .expect("pass should succeed")
}

const BOTH_ONLINE: &str = r#"
<status have-quorum="true">
  <node_state uname="n1" online="true"/>
  <node_state uname="n2" online="true"/>
</status>"#;

/// A status where the resource state is already probed everywhere, so no
/// probe noise appears in the graphs under test.
fn known_everywhere(resources: &[&str]) -> String {
    let histories: String = resources
        .iter()
        .map(|id| {
            format!(
                r#"<resource_history id="{id}">
                     <operation task="monitor" rc="7" interval-ms="0"/>
                   </resource_history>"#
            )
        })
        .collect();
    format!(
        r#"<status have-quorum="true">
  <node_state uname="n1" online="true">{histories}</node_state>
  <node_state uname="n2" online="true">{histories}</node_state>
</status>"#
    )
}

#[test]
fn single_start_lands_on_first_node() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" provider="heartbeat" type="Dummy"/>
           </resources>"#,
    );
    let output = run(&configuration, &known_everywhere(&["A"]));

    let start = output.transition.find("A_start_0").expect("start action");
    assert_eq!(start.node.as_ref().map(ToString::to_string), Some("n1".into()));
    // Nothing else: no stops, no monitors configured.
    assert_eq!(output.transition.actions.len(), 1);
}

#[test]
fn anti_colocated_resources_start_on_different_nodes_unordered() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
             <primitive id="B" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_colocation id="apart" rsc="B" with-rsc="A" score="-INFINITY"/>
           </constraints>"#,
    );
    let output = run(&configuration, &known_everywhere(&["A", "B"]));

    let start_a = output.transition.find("A_start_0").expect("A starts");
    let start_b = output.transition.find("B_start_0").expect("B starts");
    assert_eq!(start_a.node.as_ref().map(ToString::to_string), Some("n1".into()));
    assert_eq!(start_b.node.as_ref().map(ToString::to_string), Some("n2".into()));
    assert!(!output.transition.orders_before(start_a.id, start_b.id));
    assert!(!output.transition.orders_before(start_b.id, start_a.id));
}

#[test]
fn anti_colocation_orders_departing_resource_before_arriving_one() {
    // A is leaving; B, banned from sharing a node with A, is arriving.
    // The ban implies B may not start until A has stopped, even though the
    // colocation names B as the dependent side.
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy">
               <meta_attributes><nvpair name="target-role" value="Stopped"/></meta_attributes>
             </primitive>
             <primitive id="B" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_colocation id="apart" rsc="B" with-rsc="A" score="-INFINITY"/>
           </constraints>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
        <resource_history id="B"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
        <resource_history id="B"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    let stop_a = output.transition.find("A_stop_0").expect("A stops");
    let start_b = output.transition.find("B_start_0").expect("B starts");
    assert!(output.transition.orders_before(stop_a.id, start_b.id));
}

#[test]
fn mandatory_symmetric_ordering_runs_both_ways() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
             <primitive id="B" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_order id="a-then-b" first="A" then="B" kind="Mandatory" symmetrical="true"/>
           </constraints>"#,
    );

    // Starting: A before B.
    let output = run(&configuration, &known_everywhere(&["A", "B"]));
    let start_a = output.transition.find("A_start_0").unwrap();
    let start_b = output.transition.find("B_start_0").unwrap();
    assert!(output.transition.orders_before(start_a.id, start_b.id));

    // Stopping (both running, both told to stop): B before A.
    let stopping_config = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy">
               <meta_attributes><nvpair name="target-role" value="Stopped"/></meta_attributes>
             </primitive>
             <primitive id="B" class="ocf" type="Dummy">
               <meta_attributes><nvpair name="target-role" value="Stopped"/></meta_attributes>
             </primitive>
           </resources>
           <constraints>
             <rsc_order id="a-then-b" first="A" then="B" kind="Mandatory" symmetrical="true"/>
           </constraints>"#,
    );
    let both_running = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
        <resource_history id="B"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
        <resource_history id="B"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&stopping_config, both_running);
    let stop_a = output.transition.find("A_stop_0").expect("A stops");
    let stop_b = output.transition.find("B_stop_0").expect("B stops");
    assert!(output.transition.orders_before(stop_b.id, stop_a.id));
}

#[test]
fn promotable_clone_promotes_best_instance_only() {
    let configuration = config(
        r#"<resources>
             <clone id="C">
               <meta_attributes>
                 <nvpair name="promotable" value="true"/>
                 <nvpair name="clone-max" value="3"/>
                 <nvpair name="promoted-max" value="1"/>
               </meta_attributes>
               <primitive id="S" class="ocf" type="Stateful"/>
             </clone>
           </resources>"#,
    )
    .replace(
        r#"<node id="2" uname="n2"/>"#,
        r#"<node id="2" uname="n2"/>
    <node id="3" uname="n3"/>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <transient_attributes><nvpair name="promotion-S" value="100"/></transient_attributes>
        <resource_history id="S"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <transient_attributes><nvpair name="promotion-S" value="50"/></transient_attributes>
        <resource_history id="S"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
      <node_state uname="n3" online="true">
        <transient_attributes><nvpair name="promotion-S" value="50"/></transient_attributes>
        <resource_history id="S"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    // Exactly one instance is promoted, on the best-scored node.
    let promotes = output.transition.find_all("S:0_promote_0");
    assert_eq!(promotes.len(), 1);
    assert_eq!(
        promotes[0].node.as_ref().map(ToString::to_string),
        Some("n1".to_string())
    );
    for other in ["S:1_promote_0", "S:2_promote_0"] {
        assert!(output.transition.find(other).is_none(), "{other} promoted");
    }

    // Every instance start precedes the promotion.
    let promote = promotes[0];
    for instance in ["S:0", "S:1", "S:2"] {
        let start = output
            .transition
            .find(&format!("{instance}_start_0"))
            .expect("instance start");
        assert!(
            output.transition.orders_before(start.id, promote.id),
            "{instance} start should precede promotion"
        );
    }
}

#[test]
fn fencing_implies_stop_and_recovery() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
           </resources>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="false" expected="member">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    let fence = output.transition.find("stonith-n1").expect("fence action");
    assert!(fence.pseudo);

    let stop = output.transition.find("A_stop_0").expect("implied stop");
    assert!(stop.pseudo, "stop is implied by fencing");
    assert!(output.transition.orders_before(fence.id, stop.id));

    let start = output.transition.find("A_start_0").expect("recovery start");
    assert_eq!(start.node.as_ref().map(ToString::to_string), Some("n2".into()));
    assert!(output.transition.orders_before(stop.id, start.id));
}

#[test]
fn ticket_loss_with_fence_policy_fences_the_host() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_ticket id="A-needs-T" rsc="A" ticket="T" loss-policy="fence"/>
           </constraints>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
      <tickets>
        <ticket_state id="T" granted="false"/>
      </tickets>
    </status>"#;
    let output = run(&configuration, status);

    assert!(output.transition.find("stonith-n1").is_some());
    let stop = output.transition.find("A_stop_0").expect("A stops");
    assert!(stop.pseudo, "stop happens via fencing");
    // The resource does not come back: the ticket is gone.
    assert!(output.transition.find("A_start_0").is_none());
}

#[test]
fn settled_cluster_produces_only_monitors() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy">
               <operations>
                 <op id="A-mon" name="monitor" interval="10s"/>
               </operations>
             </primitive>
           </resources>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    assert!(output.transition.find("A_start_0").is_none());
    assert!(output.transition.find("A_stop_0").is_none());
    assert!(output.transition.find("A_monitor_10000").is_some());
}

#[test]
fn applying_the_graph_converges_to_an_empty_one() {
    // First pass: A is stopped and gets started on n1.
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
           </resources>"#,
    );
    let output = run(&configuration, &known_everywhere(&["A"]));
    assert!(output.transition.find("A_start_0").is_some());

    // Second pass with a status reflecting the executed graph.
    let settled = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, settled);
    assert!(
        output.transition.actions.is_empty(),
        "nothing left to do, got {:?}",
        output
            .transition
            .actions
            .iter()
            .map(|a| &a.key)
            .collect::<Vec<_>>()
    );
}

#[test]
fn resource_without_a_node_stops_with_warning() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_location id="ban1" rsc="A" node="n1" score="-INFINITY"/>
             <rsc_location id="ban2" rsc="A" node="n2" score="-INFINITY"/>
           </constraints>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    let stops = output.transition.find_all("A_stop_0");
    assert_eq!(stops.len(), 1);
    assert!(output.transition.find("A_start_0").is_none());
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.message.contains("cannot run anywhere")));
}

#[test]
fn ordering_cycle_yields_config_error_and_no_graph() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
             <primitive id="B" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_order id="ab" first="A" then="B" kind="Mandatory" symmetrical="false"/>
             <rsc_order id="ba" first="B" then="A" kind="Mandatory" symmetrical="false"/>
           </constraints>"#,
    );
    let failure = schedule(&ScheduleInput {
        configuration_xml: &configuration,
        status_xml: &known_everywhere(&["A", "B"]),
        now: now(),
    })
    .expect_err("cycle must abort the pass");

    assert!(matches!(
        failure.source,
        atrio_core::Error::CycleDetected { .. }
    ));
    assert!(failure
        .diagnostics
        .iter()
        .any(|d| d.severity == atrio_core::Severity::ConfigError
            && d.message.contains("cycle")));
}

#[test]
fn clone_min_gates_the_dependent() {
    let configuration = config(
        r#"<resources>
             <clone id="C">
               <meta_attributes>
                 <nvpair name="clone-min" value="2"/>
                 <nvpair name="clone-max" value="2"/>
               </meta_attributes>
               <primitive id="S" class="ocf" type="Dummy"/>
             </clone>
             <primitive id="R" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_order id="c-then-r" first="C" then="R" kind="Mandatory"/>
           </constraints>"#,
    );
    let output = run(&configuration, &known_everywhere(&["S", "R"]));

    let gate = output
        .transition
        .find("clone-one-or-more:c-then-r")
        .expect("gate pseudo-action");
    assert!(gate.pseudo);
    let start_r = output.transition.find("R_start_0").expect("R starts");
    assert!(output.transition.orders_before(gate.id, start_r.id));
    for instance in ["S:0", "S:1"] {
        let start = output
            .transition
            .find(&format!("{instance}_start_0"))
            .expect("instance start");
        assert!(output.transition.orders_before(start.id, gate.id));
    }
}

#[test]
fn migration_replaces_stop_start_when_allowed() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy">
               <meta_attributes><nvpair name="allow-migrate" value="true"/></meta_attributes>
             </primitive>
           </resources>
           <constraints>
             <rsc_location id="prefer-n2" rsc="A" node="n2" score="INFINITY"/>
           </constraints>"#,
    );
    let status = r#"
    <status have-quorum="true">
      <node_state uname="n1" online="true">
        <resource_history id="A"><operation task="start" rc="0"/></resource_history>
      </node_state>
      <node_state uname="n2" online="true">
        <resource_history id="A"><operation task="monitor" rc="7" interval-ms="0"/></resource_history>
      </node_state>
    </status>"#;
    let output = run(&configuration, status);

    let to = output.transition.find("A_migrate_to_0").expect("migrate_to");
    let from = output
        .transition
        .find("A_migrate_from_0")
        .expect("migrate_from");
    let stop = output.transition.find("A_stop_0").expect("cleanup stop");
    assert_eq!(to.node.as_ref().map(ToString::to_string), Some("n1".into()));
    assert_eq!(from.node.as_ref().map(ToString::to_string), Some("n2".into()));
    assert!(output.transition.orders_before(to.id, from.id));
    assert!(output.transition.orders_before(from.id, stop.id));
    // The start became a phantom the executor never runs.
    let start = output.transition.find("A_start_0").expect("phantom start");
    assert!(start.pseudo);
}

#[test]
fn group_members_start_in_order_on_one_node() {
    let configuration = config(
        r#"<resources>
             <group id="G">
               <primitive id="ip" class="ocf" type="IPaddr2"/>
               <primitive id="fs" class="ocf" type="Filesystem"/>
               <primitive id="db" class="ocf" type="pgsql"/>
             </group>
           </resources>"#,
    );
    let output = run(&configuration, &known_everywhere(&["ip", "fs", "db"]));

    let starts: Vec<_> = ["ip", "fs", "db"]
        .iter()
        .map(|id| output.transition.find(&format!("{id}_start_0")).unwrap())
        .collect();
    let nodes: std::collections::BTreeSet<_> = starts
        .iter()
        .map(|a| a.node.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(nodes.len(), 1, "all members on the same node");
    assert!(output.transition.orders_before(starts[0].id, starts[1].id));
    assert!(output.transition.orders_before(starts[1].id, starts[2].id));
}

#[test]
fn notifying_clone_wraps_starts_in_notifications() {
    let configuration = config(
        r#"<resources>
             <clone id="C">
               <meta_attributes>
                 <nvpair name="notify" value="true"/>
                 <nvpair name="clone-max" value="2"/>
               </meta_attributes>
               <primitive id="S" class="ocf" type="Dummy"/>
             </clone>
           </resources>"#,
    );
    let output = run(&configuration, &known_everywhere(&["S"]));

    let pre_done = output
        .transition
        .find("C_confirmed-pre_notify_start_0")
        .expect("pre confirmation barrier");
    let post = output
        .transition
        .find("C_post_notify_start_0")
        .expect("post pseudo");
    for instance in ["S:0", "S:1"] {
        let start = output
            .transition
            .find(&format!("{instance}_start_0"))
            .expect("instance start");
        assert!(output.transition.orders_before(pre_done.id, start.id));
        assert!(output.transition.orders_before(start.id, post.id));
        let notify = output
            .transition
            .find(&format!("{instance}_pre_notify_start_0"))
            .expect("instance notify");
        assert!(notify.meta.contains_key("notify_start_resource"));
    }
    assert!(output.transition.orders_before(pre_done.id, post.id));
}

#[test]
fn business_hours_rule_sets_next_recheck() {
    let configuration = config(
        r#"<resources>
             <primitive id="A" class="ocf" type="Dummy"/>
           </resources>
           <constraints>
             <rsc_location id="daytime" rsc="A">
               <rule id="daytime-rule" score="INFINITY">
                 <date_expression id="daytime-hours" operation="date_spec">
                   <date_spec id="daytime-spec" hours="9-17"/>
                 </date_expression>
               </rule>
             </rsc_location>
           </constraints>"#,
    );
    let output = run(&configuration, &known_everywhere(&["A"]));

    // Noon: the rule holds and flips next at the 13:00 boundary.
    let recheck = output.next_recheck.expect("rule implies a recheck");
    assert_eq!(recheck, "2026-08-01T13:00:00Z".parse::<DateTime<Utc>>().unwrap());
    assert!(recheck > now());
}
