//! Location constraint unpacking.
//!
//! A location constraint scores nodes for one resource, named directly,
//! through a tag or template, or by an ID pattern. With no explicit node,
//! each nested rule is evaluated against every node and contributes the
//! rule's score (literal or read from a node attribute) to the nodes it
//! passes on.

use std::collections::BTreeMap;

use atrio_core::{NodeId, Score};
use regex::Regex;

use crate::model::{LocationConstraint, ProbeMode, ResourceIndex, Role, WorkingSet};
use crate::rules::{EvalContext, Rule, ScoreSpec};

use super::{sets, RawConstraint};

pub(super) fn unpack(ws: &mut WorkingSet, c: &RawConstraint) {
    let role = match c.attr("role").map(str::parse::<Role>) {
        None => None,
        Some(Ok(role)) => Some(role),
        Some(Err(err)) => {
            ws.log
                .config_error(format!("ignoring location '{}': {err}", c.id));
            return;
        }
    };
    let discovery = match c.attr("resource-discovery") {
        None | Some("always") => ProbeMode::Always,
        Some("never") => ProbeMode::Never,
        Some("exclusive") => ProbeMode::Exclusive,
        Some(other) => {
            ws.log.config_error(format!(
                "ignoring location '{}' with invalid resource-discovery '{other}'",
                c.id
            ));
            return;
        }
    };

    if let Some(pattern) = c.attr("rsc-pattern") {
        unpack_pattern(ws, c, pattern, role, discovery);
        return;
    }

    if let Some(reference) = c.attr("rsc") {
        let Some(ids) = sets::expand_reference(ws, reference) else {
            ws.log.config_error(format!(
                "ignoring location '{}' because resource '{reference}' does not exist",
                c.id
            ));
            return;
        };
        for id in ids {
            if let Some(ix) = ws.resource_index(&id) {
                apply_to_resource(ws, c, ix, role, discovery, None);
            }
        }
        return;
    }

    if !c.sets.is_empty() {
        for set in &c.sets {
            let set_role = match set.role.as_deref().map(str::parse::<Role>) {
                None => role,
                Some(Ok(parsed)) => Some(parsed),
                Some(Err(err)) => {
                    ws.log
                        .config_error(format!("ignoring location '{}': {err}", c.id));
                    return;
                }
            };
            let Some(members) = sets::expand_set(ws, &c.id, set) else {
                return;
            };
            for member in members {
                apply_to_resource(ws, c, member, set_role, discovery, None);
            }
        }
        return;
    }

    ws.log.config_error(format!(
        "ignoring location '{}' without rsc, rsc-pattern, or resource sets",
        c.id
    ));
}

/// Applies a pattern-based location to every matching resource.
///
/// Capture groups are kept for `%N` interpolation into score-attribute
/// names, so one constraint can read a differently-named attribute per
/// matched resource.
fn unpack_pattern(
    ws: &mut WorkingSet,
    c: &RawConstraint,
    pattern: &str,
    role: Option<Role>,
    discovery: ProbeMode,
) {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => {
            ws.log.config_error(format!(
                "ignoring location '{}' with invalid rsc-pattern: {err}",
                c.id
            ));
            return;
        }
    };

    let matches: Vec<(ResourceIndex, Vec<String>)> = (0..ws.resources.len())
        .filter(|&ix| ws.resources[ix].parent.is_none())
        .filter_map(|ix| {
            regex.captures(ws.resources[ix].id.as_str()).map(|caps| {
                let groups = (0..caps.len())
                    .map(|i| caps.get(i).map_or(String::new(), |m| m.as_str().to_string()))
                    .collect();
                (ix, groups)
            })
        })
        .collect();

    if matches.is_empty() {
        ws.log.info(format!(
            "location '{}' matched no resources with pattern '{pattern}'",
            c.id
        ));
    }
    for (ix, captures) in matches {
        apply_to_resource(ws, c, ix, role, discovery, Some(&captures));
    }
}

fn apply_to_resource(
    ws: &mut WorkingSet,
    c: &RawConstraint,
    rsc: ResourceIndex,
    role: Option<Role>,
    discovery: ProbeMode,
    captures: Option<&[String]>,
) {
    if let Some(node) = c.attr("node") {
        let Some(score_text) = c.attr("score") else {
            ws.log.config_error(format!(
                "ignoring location '{}' naming a node but no score",
                c.id
            ));
            return;
        };
        let Ok(score) = score_text.parse::<Score>() else {
            ws.log.config_error(format!(
                "ignoring location '{}' with invalid score '{score_text}'",
                c.id
            ));
            return;
        };
        let node = NodeId::new(node);
        if !ws.nodes.contains_key(&node) {
            ws.log.config_error(format!(
                "ignoring location '{}' naming unknown node '{node}'",
                c.id
            ));
            return;
        }
        let mut scores = BTreeMap::new();
        scores.insert(node, score);
        ws.locations.push(LocationConstraint {
            id: c.id.clone(),
            rsc,
            role,
            scores,
            discovery,
        });
        return;
    }

    if c.rules.is_empty() {
        ws.log.config_error(format!(
            "ignoring location '{}' with neither a node nor rules",
            c.id
        ));
        return;
    }

    for rule in &c.rules {
        let rule_role = match rule.role.as_deref().map(str::parse::<Role>) {
            None => role,
            Some(Ok(parsed)) => Some(parsed),
            Some(Err(err)) => {
                ws.log
                    .config_error(format!("in location '{}': {err}", c.id));
                continue;
            }
        };
        let scores = evaluate_rule_per_node(ws, rule, captures);
        ws.locations.push(LocationConstraint {
            id: if rule.id.is_empty() {
                c.id.clone()
            } else {
                format!("{}-{}", c.id, rule.id)
            },
            rsc,
            role: rule_role,
            scores,
            discovery,
        });
    }
}

/// Evaluates one location rule for every node.
///
/// Nodes the rule passes on receive the rule's score; with a
/// score-attribute, the score is read from that node's attributes
/// (after `%N` capture interpolation), and nodes without the attribute
/// receive nothing.
fn evaluate_rule_per_node(
    ws: &mut WorkingSet,
    rule: &Rule,
    captures: Option<&[String]>,
) -> BTreeMap<NodeId, Score> {
    let node_attrs: Vec<(NodeId, BTreeMap<String, String>)> = ws
        .nodes
        .values()
        .map(|node| {
            let mut attrs = node.attributes.clone();
            attrs.insert("#uname".to_string(), node.name.to_string());
            if let Some(kind) = node.attribute("#kind") {
                attrs.insert("#kind".to_string(), kind);
            }
            (node.name.clone(), attrs)
        })
        .collect();

    let mut scores = BTreeMap::new();
    let mut recheck = ws.recheck;
    for (name, attrs) in &node_attrs {
        let ctx = EvalContext::for_node(ws.now, attrs);
        if !rule.evaluate(&ctx, &mut recheck) {
            continue;
        }
        let score = match &rule.score {
            None => Some(Score::ZERO),
            Some(ScoreSpec::Literal(score)) => Some(*score),
            Some(ScoreSpec::Attribute(attr_name)) => {
                let resolved = interpolate_captures(attr_name, captures);
                match attrs.get(&resolved).map(|text| text.parse::<Score>()) {
                    Some(Ok(score)) => Some(score),
                    Some(Err(_)) => {
                        ws.log.config_error(format!(
                            "node '{name}' has unparseable score attribute '{resolved}'"
                        ));
                        None
                    }
                    None => None,
                }
            }
        };
        if let Some(score) = score {
            scores.insert(name.clone(), score);
        }
    }
    ws.recheck = recheck;
    scores
}

/// Substitutes `%0`..`%9` with regex capture groups.
fn interpolate_captures(name: &str, captures: Option<&[String]>) -> String {
    let Some(captures) = captures else {
        return name.to_string();
    };
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '%' {
            if let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                chars.next();
                if let Some(group) = captures.get(digit as usize) {
                    out.push_str(group);
                }
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{add_primitive, working_set};
    use super::super::{unpack_constraints, RawConstraint, RawConstraintKind};
    use super::*;
    use crate::rules::{AttrExpression, AttrOp, Condition, ValueKind};

    fn location(id: &str, attrs: &[(&str, &str)]) -> RawConstraint {
        RawConstraint {
            id: id.to_string(),
            kind: RawConstraintKind::Location,
            attrs: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            rules: Vec::new(),
            lifetime: None,
            sets: Vec::new(),
        }
    }

    #[test]
    fn simple_node_score() {
        let mut ws = working_set(2);
        add_primitive(&mut ws, "a");
        unpack_constraints(
            &mut ws,
            vec![location(
                "loc1",
                &[("rsc", "a"), ("node", "n1"), ("score", "200")],
            )],
        );
        assert_eq!(ws.locations.len(), 1);
        assert_eq!(
            ws.locations[0].scores.get(&NodeId::new("n1")),
            Some(&Score::from(200))
        );
    }

    #[test]
    fn unknown_node_is_a_config_error() {
        let mut ws = working_set(1);
        add_primitive(&mut ws, "a");
        unpack_constraints(
            &mut ws,
            vec![location(
                "loc1",
                &[("rsc", "a"), ("node", "n9"), ("score", "200")],
            )],
        );
        assert!(ws.locations.is_empty());
        assert_eq!(ws.log.entries().len(), 1);
    }

    #[test]
    fn rule_scores_only_passing_nodes() {
        let mut ws = working_set(2);
        ws.nodes
            .get_mut(&NodeId::new("n1"))
            .unwrap()
            .attributes
            .insert("tier".into(), "fast".into());
        add_primitive(&mut ws, "a");

        let mut constraint = location("loc1", &[("rsc", "a")]);
        constraint.rules.push(Rule {
            id: "r1".into(),
            score: Some(ScoreSpec::Literal(Score::from(500))),
            conditions: vec![Condition::Attribute(AttrExpression {
                attribute: "tier".into(),
                operation: AttrOp::Eq,
                value: Some("fast".into()),
                kind: ValueKind::String,
            })],
            ..Rule::default()
        });
        unpack_constraints(&mut ws, vec![constraint]);

        assert_eq!(ws.locations.len(), 1);
        let scores = &ws.locations[0].scores;
        assert_eq!(scores.get(&NodeId::new("n1")), Some(&Score::from(500)));
        assert_eq!(scores.get(&NodeId::new("n2")), None);
    }

    #[test]
    fn score_attribute_reads_per_node_values() {
        let mut ws = working_set(2);
        for (node, value) in [("n1", "10"), ("n2", "20")] {
            ws.nodes
                .get_mut(&NodeId::new(node))
                .unwrap()
                .attributes
                .insert("preference".into(), value.into());
        }
        add_primitive(&mut ws, "a");

        let mut constraint = location("loc1", &[("rsc", "a")]);
        constraint.rules.push(Rule {
            id: "r1".into(),
            score: Some(ScoreSpec::Attribute("preference".into())),
            ..Rule::default()
        });
        unpack_constraints(&mut ws, vec![constraint]);

        let scores = &ws.locations[0].scores;
        assert_eq!(scores.get(&NodeId::new("n1")), Some(&Score::from(10)));
        assert_eq!(scores.get(&NodeId::new("n2")), Some(&Score::from(20)));
    }

    #[test]
    fn pattern_matches_multiple_resources() {
        let mut ws = working_set(2);
        add_primitive(&mut ws, "web-1");
        add_primitive(&mut ws, "web-2");
        add_primitive(&mut ws, "db");
        unpack_constraints(
            &mut ws,
            vec![location(
                "loc1",
                &[("rsc-pattern", "^web-"), ("node", "n1"), ("score", "50")],
            )],
        );
        assert_eq!(ws.locations.len(), 2);
    }

    #[test]
    fn capture_interpolation_in_score_attribute() {
        assert_eq!(
            interpolate_captures("pref-%1", Some(&["web-a".into(), "a".into()])),
            "pref-a"
        );
        assert_eq!(interpolate_captures("plain", None), "plain");
        assert_eq!(
            interpolate_captures("%0-x", Some(&["whole".into()])),
            "whole-x"
        );
    }

    #[test]
    fn tag_reference_applies_to_all_members() {
        let mut ws = working_set(2);
        add_primitive(&mut ws, "a");
        add_primitive(&mut ws, "b");
        ws.tags.insert(
            "pair".into(),
            vec![atrio_core::ResourceId::new("a"), atrio_core::ResourceId::new("b")],
        );
        unpack_constraints(
            &mut ws,
            vec![location(
                "loc1",
                &[("rsc", "pair"), ("node", "n2"), ("score", "INFINITY")],
            )],
        );
        assert_eq!(ws.locations.len(), 2);
        assert!(ws.locations.iter().all(|l| l
            .scores
            .get(&NodeId::new("n2"))
            .is_some_and(|s| s.is_mandatory())));
    }
}
