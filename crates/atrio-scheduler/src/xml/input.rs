//! Input document parsing.
//!
//! Parses the configuration subtree (options, nodes, resources,
//! constraints, tags) and the live status document (node membership,
//! resource operation history, tickets) into a [`WorkingSet`]. Constraints
//! are carried out of here as raw typed records; resolving references and
//! expanding sets is the unpacker's job, not the parser's.
//!
//! Clone and bundle children are expanded into numbered instances here,
//! because everything downstream works on concrete instances.

use std::collections::BTreeMap;

use atrio_core::{Error, NodeId, ResourceId, Result, Score, TicketId};
use chrono::{DateTime, Utc};
use roxmltree::Node as XmlNode;

use crate::model::{
    CloneConfig, Node, NodeKind, Operation, Resource, ResourceIndex, RestartType, Role, Ticket,
    Variant, WorkingSet,
};
use crate::options::{parse_bool, parse_interval_ms, ClusterOptions};
use crate::rules::{
    parse_datetime, AttrExpression, AttrOp, BooleanOp, Condition, DateExpression, DateSpec,
    FieldRange, Rule, ScoreSpec, ValueKind,
};
use crate::unpack::{RawConstraint, RawConstraintKind, RawSet};

/// Parses both input documents into a working set plus raw constraints.
///
/// # Errors
///
/// Returns [`Error::MalformedDocument`] if either document is not
/// well-formed XML or lacks its expected root. Individually invalid
/// elements inside a well-formed document degrade to diagnostics.
pub fn parse(
    configuration_xml: &str,
    status_xml: &str,
    now: DateTime<Utc>,
) -> Result<(WorkingSet, Vec<RawConstraint>)> {
    let mut ws = WorkingSet::new(now);

    let config_doc =
        roxmltree::Document::parse(configuration_xml).map_err(|e| Error::MalformedDocument {
            document: "configuration",
            message: e.to_string(),
        })?;
    let raw = parse_configuration(config_doc.root_element(), &mut ws)?;

    let status_doc = roxmltree::Document::parse(status_xml).map_err(|e| Error::MalformedDocument {
        document: "status",
        message: e.to_string(),
    })?;
    parse_status(status_doc.root_element(), &mut ws)?;

    Ok((ws, raw))
}

// ── Configuration ───────────────────────────────────────────────────

fn parse_configuration(root: XmlNode<'_, '_>, ws: &mut WorkingSet) -> Result<Vec<RawConstraint>> {
    let config = if root.has_tag_name("configuration") {
        root
    } else {
        child(root, "configuration").ok_or_else(|| Error::MalformedDocument {
            document: "configuration",
            message: "missing <configuration> element".to_string(),
        })?
    };

    if let Some(crm_config) = child(config, "crm_config") {
        let mut properties = BTreeMap::new();
        for set in children(crm_config, "cluster_property_set") {
            collect_nvpairs(set, &mut properties);
        }
        ws.options = ClusterOptions::from_properties(&properties, &mut ws.log);
    }

    if let Some(nodes) = child(config, "nodes") {
        for node_el in children(nodes, "node") {
            parse_node(node_el, ws);
        }
    }

    if let Some(resources) = child(config, "resources") {
        parse_resources(resources, ws);
    }

    if let Some(tags) = child(config, "tags") {
        for tag_el in children(tags, "tag") {
            let Some(id) = tag_el.attribute("id") else {
                ws.log.config_error("ignoring <tag> without an ID");
                continue;
            };
            let members: Vec<ResourceId> = children(tag_el, "obj_ref")
                .filter_map(|r| r.attribute("id"))
                .map(ResourceId::new)
                .collect();
            ws.tags.insert(id.to_string(), members);
        }
    }

    let mut raw = Vec::new();
    if let Some(constraints) = child(config, "constraints") {
        for el in constraints.children().filter(XmlNode::is_element) {
            if let Some(constraint) = parse_raw_constraint(el, ws) {
                raw.push(constraint);
            }
        }
    }

    Ok(raw)
}

fn parse_node(el: XmlNode<'_, '_>, ws: &mut WorkingSet) {
    let Some(name) = el.attribute("uname").or_else(|| el.attribute("id")) else {
        ws.log.config_error("ignoring <node> without a name");
        return;
    };
    let name = match name.parse::<NodeId>() {
        Ok(name) => name,
        Err(err) => {
            ws.log.config_error(format!("ignoring node: {err}"));
            return;
        }
    };

    let mut node = Node::new(name.clone());
    node.kind = match el.attribute("type") {
        Some("remote") => NodeKind::Remote,
        // Container-backed nodes: guests and bundle replicas.
        Some("guest" | "bundle") => NodeKind::Guest,
        _ => NodeKind::Member,
    };
    for attrs in children(el, "instance_attributes") {
        collect_nvpairs(attrs, &mut node.attributes);
    }
    if let Some(utilization) = child(el, "utilization") {
        let mut raw = BTreeMap::new();
        collect_nvpairs(utilization, &mut raw);
        for (key, value) in raw {
            match value.parse::<i64>() {
                Ok(v) => {
                    node.capacity.insert(key, v);
                }
                Err(_) => ws.log.config_error(format!(
                    "invalid capacity '{value}' for '{key}' on node '{name}'"
                )),
            }
        }
    }
    ws.nodes.insert(name, node);
}

// ── Resources ───────────────────────────────────────────────────────

/// A parsed resource subtree, not yet in the arena.
#[derive(Debug, Clone)]
struct ParsedResource {
    resource: Resource,
    children: Vec<ParsedResource>,
}

impl ParsedResource {
    /// Deep copy with `:{index}` appended to every ID in the subtree.
    fn instance(&self, index: u32) -> Self {
        let mut copy = self.clone();
        copy.rename(index);
        copy
    }

    fn rename(&mut self, index: u32) {
        self.resource.id = self.resource.id.instance(index);
        for child in &mut self.children {
            child.rename(index);
        }
    }
}

/// Template definitions referenced by primitives.
#[derive(Debug, Default, Clone)]
struct TemplateDef {
    class: String,
    provider: Option<String>,
    agent: String,
    meta: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    utilization: BTreeMap<String, String>,
    operations: Vec<Operation>,
}

fn parse_resources(resources: XmlNode<'_, '_>, ws: &mut WorkingSet) {
    // Templates first; primitives may reference them regardless of order.
    let mut templates: BTreeMap<String, TemplateDef> = BTreeMap::new();
    for el in children(resources, "template") {
        let Some(id) = el.attribute("id") else {
            ws.log.config_error("ignoring <template> without an ID");
            continue;
        };
        let def = TemplateDef {
            class: el.attribute("class").unwrap_or("ocf").to_string(),
            provider: el.attribute("provider").map(str::to_string),
            agent: el.attribute("type").unwrap_or_default().to_string(),
            meta: collect_attr_sets(el, "meta_attributes"),
            params: collect_attr_sets(el, "instance_attributes"),
            utilization: collect_attr_sets(el, "utilization"),
            operations: parse_operations(el, ws),
        };
        templates.insert(id.to_string(), def);
        ws.templates.insert(id.to_string(), Vec::new());
    }

    let mut template_members: BTreeMap<String, Vec<ResourceId>> = BTreeMap::new();
    for el in resources.children().filter(XmlNode::is_element) {
        if el.has_tag_name("template") {
            continue;
        }
        let Some(tree) = parse_resource_tree(el, &templates, &mut template_members, ws) else {
            continue;
        };
        insert_tree(ws, tree, None);
    }

    for (template, members) in template_members {
        ws.templates.entry(template).or_default().extend(members);
    }
}

fn parse_resource_tree(
    el: XmlNode<'_, '_>,
    templates: &BTreeMap<String, TemplateDef>,
    template_members: &mut BTreeMap<String, Vec<ResourceId>>,
    ws: &mut WorkingSet,
) -> Option<ParsedResource> {
    let tag = el.tag_name().name();
    let Some(id) = el.attribute("id") else {
        ws.log
            .config_error(format!("ignoring <{tag}> resource without an ID"));
        return None;
    };
    let id = match id.parse::<ResourceId>() {
        Ok(id) => id,
        Err(err) => {
            ws.log.config_error(format!("ignoring <{tag}>: {err}"));
            return None;
        }
    };

    match tag {
        "primitive" => parse_primitive(el, id, templates, template_members, ws),
        "group" => {
            let mut resource = Resource::new(id, Variant::Group);
            apply_common_meta(&mut resource, &collect_attr_sets(el, "meta_attributes"), ws);
            let mut children_trees = Vec::new();
            for inner in children(el, "primitive") {
                if let Some(tree) = parse_resource_tree(inner, templates, template_members, ws) {
                    children_trees.push(tree);
                }
            }
            if children_trees.is_empty() {
                ws.log.config_error(format!(
                    "ignoring group '{}' with no members",
                    resource.id
                ));
                return None;
            }
            Some(ParsedResource {
                resource,
                children: children_trees,
            })
        }
        // <master> is the legacy spelling of a promotable clone.
        "clone" | "master" => {
            let meta = collect_attr_sets(el, "meta_attributes");
            let mut config = clone_config_from_meta(&meta, ws);
            if tag == "master" {
                config.promotable = true;
            }
            let mut resource = Resource::new(id, Variant::Clone(config));
            apply_common_meta(&mut resource, &meta, ws);
            let inner = el
                .children()
                .filter(XmlNode::is_element)
                .find(|c| c.has_tag_name("primitive") || c.has_tag_name("group"));
            let Some(inner) = inner else {
                ws.log.config_error(format!(
                    "ignoring clone '{}' with no inner resource",
                    resource.id
                ));
                return None;
            };
            let template = parse_resource_tree(inner, templates, template_members, ws)?;
            Some(ParsedResource {
                resource,
                children: vec![template],
            })
        }
        "bundle" => {
            let replicas = el
                .attribute("replicas")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1);
            let mut resource = Resource::new(id, Variant::Bundle { replicas });
            apply_common_meta(&mut resource, &collect_attr_sets(el, "meta_attributes"), ws);
            let Some(inner) = child(el, "primitive") else {
                ws.log.config_error(format!(
                    "ignoring bundle '{}' with no inner primitive",
                    resource.id
                ));
                return None;
            };
            let template = parse_resource_tree(inner, templates, template_members, ws)?;
            Some(ParsedResource {
                resource,
                children: vec![template],
            })
        }
        other => {
            ws.log
                .config_error(format!("unsupported resource type <{other}>"));
            None
        }
    }
}

fn parse_primitive(
    el: XmlNode<'_, '_>,
    id: ResourceId,
    templates: &BTreeMap<String, TemplateDef>,
    template_members: &mut BTreeMap<String, Vec<ResourceId>>,
    ws: &mut WorkingSet,
) -> Option<ParsedResource> {
    let template = el.attribute("template");
    let mut base = TemplateDef::default();
    if let Some(template_id) = template {
        match templates.get(template_id) {
            Some(def) => {
                base = def.clone();
                template_members
                    .entry(template_id.to_string())
                    .or_default()
                    .push(id.clone());
            }
            None => {
                ws.log.config_error(format!(
                    "ignoring primitive '{id}' referencing unknown template '{template_id}'"
                ));
                return None;
            }
        }
    }

    let class = el
        .attribute("class")
        .map_or(base.class.clone(), str::to_string);
    let provider = el
        .attribute("provider")
        .map(str::to_string)
        .or_else(|| base.provider.clone());
    let agent = el
        .attribute("type")
        .map_or(base.agent.clone(), str::to_string);

    let mut resource = Resource::new(
        id,
        Variant::Primitive {
            class,
            provider,
            agent,
        },
    );
    resource.template = template.map(str::to_string);

    // The primitive's own attributes win over the template's.
    let mut meta = base.meta;
    meta.extend(collect_attr_sets(el, "meta_attributes"));
    let mut params = base.params;
    params.extend(collect_attr_sets(el, "instance_attributes"));
    let mut utilization_raw = base.utilization;
    utilization_raw.extend(collect_attr_sets(el, "utilization"));

    resource.params = params;
    for (key, value) in utilization_raw {
        match value.parse::<i64>() {
            Ok(v) => {
                resource.utilization.insert(key, v);
            }
            Err(_) => ws.log.config_error(format!(
                "invalid utilization '{value}' for '{key}' on resource '{}'",
                resource.id
            )),
        }
    }

    resource.operations = base.operations;
    resource.operations.extend(parse_operations(el, ws));

    apply_common_meta(&mut resource, &meta, ws);

    Some(ParsedResource {
        resource,
        children: Vec::new(),
    })
}

fn parse_operations(el: XmlNode<'_, '_>, ws: &mut WorkingSet) -> Vec<Operation> {
    let Some(operations) = child(el, "operations") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for op in children(operations, "op") {
        let id = op.attribute("id").unwrap_or_default().to_string();
        let Some(task) = op.attribute("name") else {
            ws.log
                .config_error(format!("ignoring <op> '{id}' without a name"));
            continue;
        };
        let Some(interval_ms) = op.attribute("interval").and_then(parse_interval_ms) else {
            ws.log.config_error(format!(
                "ignoring <op> '{id}' with missing or invalid interval"
            ));
            continue;
        };
        let timeout_ms = op.attribute("timeout").and_then(parse_interval_ms);
        let role = match op.attribute("role").map(str::parse::<Role>) {
            None => None,
            Some(Ok(role)) => Some(role),
            Some(Err(err)) => {
                ws.log.config_error(format!("in <op> '{id}': {err}"));
                continue;
            }
        };
        let enabled = op
            .attribute("enabled")
            .and_then(parse_bool)
            .unwrap_or(true);
        out.push(Operation {
            id,
            task: task.to_string(),
            interval_ms,
            timeout_ms,
            role,
            enabled,
        });
    }
    out
}

fn clone_config_from_meta(meta: &BTreeMap<String, String>, ws: &mut WorkingSet) -> CloneConfig {
    let mut config = CloneConfig::default();
    if let Some(value) = meta.get("clone-max") {
        match value.parse::<u32>() {
            Ok(v) => config.max = Some(v),
            Err(_) => ws
                .log
                .config_error(format!("invalid value '{value}' for 'clone-max'")),
        }
    }
    let mut number = |key: &str, slot: &mut u32| {
        if let Some(value) = meta.get(key) {
            match value.parse::<u32>() {
                Ok(v) => *slot = v,
                Err(_) => ws
                    .log
                    .config_error(format!("invalid value '{value}' for '{key}'")),
            }
        }
    };
    number("clone-node-max", &mut config.node_max);
    number("clone-min", &mut config.min);
    number("promoted-max", &mut config.promoted_max);
    number("promoted-node-max", &mut config.promoted_node_max);
    let mut boolean = |key: &str, slot: &mut bool| {
        if let Some(value) = meta.get(key) {
            match parse_bool(value) {
                Some(v) => *slot = v,
                None => ws
                    .log
                    .config_error(format!("invalid value '{value}' for '{key}'")),
            }
        }
    };
    boolean("promotable", &mut config.promotable);
    boolean("interleave", &mut config.interleave);
    boolean("ordered", &mut config.ordered);
    boolean("globally-unique", &mut config.globally_unique);
    config
}

fn apply_common_meta(
    resource: &mut Resource,
    meta: &BTreeMap<String, String>,
    ws: &mut WorkingSet,
) {
    for (key, value) in meta {
        match key.as_str() {
            "is-managed" => {
                if let Some(v) = parse_bool(value) {
                    resource.flags.managed = v;
                }
            }
            "target-role" => match value.parse::<Role>() {
                Ok(role) => resource.target_role = Some(role),
                Err(err) => ws
                    .log
                    .config_error(format!("on resource '{}': {err}", resource.id)),
            },
            "priority" => {
                if let Ok(v) = value.parse::<i64>() {
                    resource.priority = v;
                }
            }
            "resource-stickiness" => match value.parse::<Score>() {
                Ok(score) => resource.stickiness = score,
                Err(_) => ws.log.config_error(format!(
                    "invalid stickiness '{value}' on resource '{}'",
                    resource.id
                )),
            },
            "migration-threshold" => {
                if let Ok(v) = value.parse::<u32>() {
                    resource.migration_threshold = v;
                }
            }
            "allow-migrate" => {
                if let Some(v) = parse_bool(value) {
                    resource.flags.allow_migrate = v;
                }
            }
            "notify" => {
                if let Some(v) = parse_bool(value) {
                    resource.flags.notify = v;
                }
            }
            "critical" => {
                if let Some(v) = parse_bool(value) {
                    resource.flags.critical = v;
                }
            }
            "restart-type" => {
                ws.log.warn_once(
                    atrio_core::DeprecationGate::RestartType,
                    "support for the restart-type meta-attribute is deprecated",
                );
                if value == "restart" {
                    resource.restart_type = RestartType::Restart;
                }
            }
            "remove-after-stop" => {
                ws.log.warn_once(
                    atrio_core::DeprecationGate::RemoveAfterStop,
                    format!(
                        "remove-after-stop (on '{}') is not supported and has no effect",
                        resource.id
                    ),
                );
            }
            _ => {}
        }
    }
    resource.meta = meta.clone();
}

fn insert_tree(
    ws: &mut WorkingSet,
    tree: ParsedResource,
    parent: Option<ResourceIndex>,
) -> Option<ResourceIndex> {
    let is_expanding = matches!(
        tree.resource.variant,
        Variant::Clone(_) | Variant::Bundle { .. }
    );
    let mut resource = tree.resource;
    resource.parent = parent;
    let ix = ws.add_resource(resource)?;
    if let Some(parent_ix) = parent {
        ws.resources[parent_ix].children.push(ix);
    }

    if is_expanding {
        let count = match &ws.resources[ix].variant {
            Variant::Clone(config) => config
                .max
                .unwrap_or(u32::try_from(ws.nodes.len()).unwrap_or(0)),
            Variant::Bundle { replicas } => *replicas,
            _ => unreachable!("checked above"),
        };
        let Some(template) = tree.children.into_iter().next() else {
            return Some(ix);
        };
        let notify = ws.resources[ix].flags.notify;
        for i in 0..count {
            let mut instance = template.instance(i);
            instance.resource.flags.notify = notify;
            insert_tree(ws, instance, Some(ix));
        }
    } else {
        for children_tree in tree.children {
            insert_tree(ws, children_tree, Some(ix));
        }
    }
    Some(ix)
}

// ── Constraints (raw) ───────────────────────────────────────────────

fn parse_raw_constraint(el: XmlNode<'_, '_>, ws: &mut WorkingSet) -> Option<RawConstraint> {
    let tag = el.tag_name().name();
    let kind = match tag {
        "rsc_location" => RawConstraintKind::Location,
        "rsc_colocation" => RawConstraintKind::Colocation,
        "rsc_order" => RawConstraintKind::Ordering,
        "rsc_ticket" => RawConstraintKind::Ticket,
        other => {
            ws.log
                .config_error(format!("unsupported constraint type <{other}>"));
            return None;
        }
    };
    let Some(id) = el.attribute("id") else {
        ws.log
            .config_error(format!("ignoring <{tag}> constraint without an ID"));
        return None;
    };

    let mut attrs = BTreeMap::new();
    for attr in el.attributes() {
        attrs.insert(attr.name().to_string(), attr.value().to_string());
    }

    let mut rules = Vec::new();
    for rule_el in children(el, "rule") {
        match parse_rule(rule_el) {
            Ok(rule) => rules.push(rule),
            Err(message) => {
                ws.log
                    .config_error(format!("invalid rule in constraint '{id}': {message}"));
            }
        }
    }

    let lifetime = child(el, "lifetime").and_then(|lifetime_el| {
        ws.log.warn_once(
            atrio_core::DeprecationGate::Lifetime,
            format!(
                "support for 'lifetime' (in constraint '{id}') is deprecated; \
                 use a rule on the constraint instead"
            ),
        );
        let nested: Vec<Rule> = children(lifetime_el, "rule")
            .filter_map(|r| parse_rule(r).ok())
            .collect();
        if nested.is_empty() {
            None
        } else {
            // Multiple lifetime rules combine as "or".
            Some(Rule {
                id: format!("{id}-lifetime"),
                op: BooleanOp::Or,
                role: None,
                score: None,
                conditions: nested.into_iter().map(Condition::Nested).collect(),
            })
        }
    });

    let mut sets = Vec::new();
    for set_el in children(el, "resource_set") {
        let set_id = set_el.attribute("id").unwrap_or(id).to_string();
        let members: Vec<String> = children(set_el, "resource_ref")
            .filter_map(|r| r.attribute("id"))
            .map(str::to_string)
            .collect();
        sets.push(RawSet {
            id: set_id,
            members,
            sequential: set_el
                .attribute("sequential")
                .and_then(parse_bool)
                .unwrap_or(true),
            require_all: set_el
                .attribute("require-all")
                .and_then(parse_bool)
                .unwrap_or(true),
            role: set_el.attribute("role").map(str::to_string),
            action: set_el.attribute("action").map(str::to_string),
            score: set_el.attribute("score").and_then(|s| s.parse().ok()),
        });
    }

    Some(RawConstraint {
        id: id.to_string(),
        kind,
        attrs,
        rules,
        lifetime,
        sets,
    })
}

/// Parses a `<rule>` element into a rule tree.
pub(crate) fn parse_rule(el: XmlNode<'_, '_>) -> std::result::Result<Rule, String> {
    let id = el.attribute("id").unwrap_or_default().to_string();
    let op = match el.attribute("boolean-op") {
        None | Some("and") => BooleanOp::And,
        Some("or") => BooleanOp::Or,
        Some(other) => return Err(format!("invalid boolean-op '{other}'")),
    };
    let score = match (el.attribute("score"), el.attribute("score-attribute")) {
        (Some(text), _) => Some(ScoreSpec::Literal(
            text.parse::<Score>()
                .map_err(|_| format!("invalid score '{text}'"))?,
        )),
        (None, Some(attr)) => Some(ScoreSpec::Attribute(attr.to_string())),
        (None, None) => None,
    };

    let mut conditions = Vec::new();
    for cond in el.children().filter(XmlNode::is_element) {
        match cond.tag_name().name() {
            "rule" => conditions.push(Condition::Nested(parse_rule(cond)?)),
            "expression" => conditions.push(Condition::Attribute(parse_expression(cond)?)),
            "date_expression" => conditions.push(Condition::Date(parse_date_expression(cond)?)),
            other => return Err(format!("unsupported rule condition <{other}>")),
        }
    }

    Ok(Rule {
        id,
        op,
        role: el.attribute("role").map(str::to_string),
        score,
        conditions,
    })
}

fn parse_expression(el: XmlNode<'_, '_>) -> std::result::Result<AttrExpression, String> {
    let attribute = el
        .attribute("attribute")
        .ok_or_else(|| "expression without attribute".to_string())?
        .to_string();
    let operation = match el
        .attribute("operation")
        .ok_or_else(|| "expression without operation".to_string())?
    {
        "lt" => AttrOp::Lt,
        "gt" => AttrOp::Gt,
        "lte" => AttrOp::Lte,
        "gte" => AttrOp::Gte,
        "eq" => AttrOp::Eq,
        "ne" => AttrOp::Ne,
        "defined" => AttrOp::Defined,
        "not_defined" => AttrOp::NotDefined,
        other => return Err(format!("invalid expression operation '{other}'")),
    };
    let kind = match el.attribute("type") {
        None => ValueKind::Auto,
        Some("string") => ValueKind::String,
        Some("integer" | "number") => ValueKind::Integer,
        Some("version") => ValueKind::Version,
        Some(other) => return Err(format!("invalid expression type '{other}'")),
    };
    Ok(AttrExpression {
        attribute,
        operation,
        value: el.attribute("value").map(str::to_string),
        kind,
    })
}

fn parse_date_expression(el: XmlNode<'_, '_>) -> std::result::Result<DateExpression, String> {
    let operation = el
        .attribute("operation")
        .ok_or_else(|| "date_expression without operation".to_string())?;
    let instant = |name: &str| -> std::result::Result<DateTime<Utc>, String> {
        let text = el
            .attribute(name)
            .ok_or_else(|| format!("date_expression missing '{name}'"))?;
        parse_datetime(text).ok_or_else(|| format!("invalid date '{text}'"))
    };
    match operation {
        "gt" => Ok(DateExpression::Gt(instant("start")?)),
        "lt" => Ok(DateExpression::Lt(instant("end")?)),
        "in_range" => {
            let start = el
                .attribute("start")
                .map(|t| parse_datetime(t).ok_or_else(|| format!("invalid date '{t}'")))
                .transpose()?;
            let end = el
                .attribute("end")
                .map(|t| parse_datetime(t).ok_or_else(|| format!("invalid date '{t}'")))
                .transpose()?;
            if start.is_none() && end.is_none() {
                return Err("in_range requires start or end".to_string());
            }
            Ok(DateExpression::InRange { start, end })
        }
        "date_spec" => {
            let spec_el = child(el, "date_spec")
                .ok_or_else(|| "date_spec operation without <date_spec>".to_string())?;
            let field = |name: &str| -> std::result::Result<Option<FieldRange>, String> {
                spec_el
                    .attribute(name)
                    .map(|text| {
                        FieldRange::parse(text)
                            .ok_or_else(|| format!("invalid {name} range '{text}'"))
                    })
                    .transpose()
            };
            Ok(DateExpression::Spec(DateSpec {
                seconds: field("seconds")?,
                minutes: field("minutes")?,
                hours: field("hours")?,
                weekdays: field("weekdays")?,
                monthdays: field("monthdays")?,
                yeardays: field("yeardays")?,
                months: field("months")?,
                years: field("years")?,
            }))
        }
        other => Err(format!("invalid date_expression operation '{other}'")),
    }
}

// ── Status ──────────────────────────────────────────────────────────

fn parse_status(root: XmlNode<'_, '_>, ws: &mut WorkingSet) -> Result<()> {
    let status = if root.has_tag_name("status") {
        root
    } else {
        child(root, "status").ok_or_else(|| Error::MalformedDocument {
            document: "status",
            message: "missing <status> element".to_string(),
        })?
    };

    ws.have_quorum = status
        .attribute("have-quorum")
        .and_then(parse_bool)
        .unwrap_or(true);

    for node_el in children(status, "node_state") {
        parse_node_state(node_el, ws);
    }

    if let Some(tickets) = child(status, "tickets") {
        for ticket_el in children(tickets, "ticket_state") {
            let Some(id) = ticket_el.attribute("id") else {
                continue;
            };
            let id = TicketId::new(id);
            let mut ticket = Ticket::new(id.clone());
            ticket.granted = ticket_el
                .attribute("granted")
                .and_then(parse_bool)
                .unwrap_or(false);
            ticket.standby = ticket_el
                .attribute("standby")
                .and_then(parse_bool)
                .unwrap_or(false);
            ticket.last_granted = ticket_el.attribute("last-granted").and_then(parse_datetime);
            ws.tickets.insert(id, ticket);
        }
    }

    derive_current_roles(ws);
    Ok(())
}

fn parse_node_state(el: XmlNode<'_, '_>, ws: &mut WorkingSet) {
    let Some(name) = el.attribute("uname").or_else(|| el.attribute("id")) else {
        ws.log.config_error("ignoring <node_state> without a name");
        return;
    };
    let name = NodeId::new(name);
    if !ws.nodes.contains_key(&name) {
        ws.log.warn(format!(
            "status mentions node '{name}' that is not configured"
        ));
        return;
    }

    let flag = |attr: &str, default: bool| el.attribute(attr).and_then(parse_bool).unwrap_or(default);
    let online = flag("online", false);
    let expected_up = matches!(el.attribute("expected"), Some("member") | None);

    let mut transient = BTreeMap::new();
    for attrs in children(el, "transient_attributes") {
        collect_nvpairs(attrs, &mut transient);
    }

    if let Some(node) = ws.nodes.get_mut(&name) {
        node.online = online;
        node.standby = flag("standby", false) || transient.get("standby").is_some_and(|v| parse_bool(v) == Some(true));
        node.shutdown = flag("shutdown", false);
        node.maintenance = flag("maintenance", false);
        node.pending = flag("pending", false);
        // A node expected to be a member but not online is in an unknown
        // state and must be fenced before its resources can recover.
        node.unclean = flag("unclean", false) || (!online && expected_up);
        node.attributes.extend(transient.clone());
    }

    // Per-resource transient attributes: failure counts, promotion scores.
    for (key, value) in &transient {
        if let Some(rsc_id) = key.strip_prefix("fail-count-") {
            let count = match value.as_str() {
                "INFINITY" => u32::MAX,
                text => text.parse().unwrap_or(0),
            };
            for ix in resolve_history_resources(ws, rsc_id) {
                ws.resources[ix].fail_counts.insert(name.clone(), count);
            }
        } else if let Some(rsc_id) = key.strip_prefix("promotion-") {
            if let Ok(score) = value.parse::<Score>() {
                for ix in resolve_history_resources(ws, rsc_id) {
                    ws.resources[ix]
                        .promotion_scores
                        .insert(name.clone(), score);
                }
            }
        }
    }

    for history in children(el, "resource_history") {
        parse_resource_history(history, &name, ws);
    }
}

/// All resources a status attribute like `fail-count-<id>` applies to:
/// the exact resource, or every instance when `<id>` names a clone child.
fn resolve_history_resources(ws: &WorkingSet, id: &str) -> Vec<ResourceIndex> {
    let rsc_id = ResourceId::new(id);
    if let Some(ix) = ws.resource_index(&rsc_id) {
        return vec![ix];
    }
    let prefix = format!("{id}:");
    (0..ws.resources.len())
        .filter(|&ix| ws.resources[ix].id.as_str().starts_with(&prefix))
        .collect()
}

fn parse_resource_history(el: XmlNode<'_, '_>, node: &NodeId, ws: &mut WorkingSet) {
    let Some(id) = el.attribute("id") else {
        ws.log.config_error("ignoring <resource_history> without an ID");
        return;
    };
    let Some(rsc) = find_history_target(ws, id, node) else {
        ws.log.info(format!(
            "status history for unknown resource '{id}' on '{node}' (orphan)"
        ));
        return;
    };

    // Replay the operations in document order.
    let mut role = Role::Stopped;
    let mut failed = false;
    let mut start_failed = false;
    let mut monitors: Vec<u32> = Vec::new();
    for op in children(el, "operation") {
        let Some(task) = op.attribute("task") else {
            continue;
        };
        let rc: i32 = op
            .attribute("rc")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let interval_ms: u32 = op
            .attribute("interval-ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        match (task, rc) {
            ("start", 0) | ("migrate_from", 0) => role = Role::Started,
            ("start", _) => {
                failed = true;
                start_failed = true;
            }
            ("stop", 0) | ("migrate_to", 0) => role = Role::Stopped,
            ("promote", 0) => role = Role::Promoted,
            ("demote", 0) => role = Role::Unpromoted,
            ("monitor", 0) => {
                if interval_ms > 0 {
                    monitors.push(interval_ms);
                } else if role == Role::Stopped {
                    role = Role::Started;
                }
            }
            // Monitor rc 8 reports the promoted role; rc 7 reports "not
            // running", which is not a failure.
            ("monitor", 8) => role = Role::Promoted,
            ("monitor", 7) => role = Role::Stopped,
            (_, 0) => {}
            (_, _) => failed = true,
        }
    }

    let resource = &mut ws.resources[rsc];
    resource.known_on.insert(node.clone());
    if failed {
        resource.flags.failed = true;
        resource.failed_on.insert(node.clone());
    }
    if start_failed {
        resource.start_failed_on.insert(node.clone());
    }
    if role.is_active() {
        resource.running_on.insert(node.clone());
        if role == Role::Promoted {
            resource.promoted_on.insert(node.clone());
        }
        if !monitors.is_empty() {
            monitors.sort_unstable();
            monitors.dedup();
            resource.active_monitors.insert(node.clone(), monitors);
        }
    }
}

/// Maps a history entry ID to a resource index.
///
/// Exact IDs win. Otherwise the ID names the child of an anonymous clone
/// and history is assigned to the lowest-numbered instance not already
/// known on another node.
fn find_history_target(ws: &WorkingSet, id: &str, node: &NodeId) -> Option<ResourceIndex> {
    let rsc_id = ResourceId::new(id);
    if let Some(ix) = ws.resource_index(&rsc_id) {
        return Some(ix);
    }
    let prefix = format!("{id}:");
    let mut candidates: Vec<ResourceIndex> = (0..ws.resources.len())
        .filter(|&ix| ws.resources[ix].id.as_str().starts_with(&prefix))
        .collect();
    candidates.sort_by_key(|&ix| instance_number(&ws.resources[ix].id));
    candidates
        .iter()
        .copied()
        .find(|&ix| {
            let rsc = &ws.resources[ix];
            rsc.known_on.is_empty() || rsc.known_on.contains(node)
        })
        .or_else(|| candidates.first().copied())
}

fn instance_number(id: &ResourceId) -> u32 {
    id.as_str()
        .rsplit_once(':')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Rolls the per-node roles up into each resource's current role.
fn derive_current_roles(ws: &mut WorkingSet) {
    for ix in 0..ws.resources.len() {
        // Running instances of a promotable clone idle in Unpromoted.
        let promotable_child = ws.resources[ix]
            .parent
            .is_some_and(|p| ws.resources[p].is_promotable());
        let resource = &mut ws.resources[ix];
        resource.role = if !resource.promoted_on.is_empty() {
            Role::Promoted
        } else if !resource.running_on.is_empty() {
            if promotable_child {
                Role::Unpromoted
            } else {
                Role::Started
            }
        } else if resource.known_on.is_empty() {
            Role::Unknown
        } else {
            Role::Stopped
        };
    }
    // Collectives reflect their strongest child.
    for ix in 0..ws.resources.len() {
        if ws.resources[ix].variant.is_collective() {
            let strongest = ws.resources[ix]
                .children
                .iter()
                .map(|&c| ws.resources[c].role)
                .max()
                .unwrap_or(Role::Unknown);
            ws.resources[ix].role = strongest;
        }
    }
}

// ── XML helpers ─────────────────────────────────────────────────────

fn child<'a, 'b>(el: XmlNode<'a, 'b>, name: &str) -> Option<XmlNode<'a, 'b>> {
    el.children()
        .filter(XmlNode::is_element)
        .find(|c| c.has_tag_name(name))
}

fn children<'a, 'b>(
    el: XmlNode<'a, 'b>,
    name: &'a str,
) -> impl Iterator<Item = XmlNode<'a, 'b>> {
    el.children()
        .filter(XmlNode::is_element)
        .filter(move |c| c.has_tag_name(name))
}

/// Collects `<nvpair name= value=>` children, looking through one level of
/// wrapper elements such as `<instance_attributes>`.
fn collect_nvpairs(el: XmlNode<'_, '_>, out: &mut BTreeMap<String, String>) {
    for c in el.children().filter(XmlNode::is_element) {
        if c.has_tag_name("nvpair") {
            if let (Some(name), Some(value)) = (c.attribute("name"), c.attribute("value")) {
                out.insert(name.to_string(), value.to_string());
            }
        } else {
            collect_nvpairs(c, out);
        }
    }
}

fn collect_attr_sets(el: XmlNode<'_, '_>, wrapper: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for set in children(el, wrapper) {
        collect_nvpairs(set, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Variant;

    fn now() -> DateTime<Utc> {
        parse_datetime("2026-08-01 12:00:00").unwrap()
    }

    const TWO_NODES: &str = r#"
        <nodes>
          <node id="1" uname="n1"/>
          <node id="2" uname="n2"/>
        </nodes>"#;

    fn config(resources: &str, constraints: &str) -> String {
        format!(
            "<configuration>{TWO_NODES}<resources>{resources}</resources>\
             <constraints>{constraints}</constraints></configuration>"
        )
    }

    fn both_online() -> &'static str {
        r#"<status have-quorum="true">
             <node_state uname="n1" online="true"/>
             <node_state uname="n2" online="true"/>
           </status>"#
    }

    #[test]
    fn parses_nodes_and_options() {
        let xml = r#"
        <configuration>
          <crm_config>
            <cluster_property_set>
              <nvpair name="stonith-enabled" value="false"/>
            </cluster_property_set>
          </crm_config>
          <nodes><node id="1" uname="n1"/></nodes>
        </configuration>"#;
        let (ws, _) = parse(xml, "<status/>", now()).unwrap();
        assert!(!ws.options.stonith_enabled);
        assert_eq!(ws.nodes.len(), 1);
        assert!(ws.nodes.contains_key(&NodeId::new("n1")));
    }

    #[test]
    fn parses_primitive_with_operations() {
        let xml = config(
            r#"<primitive id="db" class="ocf" provider="heartbeat" type="pgsql">
                 <meta_attributes>
                   <nvpair name="resource-stickiness" value="100"/>
                   <nvpair name="migration-threshold" value="3"/>
                 </meta_attributes>
                 <operations>
                   <op id="db-mon" name="monitor" interval="10s" timeout="30s"/>
                 </operations>
               </primitive>"#,
            "",
        );
        let (ws, _) = parse(&xml, both_online(), now()).unwrap();
        let ix = ws.resource_index(&ResourceId::new("db")).unwrap();
        let rsc = ws.rsc(ix);
        assert_eq!(rsc.stickiness, Score::from(100));
        assert_eq!(rsc.migration_threshold, 3);
        assert_eq!(rsc.operations.len(), 1);
        assert_eq!(rsc.operations[0].interval_ms, 10_000);
        assert_eq!(rsc.operations[0].timeout_ms, Some(30_000));
    }

    #[test]
    fn clone_expands_to_instances_per_node() {
        let xml = config(
            r#"<clone id="web-clone">
                 <primitive id="web" class="ocf" type="apache"/>
               </clone>"#,
            "",
        );
        let (ws, _) = parse(&xml, both_online(), now()).unwrap();
        let clone_ix = ws.resource_index(&ResourceId::new("web-clone")).unwrap();
        assert_eq!(ws.rsc(clone_ix).children.len(), 2);
        assert!(ws.resource_index(&ResourceId::new("web:0")).is_some());
        assert!(ws.resource_index(&ResourceId::new("web:1")).is_some());
    }

    #[test]
    fn promotable_clone_via_meta_and_legacy_tag() {
        let xml = config(
            r#"<clone id="c1">
                 <meta_attributes><nvpair name="promotable" value="true"/></meta_attributes>
                 <primitive id="p1" class="ocf" type="Stateful"/>
               </clone>
               <master id="c2">
                 <primitive id="p2" class="ocf" type="Stateful"/>
               </master>"#,
            "",
        );
        let (ws, _) = parse(&xml, both_online(), now()).unwrap();
        for id in ["c1", "c2"] {
            let ix = ws.resource_index(&ResourceId::new(id)).unwrap();
            assert!(ws.rsc(ix).is_promotable(), "{id} should be promotable");
        }
    }

    #[test]
    fn status_derives_roles_from_history() {
        let xml = config(r#"<primitive id="db" class="ocf" type="pgsql"/>"#, "");
        let status = r#"
        <status have-quorum="true">
          <node_state uname="n1" online="true">
            <resource_history id="db">
              <operation task="start" rc="0"/>
              <operation task="monitor" rc="0" interval-ms="10000"/>
            </resource_history>
          </node_state>
          <node_state uname="n2" online="true"/>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        let rsc = ws.rsc(ws.resource_index(&ResourceId::new("db")).unwrap());
        assert_eq!(rsc.role, Role::Started);
        assert!(rsc.running_on.contains(&NodeId::new("n1")));
        assert!(rsc.known_on.contains(&NodeId::new("n1")));
        assert_eq!(rsc.active_monitors[&NodeId::new("n1")], vec![10_000]);
    }

    #[test]
    fn failed_start_marks_resource_failed() {
        let xml = config(r#"<primitive id="db" class="ocf" type="pgsql"/>"#, "");
        let status = r#"
        <status>
          <node_state uname="n1" online="true">
            <resource_history id="db">
              <operation task="start" rc="1"/>
            </resource_history>
          </node_state>
          <node_state uname="n2" online="true"/>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        let rsc = ws.rsc(ws.resource_index(&ResourceId::new("db")).unwrap());
        assert!(rsc.flags.failed);
        assert!(rsc.start_failed_on.contains(&NodeId::new("n1")));
        assert_eq!(rsc.role, Role::Stopped);
    }

    #[test]
    fn offline_expected_member_is_unclean() {
        let xml = config(r#"<primitive id="db" class="ocf" type="pgsql"/>"#, "");
        let status = r#"
        <status>
          <node_state uname="n1" online="false" expected="member"/>
          <node_state uname="n2" online="false" expected="down"/>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        assert!(ws.nodes[&NodeId::new("n1")].unclean);
        assert!(!ws.nodes[&NodeId::new("n2")].unclean);
    }

    #[test]
    fn fail_counts_and_promotion_scores_from_transient_attributes() {
        let xml = config(
            r#"<clone id="c">
                 <meta_attributes><nvpair name="promotable" value="true"/></meta_attributes>
                 <primitive id="s" class="ocf" type="Stateful"/>
               </clone>"#,
            "",
        );
        let status = r#"
        <status>
          <node_state uname="n1" online="true">
            <transient_attributes>
              <nvpair name="fail-count-s" value="2"/>
              <nvpair name="promotion-s" value="100"/>
            </transient_attributes>
          </node_state>
          <node_state uname="n2" online="true"/>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        let ix = ws.resource_index(&ResourceId::new("s:0")).unwrap();
        let rsc = ws.rsc(ix);
        assert_eq!(rsc.fail_count(&NodeId::new("n1")), 2);
        assert_eq!(
            rsc.promotion_scores.get(&NodeId::new("n1")),
            Some(&Score::from(100))
        );
    }

    #[test]
    fn anonymous_clone_history_maps_to_free_instance() {
        let xml = config(
            r#"<clone id="c"><primitive id="s" class="ocf" type="Dummy"/></clone>"#,
            "",
        );
        let status = r#"
        <status>
          <node_state uname="n1" online="true">
            <resource_history id="s">
              <operation task="start" rc="0"/>
            </resource_history>
          </node_state>
          <node_state uname="n2" online="true">
            <resource_history id="s">
              <operation task="start" rc="0"/>
            </resource_history>
          </node_state>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        let first = ws.rsc(ws.resource_index(&ResourceId::new("s:0")).unwrap());
        let second = ws.rsc(ws.resource_index(&ResourceId::new("s:1")).unwrap());
        assert_eq!(first.running_on.len(), 1);
        assert_eq!(second.running_on.len(), 1);
        assert_ne!(
            first.running_on.iter().next(),
            second.running_on.iter().next()
        );
    }

    #[test]
    fn raw_constraints_carry_attributes_and_sets() {
        let xml = config(
            r#"<primitive id="a" class="ocf" type="Dummy"/>
               <primitive id="b" class="ocf" type="Dummy"/>"#,
            r#"<rsc_order id="o1" first="a" then="b" kind="Mandatory"/>
               <rsc_colocation id="c1" score="INFINITY">
                 <resource_set id="c1-set" sequential="true">
                   <resource_ref id="a"/>
                   <resource_ref id="b"/>
                 </resource_set>
               </rsc_colocation>"#,
        );
        let (_, raw) = parse(&xml, both_online(), now()).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].kind, RawConstraintKind::Ordering);
        assert_eq!(raw[0].attrs.get("kind").map(String::as_str), Some("Mandatory"));
        assert_eq!(raw[1].sets.len(), 1);
        assert_eq!(raw[1].sets[0].members, vec!["a", "b"]);
    }

    #[test]
    fn malformed_xml_is_a_hard_error() {
        let err = parse("<configuration>", "<status/>", now()).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { document: "configuration", .. }));
    }

    #[test]
    fn group_requires_members() {
        let xml = config(r#"<group id="g"/>"#, "");
        let (ws, _) = parse(&xml, both_online(), now()).unwrap();
        assert!(ws.resource_index(&ResourceId::new("g")).is_none());
        assert!(ws
            .log
            .entries()
            .iter()
            .any(|d| d.message.contains("no members")));
    }

    #[test]
    fn template_supplies_defaults_and_membership() {
        let xml = config(
            r#"<template id="base" class="ocf" provider="heartbeat" type="Dummy">
                 <meta_attributes><nvpair name="resource-stickiness" value="50"/></meta_attributes>
               </template>
               <primitive id="a" template="base"/>
               <primitive id="b" template="base">
                 <meta_attributes><nvpair name="resource-stickiness" value="70"/></meta_attributes>
               </primitive>"#,
            "",
        );
        let (ws, _) = parse(&xml, both_online(), now()).unwrap();
        let a = ws.rsc(ws.resource_index(&ResourceId::new("a")).unwrap());
        let b = ws.rsc(ws.resource_index(&ResourceId::new("b")).unwrap());
        assert_eq!(a.stickiness, Score::from(50));
        assert_eq!(b.stickiness, Score::from(70));
        assert!(matches!(
            &a.variant,
            Variant::Primitive { class, .. } if class == "ocf"
        ));
        assert_eq!(
            ws.templates.get("base").map(Vec::as_slice),
            Some(&[ResourceId::new("a"), ResourceId::new("b")][..])
        );
    }

    #[test]
    fn tickets_parsed_from_status() {
        let xml = config(r#"<primitive id="a" class="ocf" type="Dummy"/>"#, "");
        let status = r#"
        <status>
          <node_state uname="n1" online="true"/>
          <node_state uname="n2" online="true"/>
          <tickets>
            <ticket_state id="T" granted="true" last-granted="2026-07-01 00:00:00"/>
          </tickets>
        </status>"#;
        let (ws, _) = parse(&xml, status, now()).unwrap();
        let ticket = &ws.tickets[&TicketId::new("T")];
        assert!(ticket.granted);
        assert!(ticket.last_granted.is_some());
    }
}
