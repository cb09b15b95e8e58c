//! Node health scoring.
//!
//! Nodes publish `#health-*` attributes with the values `red`, `yellow`,
//! `green`, or a raw score. The configured strategy maps them to a score
//! contribution added to every resource's view of the node.

use atrio_core::Score;

use crate::model::Node;
use crate::options::{ClusterOptions, NodeHealthStrategy};

/// The health contribution of `node` under the configured strategy.
#[must_use]
pub fn node_health_score(node: &Node, options: &ClusterOptions) -> Score {
    match options.node_health_strategy {
        NodeHealthStrategy::None => Score::ZERO,
        NodeHealthStrategy::MigrateOnRed => sum(node, |value| match value {
            HealthValue::Red => Score::NEG_INFINITY,
            HealthValue::Yellow | HealthValue::Green => Score::ZERO,
            HealthValue::Raw(score) => score,
        }),
        NodeHealthStrategy::OnlyGreen => sum(node, |value| match value {
            HealthValue::Red | HealthValue::Yellow => Score::NEG_INFINITY,
            HealthValue::Green => Score::ZERO,
            HealthValue::Raw(score) => score,
        }),
        NodeHealthStrategy::Progressive => sum(node, |value| match value {
            HealthValue::Red => options.node_health_red,
            HealthValue::Yellow => options.node_health_yellow,
            HealthValue::Green => options.node_health_green,
            HealthValue::Raw(score) => score,
        }),
        NodeHealthStrategy::Custom => sum(node, |value| match value {
            HealthValue::Red => options.node_health_red,
            HealthValue::Yellow => options.node_health_yellow,
            HealthValue::Green => options.node_health_green,
            HealthValue::Raw(score) => score,
        }),
    }
}

enum HealthValue {
    Red,
    Yellow,
    Green,
    Raw(Score),
}

fn sum(node: &Node, map: impl Fn(HealthValue) -> Score) -> Score {
    node.health_attributes()
        .map(|(_, value)| {
            let parsed = match value {
                "red" => HealthValue::Red,
                "yellow" => HealthValue::Yellow,
                "green" => HealthValue::Green,
                other => HealthValue::Raw(other.parse().unwrap_or(Score::ZERO)),
            };
            map(parsed)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrio_core::NodeId;

    fn node_with(values: &[(&str, &str)]) -> Node {
        let mut node = Node::new(NodeId::new("n1"));
        node.online = true;
        for (key, value) in values {
            node.attributes.insert((*key).to_string(), (*value).to_string());
        }
        node
    }

    fn options(strategy: NodeHealthStrategy) -> ClusterOptions {
        ClusterOptions {
            node_health_strategy: strategy,
            ..ClusterOptions::default()
        }
    }

    #[test]
    fn none_strategy_ignores_everything() {
        let node = node_with(&[("#health-disk", "red")]);
        assert_eq!(
            node_health_score(&node, &options(NodeHealthStrategy::None)),
            Score::ZERO
        );
    }

    #[test]
    fn migrate_on_red_bans_on_red_only() {
        let red = node_with(&[("#health-disk", "red")]);
        let yellow = node_with(&[("#health-disk", "yellow")]);
        let opts = options(NodeHealthStrategy::MigrateOnRed);
        assert!(node_health_score(&red, &opts).is_ban());
        assert_eq!(node_health_score(&yellow, &opts), Score::ZERO);
    }

    #[test]
    fn only_green_bans_yellow_too() {
        let yellow = node_with(&[("#health-cpu", "yellow")]);
        assert!(node_health_score(&yellow, &options(NodeHealthStrategy::OnlyGreen)).is_ban());
    }

    #[test]
    fn progressive_uses_configured_scores() {
        let node = node_with(&[("#health-a", "yellow"), ("#health-b", "green")]);
        let opts = ClusterOptions {
            node_health_strategy: NodeHealthStrategy::Progressive,
            node_health_yellow: Score::from(-10),
            node_health_green: Score::from(5),
            ..ClusterOptions::default()
        };
        assert_eq!(node_health_score(&node, &opts), Score::from(-5));
    }

    #[test]
    fn raw_scores_pass_through() {
        let node = node_with(&[("#health-net", "-30")]);
        assert_eq!(
            node_health_score(&node, &options(NodeHealthStrategy::Custom)),
            Score::from(-30)
        );
    }

    #[test]
    fn non_health_attributes_do_not_count() {
        let node = node_with(&[("capacity", "red")]);
        assert_eq!(
            node_health_score(&node, &options(NodeHealthStrategy::OnlyGreen)),
            Score::ZERO
        );
    }
}
