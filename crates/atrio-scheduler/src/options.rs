//! Cluster-wide options.
//!
//! Options arrive as a flat string map from the configuration document's
//! property set and are parsed once into a typed struct with defaults.
//! Unknown keys are preserved-but-ignored so that newer configuration
//! schemas remain loadable.

use std::collections::BTreeMap;

use atrio_core::{DiagnosticLog, Score};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// What to do with resources when the partition has lost quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NoQuorumPolicy {
    /// Stop all resources in the affected partition.
    #[default]
    Stop,
    /// Keep running resources but start nothing new.
    Freeze,
    /// Carry on as if quorum were held.
    Ignore,
    /// Demote promoted instances and stop everything else.
    Demote,
    /// Fence every node in the affected partition.
    Suicide,
}

/// How node health attributes influence placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeHealthStrategy {
    /// Ignore health attributes entirely.
    #[default]
    None,
    /// A single red attribute bans the node; yellow and green are neutral.
    MigrateOnRed,
    /// Any non-green attribute bans the node.
    OnlyGreen,
    /// Sum the per-color scores of all health attributes.
    Progressive,
    /// Health attributes already hold raw scores; sum them as-is.
    Custom,
}

/// The global placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// Ignore utilization; scores alone decide.
    #[default]
    Default,
    /// Enforce capacity and prefer the node with the most allocations.
    Utilization,
    /// Enforce capacity and pack onto as few nodes as possible.
    Minimal,
    /// Enforce capacity and spread across nodes.
    Balanced,
}

impl PlacementStrategy {
    /// Returns true if node capacity limits placement.
    #[must_use]
    pub fn tracks_capacity(self) -> bool {
        self != Self::Default
    }
}

/// Typed cluster options with defaults.
///
/// All durations are parsed from the usual time-spec syntax
/// (`"90"`, `"90s"`, `"5min"`, `"2h"`, `"500ms"`).
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Behavior on quorum loss.
    pub no_quorum_policy: NoQuorumPolicy,
    /// If true, resources may run anywhere by default.
    pub symmetric_cluster: bool,
    /// If true, no resource actions are scheduled at all.
    pub maintenance_mode: bool,
    /// If true, one failed start bans the resource from that node.
    pub start_failure_is_fatal: bool,
    /// Whether fencing is configured and may be scheduled.
    pub stonith_enabled: bool,
    /// Whether multiple fence actions may run concurrently.
    pub concurrent_fencing: bool,
    /// Delay applied to fencing the highest-priority node.
    pub priority_fencing_delay: Duration,
    /// How `#health-*` node attributes influence placement.
    pub node_health_strategy: NodeHealthStrategy,
    /// Score contributed by a red health attribute (progressive strategy).
    pub node_health_red: Score,
    /// Score contributed by a yellow health attribute.
    pub node_health_yellow: Score,
    /// Score contributed by a green health attribute.
    pub node_health_green: Score,
    /// The global placement strategy.
    pub placement_strategy: PlacementStrategy,
    /// Maximum actions the transition may execute in parallel (0 = unlimited).
    pub batch_limit: u32,
    /// Maximum concurrent live migrations (-1 = unlimited).
    pub migration_limit: i32,
    /// Whether resources on a cleanly shut down node stay locked to it.
    pub shutdown_lock: bool,
    /// How long a shutdown lock lasts (zero = forever).
    pub shutdown_lock_limit: Duration,
    /// How often to re-run the scheduler without a triggering event.
    pub cluster_recheck_interval: Duration,
    /// How long the controller waits for a DC response before giving up.
    pub dc_deadtime: Duration,
    /// Election timeout before declaring the vote failed.
    pub election_timeout: Duration,
    /// Watchdog timeout used for self-fencing setups.
    pub stonith_watchdog_timeout: Duration,
    /// Whether unknown resource state is probed before starting anything.
    pub enable_startup_probes: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            no_quorum_policy: NoQuorumPolicy::Stop,
            symmetric_cluster: true,
            maintenance_mode: false,
            start_failure_is_fatal: true,
            stonith_enabled: true,
            concurrent_fencing: false,
            priority_fencing_delay: Duration::zero(),
            node_health_strategy: NodeHealthStrategy::None,
            node_health_red: Score::NEG_INFINITY,
            node_health_yellow: Score::ZERO,
            node_health_green: Score::ZERO,
            placement_strategy: PlacementStrategy::Default,
            batch_limit: 0,
            migration_limit: -1,
            shutdown_lock: false,
            shutdown_lock_limit: Duration::zero(),
            cluster_recheck_interval: Duration::minutes(15),
            dc_deadtime: Duration::seconds(20),
            election_timeout: Duration::minutes(2),
            stonith_watchdog_timeout: Duration::zero(),
            enable_startup_probes: true,
        }
    }
}

impl ClusterOptions {
    /// Parses options from the configuration property map.
    ///
    /// Unparseable values fall back to the default for that option with a
    /// config-error diagnostic; unknown keys are ignored at trace level.
    #[must_use]
    pub fn from_properties(
        properties: &BTreeMap<String, String>,
        log: &mut DiagnosticLog,
    ) -> Self {
        let mut opts = Self::default();

        for (name, value) in properties {
            let ok = match name.as_str() {
                "no-quorum-policy" => match value.as_str() {
                    "stop" => set(&mut opts.no_quorum_policy, NoQuorumPolicy::Stop),
                    "freeze" => set(&mut opts.no_quorum_policy, NoQuorumPolicy::Freeze),
                    "ignore" => set(&mut opts.no_quorum_policy, NoQuorumPolicy::Ignore),
                    "demote" => set(&mut opts.no_quorum_policy, NoQuorumPolicy::Demote),
                    "suicide" => set(&mut opts.no_quorum_policy, NoQuorumPolicy::Suicide),
                    _ => false,
                },
                "symmetric-cluster" => parse_bool_into(value, &mut opts.symmetric_cluster),
                "maintenance-mode" => parse_bool_into(value, &mut opts.maintenance_mode),
                "start-failure-is-fatal" => {
                    parse_bool_into(value, &mut opts.start_failure_is_fatal)
                }
                "stonith-enabled" => parse_bool_into(value, &mut opts.stonith_enabled),
                "concurrent-fencing" => parse_bool_into(value, &mut opts.concurrent_fencing),
                "priority-fencing-delay" => {
                    parse_duration_into(value, &mut opts.priority_fencing_delay)
                }
                "node-health-strategy" => match value.as_str() {
                    "none" => set(&mut opts.node_health_strategy, NodeHealthStrategy::None),
                    "migrate-on-red" => set(
                        &mut opts.node_health_strategy,
                        NodeHealthStrategy::MigrateOnRed,
                    ),
                    "only-green" => set(
                        &mut opts.node_health_strategy,
                        NodeHealthStrategy::OnlyGreen,
                    ),
                    "progressive" => set(
                        &mut opts.node_health_strategy,
                        NodeHealthStrategy::Progressive,
                    ),
                    "custom" => set(&mut opts.node_health_strategy, NodeHealthStrategy::Custom),
                    _ => false,
                },
                "node-health-red" => parse_score_into(value, &mut opts.node_health_red),
                "node-health-yellow" => parse_score_into(value, &mut opts.node_health_yellow),
                "node-health-green" => parse_score_into(value, &mut opts.node_health_green),
                "placement-strategy" => match value.as_str() {
                    "default" => set(&mut opts.placement_strategy, PlacementStrategy::Default),
                    "utilization" => {
                        set(&mut opts.placement_strategy, PlacementStrategy::Utilization)
                    }
                    "minimal" => set(&mut opts.placement_strategy, PlacementStrategy::Minimal),
                    "balanced" => set(&mut opts.placement_strategy, PlacementStrategy::Balanced),
                    _ => false,
                },
                "batch-limit" => value
                    .parse::<u32>()
                    .map(|v| set(&mut opts.batch_limit, v))
                    .unwrap_or(false),
                "migration-limit" => value
                    .parse::<i32>()
                    .map(|v| set(&mut opts.migration_limit, v))
                    .unwrap_or(false),
                "shutdown-lock" => parse_bool_into(value, &mut opts.shutdown_lock),
                "shutdown-lock-limit" => {
                    parse_duration_into(value, &mut opts.shutdown_lock_limit)
                }
                "cluster-recheck-interval" => {
                    parse_duration_into(value, &mut opts.cluster_recheck_interval)
                }
                "dc-deadtime" => parse_duration_into(value, &mut opts.dc_deadtime),
                "election-timeout" => parse_duration_into(value, &mut opts.election_timeout),
                "stonith-watchdog-timeout" => {
                    parse_duration_into(value, &mut opts.stonith_watchdog_timeout)
                }
                "enable-startup-probes" => {
                    parse_bool_into(value, &mut opts.enable_startup_probes)
                }
                _ => {
                    log.trace(format!("ignoring unrecognized cluster option '{name}'"));
                    true
                }
            };

            if !ok {
                log.config_error(format!(
                    "invalid value '{value}' for cluster option '{name}'; using default"
                ));
            }
        }

        opts
    }
}

fn set<T>(slot: &mut T, value: T) -> bool {
    *slot = value;
    true
}

fn parse_bool_into(value: &str, slot: &mut bool) -> bool {
    match parse_bool(value) {
        Some(v) => set(slot, v),
        None => false,
    }
}

fn parse_score_into(value: &str, slot: &mut Score) -> bool {
    match value.parse::<Score>() {
        Ok(v) => set(slot, v),
        Err(_) => false,
    }
}

fn parse_duration_into(value: &str, slot: &mut Duration) -> bool {
    match parse_duration(value) {
        Some(v) => set(slot, v),
        None => false,
    }
}

/// Parses the usual boolean spellings.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parses a time-spec string into a duration.
///
/// A bare number is seconds. Supported suffixes: `ms`, `s`/`sec`,
/// `m`/`min`, `h`/`hr`.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let split = trimmed.find(|c: char| !c.is_ascii_digit())?;
    // All digits: bare seconds.
    if split == 0 {
        return None;
    }
    let number: i64 = trimmed[..split].parse().ok()?;
    match trimmed[split..].trim() {
        "ms" | "msec" => Some(Duration::milliseconds(number)),
        "s" | "sec" | "seconds" => Some(Duration::seconds(number)),
        "m" | "min" | "minutes" => Some(Duration::minutes(number)),
        "h" | "hr" | "hours" => Some(Duration::hours(number)),
        _ => None,
    }
}

/// Parses a time-spec or bare-seconds string.
#[must_use]
pub fn parse_duration_or_seconds(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
        return trimmed.parse::<i64>().ok().map(Duration::seconds);
    }
    parse_duration(trimmed)
}

/// Parses an operation interval into milliseconds.
#[must_use]
pub fn parse_interval_ms(value: &str) -> Option<u32> {
    let duration = parse_duration_or_seconds(value)?;
    u32::try_from(duration.num_milliseconds()).ok()
}
