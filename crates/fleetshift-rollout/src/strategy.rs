//! Rollout strategies — fleet-wide pod swap or node-grouped migration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetshift_core::RolloutDefaults;

/// How old pods are replaced by new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Create the new workload at full size, then replace old pods one
    /// at a time across the whole fleet.
    FleetWide,
    /// Migrate one node at a time, steering placement with a node label.
    ByNode(ByNodeConfig),
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        Self::FleetWide
    }
}

impl RolloutStrategy {
    pub fn by_node(partition_label: &str) -> Self {
        Self::ByNode(ByNodeConfig {
            partition_label: partition_label.to_string(),
            quarantine_value: None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RolloutStrategy::FleetWide => "fleet-wide",
            RolloutStrategy::ByNode(_) => "by-node",
        }
    }
}

/// Configuration for node-grouped rollouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByNodeConfig {
    /// Node label key whose value routes pods to the old or new workload.
    pub partition_label: String,
    /// Label value parked on a node while it drains. Derived from the
    /// old and new values when unset.
    pub quarantine_value: Option<String>,
}

/// Timing and retry knobs shared by both strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutConfig {
    /// Resync period of convergence waits, even when no event arrives.
    pub poll_interval: Duration,
    /// Budget for each relabel or scale step, conflict retries included.
    pub phase_timeout: Duration,
    /// Budget for old pods to disappear after a delete.
    pub deletion_timeout: Duration,
    /// Budget for new pods to become running and ready.
    pub creation_timeout: Duration,
    /// Grace period passed with every pod delete.
    pub grace_period_secs: u64,
    /// Read-modify-write attempts after the first conflict.
    pub conflict_retries: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self::from(&RolloutDefaults::default())
    }
}

impl From<&RolloutDefaults> for RolloutConfig {
    fn from(defaults: &RolloutDefaults) -> Self {
        Self {
            poll_interval: Duration::from_secs(defaults.poll_interval_secs),
            phase_timeout: Duration::from_secs(defaults.phase_timeout_secs),
            deletion_timeout: Duration::from_secs(defaults.deletion_timeout_secs),
            creation_timeout: Duration::from_secs(defaults.creation_timeout_secs),
            grace_period_secs: defaults.grace_period_secs,
            conflict_retries: defaults.conflict_retries,
        }
    }
}

impl RolloutConfig {
    /// Apply per-request overrides given in seconds; zero keeps the current value.
    pub fn with_overrides(
        mut self,
        poll_interval_secs: u64,
        phase_timeout_secs: u64,
        deletion_timeout_secs: u64,
        creation_timeout_secs: u64,
    ) -> Self {
        let pick = |secs: u64, current: Duration| {
            if secs == 0 {
                current
            } else {
                Duration::from_secs(secs)
            }
        };
        self.poll_interval = pick(poll_interval_secs, self.poll_interval);
        self.phase_timeout = pick(phase_timeout_secs, self.phase_timeout);
        self.deletion_timeout = pick(deletion_timeout_secs, self.deletion_timeout);
        self.creation_timeout = pick(creation_timeout_secs, self.creation_timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fleet_wide() {
        assert_eq!(RolloutStrategy::default(), RolloutStrategy::FleetWide);
        assert_eq!(RolloutStrategy::default().name(), "fleet-wide");
    }

    #[test]
    fn default_config_uses_rollout_defaults() {
        let cfg = RolloutConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(3));
        assert_eq!(cfg.phase_timeout, Duration::from_secs(300));
        assert_eq!(cfg.deletion_timeout, Duration::from_secs(600));
        assert_eq!(cfg.creation_timeout, Duration::from_secs(900));
        assert_eq!(cfg.conflict_retries, 5);
    }

    #[test]
    fn zero_overrides_keep_defaults() {
        let cfg = RolloutConfig::default().with_overrides(1, 0, 0, 60);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.phase_timeout, Duration::from_secs(300));
        assert_eq!(cfg.deletion_timeout, Duration::from_secs(600));
        assert_eq!(cfg.creation_timeout, Duration::from_secs(60));
    }

    #[test]
    fn serde_roundtrip() {
        let s = RolloutStrategy::by_node("web_version");
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"kind\":\"by_node\""));
        let back: RolloutStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
