use crate::SimError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default fleet size.
pub const DEFAULT_NODES: usize = 2;

/// Default total requests per second across the fleet.
pub const DEFAULT_BASE_RPS: u32 = 1000;

/// Exclusive upper bound of the per-tick jitter added to a node's budget.
pub const DEFAULT_JITTER: u32 = 50;

/// Fleet-wide simulation parameters, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of simulated nodes (at least 1).
    pub nodes: usize,

    /// Total requests per second shared across the fleet.
    pub base_rps: u32,

    /// Jitter bound \( J \); each tick adds a draw from `[0, J)`.
    pub jitter: u32,

    /// How long a node stays out of rotation during a deploy.
    pub deploy_window_secs: u64,

    /// Pause between two nodes of a deploy rotation.
    pub settle_delay_secs: u64,

    /// Upper bound on a single command hand-off.
    pub send_timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODES,
            base_rps: DEFAULT_BASE_RPS,
            jitter: DEFAULT_JITTER,
            deploy_window_secs: 60,
            settle_delay_secs: 15,
            send_timeout_ms: 5_000,
        }
    }
}

impl SimConfig {
    /// Creates a config for `nodes` nodes sharing `base_rps`, other fields defaulted.
    ///
    /// # Errors
    /// Returns an error if `nodes` is zero.
    pub fn new(nodes: usize, base_rps: u32) -> Result<Self, SimError> {
        let config = Self {
            nodes,
            base_rps,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`SimError::Config`] if the file cannot be read or parsed, or
    /// [`SimError::InvalidConfiguration`] if the values are invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SimError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every fleet needs.
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfiguration`] for an empty fleet or a zero jitter bound.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.nodes == 0 {
            return Err(SimError::InvalidConfiguration(
                "fleet needs at least one node".into(),
            ));
        }
        if self.jitter == 0 {
            return Err(SimError::InvalidConfiguration(
                "jitter bound must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Per-node rate when every node is serving.
    pub fn steady_rps(&self) -> u32 {
        self.base_rps / self.nodes.max(1) as u32
    }

    /// Per-node rate when one node is out of rotation.
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfiguration`] for fleets of one node or fewer,
    /// where there is nobody left to take over.
    pub fn takeover_rps(&self) -> Result<u32, SimError> {
        if self.nodes <= 1 {
            return Err(SimError::InvalidConfiguration(format!(
                "cannot redistribute traffic across {} node(s)",
                self.nodes
            )));
        }
        Ok(self.base_rps / (self.nodes - 1) as u32)
    }

    /// Time a node stays out of rotation during a deploy.
    pub fn deploy_window(&self) -> Duration {
        Duration::from_secs(self.deploy_window_secs)
    }

    /// Time between two nodes of a deploy rotation.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Bound on one command hand-off.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let config = SimConfig::new(3, 900).unwrap();
        assert_eq!(config.steady_rps(), 300);
        assert_eq!(config.takeover_rps().unwrap(), 450);

        // Integer division, like the fleet-wide split.
        let config = SimConfig::new(3, 1000).unwrap();
        assert_eq!(config.steady_rps(), 333);
        assert_eq!(config.takeover_rps().unwrap(), 500);
    }

    #[test]
    fn test_single_node_cannot_take_over() {
        let config = SimConfig::new(1, 900).unwrap();
        assert_eq!(config.steady_rps(), 900);
        assert!(matches!(
            config.takeover_rps(),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_empty_fleet() {
        assert!(matches!(
            SimConfig::new(0, 100),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_json_defaults() {
        let config: SimConfig = serde_json::from_str(r#"{"nodes": 4}"#).unwrap();
        assert_eq!(config.nodes, 4);
        assert_eq!(config.base_rps, DEFAULT_BASE_RPS);
        assert_eq!(config.deploy_window(), Duration::from_secs(60));
        assert_eq!(config.settle_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_from_missing_file() {
        let err = SimConfig::from_json_file("/nonexistent/svcsim.json").unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }
}
