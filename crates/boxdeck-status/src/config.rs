use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[status]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// A running component silent for longer than this is demoted to `degraded`.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            liveness_window_secs: default_liveness_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl StatusConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_liveness_window_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: StatusConfig = serde_json::from_str(r#"{"liveness_window_secs": 60}"#).unwrap();
        assert_eq!(config.liveness_window(), Duration::from_secs(60));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn zero_sweep_interval_is_clamped() {
        let config = StatusConfig {
            liveness_window_secs: 1,
            sweep_interval_secs: 0,
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
