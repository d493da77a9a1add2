use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// State persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// Time budget (milliseconds) for probing a prior snippet for collisions.
    #[serde(default = "StateConfig::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: Self::default_probe_timeout_ms(),
        }
    }
}

impl StateConfig {
    const fn default_probe_timeout_ms() -> u64 {
        1_000
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.probe_timeout_ms > 0,
            "state.probe_timeout_ms must be greater than zero"
        );
        Ok(())
    }
}
