use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log channel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogChannelConfig {
    /// Bounded wait (milliseconds) for each read attempt of the forwarder.
    #[serde(default = "LogChannelConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive empty polls after which the forwarder exits on its own.
    #[serde(default = "LogChannelConfig::default_idle_limit")]
    pub idle_limit: u32,
    /// Lines read from the FIFO are truncated to this many bytes.
    #[serde(default = "LogChannelConfig::default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Expose a named pipe that child processes may write log lines into.
    #[serde(default = "LogChannelConfig::default_fifo")]
    pub fifo: bool,
}

impl Default for LogChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            idle_limit: Self::default_idle_limit(),
            max_line_bytes: Self::default_max_line_bytes(),
            fifo: Self::default_fifo(),
        }
    }
}

impl LogChannelConfig {
    const fn default_poll_interval_ms() -> u64 {
        1_000
    }

    const fn default_idle_limit() -> u32 {
        5
    }

    const fn default_max_line_bytes() -> usize {
        8_192
    }

    const fn default_fifo() -> bool {
        cfg!(unix)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.poll_interval_ms > 0,
            "log_channel.poll_interval_ms must be greater than zero"
        );
        ensure!(
            self.idle_limit > 0,
            "log_channel.idle_limit must be at least 1"
        );
        ensure!(
            self.max_line_bytes >= 64,
            "log_channel.max_line_bytes must be at least 64"
        );
        Ok(())
    }
}
