use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Reachability checks against the media server host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Echo requests sent by the ping check.
    #[serde(default = "RemoteConfig::default_ping_count")]
    pub ping_count: u32,
    /// Per-reply wait (seconds) passed to `ping -W`.
    #[serde(default = "RemoteConfig::default_ping_wait_secs")]
    pub ping_wait_secs: u32,
    /// `ConnectTimeout` passed to ssh.
    #[serde(default = "RemoteConfig::default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u32,
    #[serde(default = "RemoteConfig::default_ssh_port")]
    pub ssh_port: u16,
    /// Remote login used when none is given on the command line.
    #[serde(default)]
    pub ssh_user: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ping_count: Self::default_ping_count(),
            ping_wait_secs: Self::default_ping_wait_secs(),
            ssh_connect_timeout_secs: Self::default_ssh_connect_timeout_secs(),
            ssh_port: Self::default_ssh_port(),
            ssh_user: None,
        }
    }
}

impl RemoteConfig {
    const fn default_ping_count() -> u32 {
        1
    }

    const fn default_ping_wait_secs() -> u32 {
        1
    }

    const fn default_ssh_connect_timeout_secs() -> u32 {
        5
    }

    const fn default_ssh_port() -> u16 {
        22
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.ping_count > 0, "remote.ping_count must be at least 1");
        ensure!(
            self.ssh_connect_timeout_secs > 0,
            "remote.ssh_connect_timeout_secs must be at least 1"
        );
        ensure!(self.ssh_port > 0, "remote.ssh_port must not be 0");
        Ok(())
    }
}
