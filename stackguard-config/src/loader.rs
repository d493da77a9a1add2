use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::guard::GuardConfig;
use crate::log_channel::LogChannelConfig;
use crate::remote::RemoteConfig;
use crate::state::StateConfig;

/// File looked up in the working directory when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "stackguard.toml";

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "STACKGUARD_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StackguardConfig {
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub log_channel: LogChannelConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl StackguardConfig {
    /// Load configuration from the default locations.
    ///
    /// Precedence: `STACKGUARD_CONFIG_PATH`, then `stackguard.toml` in
    /// `workspace`, then built-in defaults.
    pub fn load(workspace: impl AsRef<Path>) -> Result<Self> {
        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_file(trimmed).with_context(|| {
                    format!("Failed to load configuration from {CONFIG_PATH_ENV}={trimmed}")
                });
            }
        }

        let candidate = workspace.as_ref().join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Self::load_from_file(&candidate);
        }

        debug!("no {CONFIG_FILE_NAME} found; using built-in defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.guard.validate()?;
        self.log_channel.validate()?;
        self.state.validate()?;
        self.remote.validate()?;
        Ok(())
    }

    /// Path that [`StackguardConfig::load`] would read for `workspace`, if any.
    pub fn resolve_path(workspace: impl AsRef<Path>) -> Option<PathBuf> {
        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        let candidate = workspace.as_ref().join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn empty_document_yields_defaults() {
        let config = StackguardConfig::from_toml_str("").expect("defaults should parse");
        assert_eq!(config.log_channel.idle_limit, 5);
        assert_eq!(config.log_channel.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.state.probe_timeout(), Duration::from_secs(1));
        assert_eq!(config.remote.ssh_port, 22);
        assert!(config.guard.aliases.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config = StackguardConfig::from_toml_str(
            r#"
[guard]
search_path = ["/opt/tools/bin", "/usr/bin"]
quiet = true

[guard.aliases]
ll = "ls -l"

[log_channel]
poll_interval_ms = 250
idle_limit = 2
"#,
        )
        .expect("config should parse");

        assert_eq!(
            config.guard.search_path,
            vec![PathBuf::from("/opt/tools/bin"), PathBuf::from("/usr/bin")]
        );
        assert!(config.guard.quiet);
        assert_eq!(config.guard.aliases.get("ll").map(String::as_str), Some("ls -l"));
        assert_eq!(config.log_channel.poll_interval_ms, 250);
        assert_eq!(config.log_channel.idle_limit, 2);
        assert_eq!(config.log_channel.max_line_bytes, 8_192);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = StackguardConfig::from_toml_str("[log_channel]\nidle_limit = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("idle_limit"));

        let err = StackguardConfig::from_toml_str("[guard]\nsearch_path = [\"bin\"]\n").unwrap_err();
        assert!(format!("{err:#}").contains("absolute"));
    }

    #[test]
    #[serial]
    fn load_prefers_workspace_file() -> Result<()> {
        // SAFETY: serialised with the other environment-touching tests.
        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };
        let workspace = TempDir::new()?;
        fs::write(
            workspace.path().join(CONFIG_FILE_NAME),
            "[state]\nprobe_timeout_ms = 250\n",
        )?;

        let config = StackguardConfig::load(workspace.path())?;
        assert_eq!(config.state.probe_timeout_ms, 250);
        assert_eq!(
            StackguardConfig::resolve_path(workspace.path()),
            Some(workspace.path().join(CONFIG_FILE_NAME))
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn load_falls_back_to_defaults() -> Result<()> {
        // SAFETY: serialised with the other environment-touching tests.
        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };
        let workspace = TempDir::new()?;
        let config = StackguardConfig::load(workspace.path())?;
        assert_eq!(config.state.probe_timeout_ms, 1_000);
        assert_eq!(StackguardConfig::resolve_path(workspace.path()), None);
        Ok(())
    }

    #[test]
    #[serial]
    fn env_path_takes_precedence() -> Result<()> {
        let workspace = TempDir::new()?;
        let explicit = workspace.path().join("custom.toml");
        fs::write(&explicit, "[remote]\nssh_port = 2222\n")?;
        fs::write(
            workspace.path().join(CONFIG_FILE_NAME),
            "[remote]\nssh_port = 2200\n",
        )?;

        // SAFETY: serialised with the other environment-touching tests.
        unsafe { std::env::set_var(CONFIG_PATH_ENV, &explicit) };
        let loaded = StackguardConfig::load(workspace.path());
        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };

        assert_eq!(loaded?.remote.ssh_port, 2222);
        Ok(())
    }
}
