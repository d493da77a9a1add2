use anyhow::{Result, ensure};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Search path consulted when resolving guarded commands. The inherited
/// `PATH` is never used for resolution.
pub const DEFAULT_TRUSTED_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Command guard settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardConfig {
    /// Directories searched, in order, when resolving a command name.
    #[serde(default = "GuardConfig::default_search_path")]
    pub search_path: Vec<PathBuf>,
    /// Shell aliases active in the invoking shell (`name = "expansion"`).
    /// Guarding an aliased name is refused.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Suppress the warning emitted when `guard` receives no names.
    #[serde(default)]
    pub quiet: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            search_path: Self::default_search_path(),
            aliases: HashMap::new(),
            quiet: false,
        }
    }
}

impl GuardConfig {
    fn default_search_path() -> Vec<PathBuf> {
        DEFAULT_TRUSTED_PATH.split(':').map(PathBuf::from).collect()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.search_path.is_empty(),
            "guard.search_path must list at least one directory"
        );
        for dir in &self.search_path {
            ensure!(
                dir.is_absolute(),
                "guard.search_path entry '{}' must be an absolute path",
                dir.display()
            );
        }
        Ok(())
    }
}
