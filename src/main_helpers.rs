use anyhow::{Context, Result};
use std::path::Path;

use stackguard_config::StackguardConfig;

const DEFAULT_LOG_FILTER: &str = "warn";

/// Install the stderr subscriber. `RUST_LOG` wins over the default filter.
pub(crate) fn initialize_tracing() {
    use tracing_subscriber::{EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; skipping setup");
    }
}

pub(crate) fn load_config(explicit: Option<&Path>) -> Result<StackguardConfig> {
    if let Some(path) = explicit {
        return StackguardConfig::load_from_file(path);
    }
    let workspace = std::env::current_dir().context("Failed to determine current directory")?;
    StackguardConfig::load(workspace)
}
