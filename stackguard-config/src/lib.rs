//! Configuration for the stackguard helpers.
//!
//! Every section has sensible defaults so an absent `stackguard.toml`
//! yields a usable configuration. Values are validated after parsing
//! so the runtime crates can rely on them (absolute search directories,
//! non-zero poll intervals, and so on).

pub mod guard;
pub mod loader;
pub mod log_channel;
pub mod remote;
pub mod state;

pub use guard::{DEFAULT_TRUSTED_PATH, GuardConfig};
pub use loader::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, StackguardConfig};
pub use log_channel::LogChannelConfig;
pub use remote::RemoteConfig;
pub use state::StateConfig;
