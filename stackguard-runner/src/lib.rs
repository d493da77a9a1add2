//! Core of stackguard: command guarding and state hand-off for deployment
//! scripts.
//!
//! [`CommandGuard`] resolves external commands once against a trusted
//! search path and only ever spawns the resolved absolute path. The state
//! side ([`Persist`], [`StateSnapshot`], [`restore`]) captures named
//! variables as guarded bash assignments that can be replayed into a later
//! scope without clobbering anything. [`LogChannel`] carries human-visible
//! log lines around code whose stdout is being captured.

pub mod error;
pub mod executor;
#[cfg(unix)]
mod fifo;
pub mod guard;
pub mod log_channel;
pub mod scope;
pub mod sink;
pub mod state;
pub mod stream;

pub use error::{GuardError, NotFoundReason, StateError};
pub use executor::{
    CommandExecutor, CommandInvocation, CommandOutput, CommandStatus, DryRunCommandExecutor,
    ProcessCommandExecutor, StdioMode,
};
pub use guard::{CommandGuard, GuardOptions, GuardedCommand};
#[cfg(unix)]
pub use log_channel::FifoSink;
pub use log_channel::{ForwarderExit, LOG_FIFO_ENV, LogChannel};
pub use scope::{EnvScope, LocalScope, VariableScope};
pub use sink::{LogSink, MemorySink, NoopSink, SharedBuffer, StdoutSink};
pub use state::{
    Persist, RestoreReport, StateEntry, StateSnapshot, apply_text, persist, restore,
};
