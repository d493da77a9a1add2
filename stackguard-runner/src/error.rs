//! Typed failures of the guard and state modules.
//!
//! Each variant maps onto a stable exit status so shell callers can branch
//! on the failure class without parsing messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit status for failures without a dedicated code.
pub const EXIT_FAILURE: u8 = 1;
/// A command or variable name is not a valid identifier.
pub const EXIT_INVALID_NAME: u8 = 2;
/// A command could not be resolved to a guarded executable.
pub const EXIT_NOT_FOUND: u8 = 3;
/// A persisted name collides with internal bookkeeping names.
pub const EXIT_RESERVED_NAME: u8 = 4;
/// A persisted name already has a value in the prior state.
pub const EXIT_NAME_COLLISION: u8 = 5;
/// More than one prior state was supplied to a single persist call.
pub const EXIT_MULTIPLE_STATE_INPUTS: u8 = 6;
/// The output variable is not declared in the receiving scope.
pub const EXIT_UNDECLARED_TARGET: u8 = 7;

/// Why a command name could not be guarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The name is an alias in the invoking shell.
    Alias(String),
    /// The name is a shell builtin.
    Builtin,
    /// No executable with that name exists on the trusted search path.
    Missing,
    NotAbsolute(PathBuf),
    NotExecutable(PathBuf),
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alias(expansion) => write!(f, "a shell alias for '{expansion}'"),
            Self::Builtin => f.write_str("a shell builtin"),
            Self::Missing => f.write_str("not found on the trusted search path"),
            Self::NotAbsolute(path) => {
                write!(f, "resolved to a relative path '{}'", path.display())
            }
            Self::NotExecutable(path) => {
                write!(f, "resolved to '{}' which is not executable", path.display())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("guard: invalid command name '{name}'")]
    InvalidName { name: String },

    #[error("guard: '{name}' is {reason}")]
    NotFound { name: String, reason: NotFoundReason },

    #[error("guard: '{name}' has not been guarded")]
    Unguarded { name: String },

    #[error("guard: failed to run '{}': {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GuardError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidName { .. } => EXIT_INVALID_NAME,
            Self::NotFound { .. } | Self::Unguarded { .. } => EXIT_NOT_FOUND,
            Self::Spawn { .. } => EXIT_FAILURE,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("persist: invalid variable name '{name}'")]
    InvalidName { name: String },

    #[error("persist: '{name}' is reserved for internal use")]
    ReservedName { name: String },

    #[error("persist: '{name}' is already present in the state with value {existing:?}")]
    NameCollision { name: String, existing: String },

    #[error("persist: value of '{name}' is not valid UTF-8")]
    UnrepresentableValue { name: String },

    #[error("persist: only one prior state may be supplied")]
    MultipleStateInputs,

    #[error("persist: output variable '{name}' is not declared in the receiving scope")]
    UndeclaredTarget { name: String },

    #[error("persist: prior state is corrupt: {reason}")]
    CorruptState { reason: String },

    #[error("persist: prior state could not be inspected within {budget_ms}ms")]
    ProbeTimeout { budget_ms: u128 },

    #[error("restore: '{name}' is already set")]
    SlotOccupied { name: String },
}

impl StateError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidName { .. } => EXIT_INVALID_NAME,
            Self::ReservedName { .. } => EXIT_RESERVED_NAME,
            Self::NameCollision { .. } | Self::CorruptState { .. } | Self::ProbeTimeout { .. } => {
                EXIT_NAME_COLLISION
            }
            Self::MultipleStateInputs => EXIT_MULTIPLE_STATE_INPUTS,
            Self::UndeclaredTarget { .. } => EXIT_UNDECLARED_TARGET,
            Self::SlotOccupied { .. } | Self::UnrepresentableValue { .. } => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_name_the_condition() {
        let alias = GuardError::NotFound {
            name: "ll".into(),
            reason: NotFoundReason::Alias("ls -l".into()),
        };
        assert_eq!(alias.to_string(), "guard: 'll' is a shell alias for 'ls -l'");

        let builtin = GuardError::NotFound {
            name: "cd".into(),
            reason: NotFoundReason::Builtin,
        };
        assert_eq!(builtin.to_string(), "guard: 'cd' is a shell builtin");
        assert_eq!(builtin.exit_code(), EXIT_NOT_FOUND);
    }

    #[test]
    fn prior_state_failures_share_the_collision_code() {
        let corrupt = StateError::CorruptState {
            reason: "unexpected input".into(),
        };
        let timeout = StateError::ProbeTimeout { budget_ms: 1_000 };
        assert_eq!(corrupt.exit_code(), EXIT_NAME_COLLISION);
        assert_eq!(timeout.exit_code(), EXIT_NAME_COLLISION);
        assert_eq!(StateError::MultipleStateInputs.exit_code(), 6);
    }

    #[test]
    fn collision_message_stays_on_one_line() {
        let err = StateError::NameCollision {
            name: "motd".into(),
            existing: "line one\nline two".into(),
        };
        let message = err.to_string();
        assert_eq!(message.lines().count(), 1);
        assert!(message.ends_with(r#"value "line one\nline two""#));
    }
}
