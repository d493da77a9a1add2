use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Collect stdout and stderr into the returned [`CommandOutput`].
    #[default]
    Capture,
    /// Share the parent's streams so output appears as if run directly.
    Inherit,
}

/// Describes a command that will be executed by a [`CommandExecutor`].
///
/// `program` is always an absolute path; executors never search `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub stdio: StdioMode,
}

impl CommandInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            stdio: StdioMode::Capture,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }
}

/// Describes the exit status of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    success: bool,
    code: Option<i32>,
}

impl CommandStatus {
    pub fn new(success: bool, code: Option<i32>) -> Self {
        Self { success, code }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        let code = status.code();
        Self {
            success: status.success(),
            code,
        }
    }
}

/// Output produced by the executor for a command invocation.
///
/// With [`StdioMode::Inherit`] both text fields stay empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::new(true, Some(0)),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Trait implemented by concrete command execution strategies.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, invocation: &CommandInvocation) -> io::Result<CommandOutput>;
}

/// Spawns the program directly with [`std::process::Command`], no shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl ProcessCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(&self, invocation: &CommandInvocation) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        debug!(program = %invocation.program.display(), args = ?invocation.args, "spawning guarded command");

        match invocation.stdio {
            StdioMode::Inherit => {
                let status = cmd
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()?;
                Ok(CommandOutput {
                    status: CommandStatus::from(status),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            StdioMode::Capture => {
                let output = cmd.stdin(Stdio::null()).output()?;
                Ok(CommandOutput {
                    status: CommandStatus::from(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            }
        }
    }
}

/// Records invocations instead of running them.
#[derive(Debug, Default, Clone)]
pub struct DryRunCommandExecutor {
    log: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl DryRunCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged_invocations(&self) -> Vec<CommandInvocation> {
        self.log.lock().clone()
    }
}

impl CommandExecutor for DryRunCommandExecutor {
    fn execute(&self, invocation: &CommandInvocation) -> io::Result<CommandOutput> {
        self.log.lock().push(invocation.clone());
        Ok(CommandOutput::success(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_records_invocations_in_order() {
        let executor = DryRunCommandExecutor::new();
        let first = CommandInvocation::new("/bin/ls").with_args(["-l"]);
        let second = CommandInvocation::new("/bin/date").with_env("TZ", "UTC");

        executor.execute(&first).unwrap();
        executor.execute(&second).unwrap();

        assert_eq!(executor.logged_invocations(), vec![first, second]);
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_captures_output_and_status() {
        let output = ProcessCommandExecutor::new()
            .execute(
                &CommandInvocation::new("/bin/sh")
                    .with_args(["-c", "printf '%s' \"$GREETING\"; exit 3"])
                    .with_env("GREETING", "hi there"),
            )
            .unwrap();

        assert_eq!(output.stdout, "hi there");
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let result = ProcessCommandExecutor::new()
            .execute(&CommandInvocation::new("/nonexistent/stackguard-test-binary"));
        assert!(result.is_err());
    }
}
