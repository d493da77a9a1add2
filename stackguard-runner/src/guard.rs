//! Command guarding: bind command names to absolute executables once, then
//! always run that exact file.
//!
//! Resolution only consults a fixed trusted search path, never the caller's
//! `PATH`, so later changes to the environment cannot redirect a guarded
//! name. Names that the invoking shell would treat as an alias or a builtin
//! are refused because an external-path dispatch could not honour them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use stackguard_config::GuardConfig;
use tracing::{debug, warn};

use crate::error::{GuardError, NotFoundReason};
use crate::executor::{
    CommandExecutor, CommandInvocation, CommandOutput, CommandStatus, ProcessCommandExecutor,
    StdioMode,
};
use crate::state::is_valid_identifier;

/// Builtins of bash whose names are also valid identifiers.
pub const SHELL_BUILTINS: &[&str] = &[
    "alias", "bg", "bind", "break", "builtin", "caller", "cd", "command", "compgen", "complete",
    "compopt", "continue", "declare", "dirs", "disown", "echo", "enable", "eval", "exec", "exit",
    "export", "false", "fc", "fg", "getopts", "hash", "help", "history", "jobs", "kill", "let",
    "local", "logout", "mapfile", "popd", "printf", "pushd", "pwd", "read", "readarray",
    "readonly", "return", "set", "shift", "shopt", "source", "suspend", "test", "times", "trap",
    "true", "type", "typeset", "ulimit", "umask", "unalias", "unset", "wait",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardOptions {
    /// Do not warn when no names are given.
    pub quiet: bool,
}

/// A command name bound to the executable it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedCommand {
    pub name: String,
    pub path: PathBuf,
}

/// Lookup table from command names to absolute executable paths.
#[derive(Clone)]
pub struct CommandGuard {
    search_path: Vec<PathBuf>,
    aliases: HashMap<String, String>,
    table: HashMap<String, PathBuf>,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for CommandGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGuard")
            .field("search_path", &self.search_path)
            .field("guarded", &self.table.len())
            .finish()
    }
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::from_config(&GuardConfig::default())
    }
}

impl CommandGuard {
    pub fn new<I, P>(search_path: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_path: search_path.into_iter().map(Into::into).collect(),
            aliases: HashMap::new(),
            table: HashMap::new(),
            executor: Arc::new(ProcessCommandExecutor::new()),
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.search_path.iter().cloned()).with_aliases(
            config
                .aliases
                .iter()
                .map(|(name, expansion)| (name.clone(), expansion.clone())),
        )
    }

    /// Register aliases defined in the invoking shell.
    pub fn with_aliases<I, K, V>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.aliases
            .extend(aliases.into_iter().map(|(name, expansion)| (name.into(), expansion.into())));
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Resolve and bind every name, or none of them.
    ///
    /// All names are validated and resolved before the table is touched; the
    /// first failure aborts the whole batch.
    pub fn guard<I, S>(
        &mut self,
        names: I,
        options: GuardOptions,
    ) -> Result<Vec<GuardedCommand>, GuardError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved = Vec::new();
        for name in names {
            let name = name.as_ref();
            let path = self.resolve(name)?;
            resolved.push(GuardedCommand {
                name: name.to_owned(),
                path,
            });
        }

        if resolved.is_empty() {
            if !options.quiet {
                warn!("guard called without any command names");
            }
            return Ok(resolved);
        }

        for command in &resolved {
            debug!(name = %command.name, path = %command.path.display(), "guarded command");
            self.table.insert(command.name.clone(), command.path.clone());
        }
        Ok(resolved)
    }

    /// Resolve `name` against the trusted search path without binding it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, GuardError> {
        if !is_valid_identifier(name) {
            return Err(GuardError::InvalidName {
                name: name.to_owned(),
            });
        }

        let not_found = |reason| GuardError::NotFound {
            name: name.to_owned(),
            reason,
        };

        if let Some(expansion) = self.aliases.get(name) {
            return Err(not_found(NotFoundReason::Alias(expansion.clone())));
        }
        if SHELL_BUILTINS.contains(&name) {
            return Err(not_found(NotFoundReason::Builtin));
        }

        let search_path = match std::env::join_paths(&self.search_path) {
            Ok(joined) => joined,
            Err(error) => {
                warn!(%error, "trusted search path cannot be joined");
                return Err(not_found(NotFoundReason::Missing));
            }
        };
        let path = which::which_in(name, Some(search_path), "/")
            .map_err(|_| not_found(NotFoundReason::Missing))?;

        if !path.is_absolute() {
            return Err(not_found(NotFoundReason::NotAbsolute(path)));
        }
        if !is_executable_file(&path) {
            return Err(not_found(NotFoundReason::NotExecutable(path)));
        }
        Ok(path)
    }

    pub fn resolved(&self, name: &str) -> Option<&Path> {
        self.table.get(name).map(PathBuf::as_path)
    }

    pub fn is_guarded(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Forget a guarded name, returning the path it was bound to.
    pub fn unguard(&mut self, name: &str) -> Option<PathBuf> {
        self.table.remove(name)
    }

    /// Guarded names and their paths, sorted by name.
    pub fn guarded(&self) -> Vec<GuardedCommand> {
        let mut commands: Vec<GuardedCommand> = self
            .table
            .iter()
            .map(|(name, path)| GuardedCommand {
                name: name.clone(),
                path: path.clone(),
            })
            .collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    /// Build an invocation of the guarded `name` with `args`.
    pub fn invocation<I, S>(&self, name: &str, args: I) -> Result<CommandInvocation, GuardError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let path = self.table.get(name).ok_or_else(|| GuardError::Unguarded {
            name: name.to_owned(),
        })?;
        Ok(CommandInvocation::new(path.clone()).with_args(args))
    }

    pub fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput, GuardError> {
        self.executor
            .execute(invocation)
            .map_err(|source| GuardError::Spawn {
                path: invocation.program.clone(),
                source,
            })
    }

    /// Run the guarded `name`, capturing its output.
    pub fn invoke<I, S>(&self, name: &str, args: I) -> Result<CommandOutput, GuardError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let invocation = self.invocation(name, args)?;
        self.execute(&invocation)
    }

    /// Run the guarded `name` on the caller's own streams.
    pub fn run<I, S>(&self, name: &str, args: I) -> Result<CommandStatus, GuardError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let invocation = self.invocation(name, args)?.with_stdio(StdioMode::Inherit);
        Ok(self.execute(&invocation)?.status)
    }
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        metadata.is_file()
    }
}
