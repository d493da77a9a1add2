use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stackguard::remote::{self, RemoteError, RemoteTarget};
use stackguard_config::StackguardConfig;
use stackguard_runner::error::EXIT_FAILURE;
use stackguard_runner::log_channel::{self, LOG_FIFO_ENV};
#[cfg(unix)]
use stackguard_runner::FifoSink;
use stackguard_runner::{
    CommandGuard, DryRunCommandExecutor, EnvScope, GuardOptions, LogChannel, LogSink, Persist,
    StateSnapshot, StdioMode, restore,
};
use tracing::debug;

use crate::main_helpers::load_config;

#[derive(Debug, Parser)]
#[command(
    name = "stackguard",
    version,
    about = "Guarded command runner and state hand-off for deployment scripts"
)]
pub struct Cli {
    /// Configuration file (defaults to ./stackguard.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve commands on the trusted search path and print their paths
    Resolve {
        /// Do not warn when no names are given
        #[arg(short, long)]
        quiet: bool,
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Run a guarded command by its resolved absolute path
    Exec {
        /// Print the resolved invocation instead of running it
        #[arg(long)]
        dry_run: bool,
        name: String,
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Print a restorable snippet for the named environment variables
    Persist {
        /// Existing snippet to extend
        #[arg(long, value_name = "TEXT")]
        append: Option<String>,
        /// File holding an existing snippet to extend
        #[arg(long, value_name = "PATH")]
        append_file: Option<PathBuf>,
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Validate a snippet and print it back for `eval`
    Restore { snippet: String },

    /// Check DNS, ping and ssh reachability of a host
    CheckHost {
        host: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Stop after the ping check
        #[arg(long)]
        skip_ssh: bool,
    },
}

pub async fn run(args: Cli) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Resolve { quiet, names } => handle_resolve(&config, quiet, &names),
        Commands::Exec {
            dry_run,
            name,
            args,
        } => handle_exec(&config, dry_run, &name, args).await,
        Commands::Persist {
            append,
            append_file,
            names,
        } => handle_persist(&config, append, append_file, names),
        Commands::Restore { snippet } => handle_restore(&config, &snippet),
        Commands::CheckHost {
            host,
            user,
            port,
            skip_ssh,
        } => {
            let mut target = RemoteTarget::new(host);
            target.user = user;
            target.port = port;
            handle_check_host(&config, &target, skip_ssh).await
        }
    }
}

fn guard_options(config: &StackguardConfig, quiet: bool) -> GuardOptions {
    GuardOptions {
        quiet: quiet || config.guard.quiet,
    }
}

fn handle_resolve(config: &StackguardConfig, quiet: bool, names: &[String]) -> Result<ExitCode> {
    let mut guard = CommandGuard::from_config(&config.guard);
    for command in guard.guard(names, guard_options(config, quiet))? {
        println!("{}\t{}", command.name, command.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_exec(
    config: &StackguardConfig,
    dry_run: bool,
    name: &str,
    args: Vec<String>,
) -> Result<ExitCode> {
    let mut guard = CommandGuard::from_config(&config.guard);
    guard.guard([name], guard_options(config, false))?;

    if dry_run {
        let executor = Arc::new(DryRunCommandExecutor::new());
        let guard = guard.with_executor(executor.clone());
        guard.invoke(name, args)?;
        for invocation in executor.logged_invocations() {
            let mut words = vec![invocation.program.display().to_string()];
            words.extend(
                invocation
                    .args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            );
            println!("{}", shell_words::join(words));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut invocation = guard
        .invocation(name, args)?
        .with_stdio(StdioMode::Inherit);
    // A parent stackguard already owns the channel; the child inherits its FIFO.
    let channel = if inherited_fifo().is_some() {
        None
    } else {
        Some(start_channel(config)?)
    };
    if let Some(fifo) = channel.as_ref().and_then(|channel| channel.fifo_path()) {
        invocation = invocation.with_env(LOG_FIFO_ENV, fifo);
    }

    let result = tokio::task::block_in_place(|| guard.execute(&invocation));
    if channel.is_some() {
        log_channel::teardown().await;
    }

    let status = result?.status;
    let code = status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(EXIT_FAILURE);
    Ok(ExitCode::from(code))
}

fn handle_persist(
    config: &StackguardConfig,
    append: Option<String>,
    append_file: Option<PathBuf>,
    names: Vec<String>,
) -> Result<ExitCode> {
    let mut persist = Persist::from_config(&config.state).names(names);
    if let Some(text) = append {
        persist = persist.append_text(text);
    }
    if let Some(path) = append_file {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snippet file: {}", path.display()))?;
        persist = persist.append_text(text);
    }

    let snapshot = persist.collect(&EnvScope::capture())?;
    if !snapshot.is_empty() {
        println!("{snapshot}");
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_restore(config: &StackguardConfig, snippet: &str) -> Result<ExitCode> {
    StateSnapshot::parse(snippet, config.state.probe_timeout())?;
    let text = restore(snippet).trim_end();
    if !text.is_empty() {
        println!("{text}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_check_host(
    config: &StackguardConfig,
    target: &RemoteTarget,
    skip_ssh: bool,
) -> Result<ExitCode> {
    let mut guard = CommandGuard::from_config(&config.guard);
    let tools: &[&str] = if skip_ssh { &["ping"] } else { &["ping", "ssh"] };
    guard.guard(tools, guard_options(config, false))?;

    if let Some(sink) = inherited_fifo() {
        check_host(config, target, skip_ssh, &guard, &sink).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let channel = start_channel(config)?;
    let outcome = check_host(config, target, skip_ssh, &guard, channel.as_ref()).await;
    log_channel::teardown().await;
    outcome?;
    Ok(ExitCode::SUCCESS)
}

async fn check_host(
    config: &StackguardConfig,
    target: &RemoteTarget,
    skip_ssh: bool,
    guard: &CommandGuard,
    sink: &dyn LogSink,
) -> Result<(), RemoteError> {
    let session = remote::open_session(target, guard, sink, &config.remote).await?;
    if !skip_ssh {
        remote::check_ssh(&session, guard, sink, &config.remote)?;
    }
    sink.log_line(&format!("host {} ok", target.host));
    Ok(())
}

fn start_channel(config: &StackguardConfig) -> Result<Arc<LogChannel>> {
    log_channel::install(&config.log_channel, Box::new(std::io::stdout()))
        .context("Failed to start the log channel")
}

#[cfg(unix)]
fn inherited_fifo() -> Option<FifoSink> {
    let sink = FifoSink::from_env()?;
    debug!("logging through the inherited fifo");
    Some(sink)
}

#[cfg(not(unix))]
fn inherited_fifo() -> Option<stackguard_runner::NoopSink> {
    None
}
