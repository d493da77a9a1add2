//! Reachability checks for the media server host.
//!
//! [`open_session`] resolves and pings the host and hands the result on as a
//! [`StateSnapshot`]; [`check_ssh`] restores that snapshot into its own scope
//! and attempts a non-interactive login. Both run external tools only through
//! a [`CommandGuard`] and report progress through a [`LogSink`].

use std::io;
use std::net::IpAddr;

use stackguard_config::RemoteConfig;
use stackguard_runner::error::{EXIT_FAILURE, GuardError, StateError};
use stackguard_runner::{CommandGuard, LocalScope, LogSink, Persist, StateSnapshot, VariableScope};
use thiserror::Error;
use tracing::debug;

pub const EXIT_DNS_FAILED: u8 = 20;
pub const EXIT_UNREACHABLE: u8 = 21;
pub const EXIT_SSH_FAILED: u8 = 22;

/// Bindings carried from [`open_session`] to [`check_ssh`].
pub const SESSION_STATE_NAMES: [&str; 4] =
    ["remote_host", "remote_addr", "remote_user", "remote_port"];

/// Host to check, with optional overrides for the configured login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("dns: could not resolve '{host}'")]
    DnsFailed {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("ping: '{host}' ({addr}) did not answer")]
    Unreachable { host: String, addr: IpAddr },

    #[error("ssh: login to '{destination}' failed{}", exit_suffix(.code))]
    SshFailed {
        destination: String,
        code: Option<i32>,
    },

    #[error("session state is missing '{name}'")]
    IncompleteSession { name: String },

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    State(#[from] StateError),
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|code| format!(" with exit code {code}"))
        .unwrap_or_default()
}

impl RemoteError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DnsFailed { .. } => EXIT_DNS_FAILED,
            Self::Unreachable { .. } => EXIT_UNREACHABLE,
            Self::SshFailed { .. } => EXIT_SSH_FAILED,
            Self::IncompleteSession { .. } => EXIT_FAILURE,
            Self::Guard(err) => err.exit_code(),
            Self::State(err) => err.exit_code(),
        }
    }
}

/// Resolve and ping `target`, returning the session as a snapshot.
///
/// `ping` must already be guarded on `guard`.
pub async fn open_session(
    target: &RemoteTarget,
    guard: &CommandGuard,
    sink: &dyn LogSink,
    config: &RemoteConfig,
) -> Result<StateSnapshot, RemoteError> {
    let port = target.port.unwrap_or(config.ssh_port);

    sink.log_line(&format!("resolving {}", target.host));
    let addr = resolve_host(&target.host, port).await?;
    debug!(host = %target.host, %addr, "resolved remote host");

    sink.log_line(&format!("pinging {} ({addr})", target.host));
    let ping_count = config.ping_count.to_string();
    let ping_wait = config.ping_wait_secs.to_string();
    let addr_text = addr.to_string();
    let output = guard.invoke(
        "ping",
        ["-c", ping_count.as_str(), "-W", ping_wait.as_str(), addr_text.as_str()],
    )?;
    if !output.status.success() {
        return Err(RemoteError::Unreachable {
            host: target.host.clone(),
            addr,
        });
    }

    let user = target
        .user
        .clone()
        .or_else(|| config.ssh_user.clone())
        .unwrap_or_default();

    let mut scope = LocalScope::new();
    scope
        .declare_with("remote_host", target.host.as_str())
        .declare_with("remote_addr", addr_text)
        .declare_with("remote_user", user)
        .declare_with("remote_port", port.to_string());

    Ok(Persist::new().names(SESSION_STATE_NAMES).collect(&scope)?)
}

/// Attempt a batch-mode ssh login to the host recorded in `session`.
///
/// `ssh` must already be guarded on `guard`.
pub fn check_ssh(
    session: &StateSnapshot,
    guard: &CommandGuard,
    sink: &dyn LogSink,
    config: &RemoteConfig,
) -> Result<(), RemoteError> {
    let mut scope = LocalScope::new();
    for name in SESSION_STATE_NAMES {
        scope.declare(name);
    }
    session.apply(&mut scope)?;

    let addr = required(&scope, "remote_addr")?;
    let port = required(&scope, "remote_port")?;
    let destination = match scope.get("remote_user").filter(|user| !user.is_empty()) {
        Some(user) => format!("{user}@{addr}"),
        None => addr.to_owned(),
    };

    sink.log_line(&format!("checking ssh login to {destination}"));
    let connect_timeout = format!("ConnectTimeout={}", config.ssh_connect_timeout_secs);
    let output = guard.invoke(
        "ssh",
        [
            "-o",
            "BatchMode=yes",
            "-o",
            connect_timeout.as_str(),
            "-p",
            port,
            destination.as_str(),
            "true",
        ],
    )?;
    if !output.status.success() {
        return Err(RemoteError::SshFailed {
            destination,
            code: output.status.code(),
        });
    }

    sink.log_line(&format!("ssh login to {destination} ok"));
    Ok(())
}

fn required<'s>(scope: &'s LocalScope, name: &str) -> Result<&'s str, RemoteError> {
    scope
        .get(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RemoteError::IncompleteSession {
            name: name.to_owned(),
        })
}

async fn resolve_host(host: &str, port: u16) -> Result<IpAddr, RemoteError> {
    let dns_failed = |source| RemoteError::DnsFailed {
        host: host.to_owned(),
        source,
    };
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(dns_failed)?;
    addrs.next().map(|addr| addr.ip()).ok_or_else(|| {
        dns_failed(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned",
        ))
    })
}
