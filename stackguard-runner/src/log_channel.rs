//! Side channel for human-visible log lines.
//!
//! A [`LogChannel`] owns a background forwarder that copies lines onto the
//! process's original stdout. Code whose stdout is being captured logs
//! through the channel (or any other [`LogSink`]) so its messages never mix
//! with the captured value. On Unix the channel can also expose a FIFO that
//! child processes write into.

use std::io::{self, Write};
#[cfg(unix)]
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use stackguard_config::LogChannelConfig;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(unix)]
use crate::fifo::FifoIngress;
use crate::sink::{LogSink, StdoutSink, join_parts};

/// Environment variable carrying the FIFO path to guarded child processes.
pub const LOG_FIFO_ENV: &str = "STACKGUARD_LOG_FIFO";

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);
static ACTIVE: Lazy<Mutex<Option<Arc<LogChannel>>>> = Lazy::new(|| Mutex::new(None));

pub(crate) type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// Why the forwarder task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderExit {
    KillToken,
    IdleTimeout,
    Disconnected,
}

pub struct LogChannel {
    id: u64,
    tx: UnboundedSender<String>,
    kill_token: String,
    output: SharedOutput,
    #[cfg_attr(not(unix), allow(dead_code))]
    poll_interval: Duration,
    forwarder: Mutex<Option<JoinHandle<ForwarderExit>>>,
    #[cfg(unix)]
    fifo: Mutex<Option<FifoIngress>>,
    #[cfg(unix)]
    fifo_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogChannel")
            .field("id", &self.id)
            .field("fifo_path", &self.fifo_path())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LogChannel {
    /// Start a forwarder writing to `output`. Must be called from inside a
    /// tokio runtime.
    pub fn spawn(config: &LogChannelConfig, output: Box<dyn Write + Send>) -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let kill_token = format!("{:032x}", rand::random::<u128>());
        let output: SharedOutput = Arc::new(Mutex::new(output));

        #[cfg(unix)]
        let fifo = if config.fifo {
            Some(FifoIngress::open(
                tx.clone(),
                Arc::clone(&output),
                config.max_line_bytes,
            )?)
        } else {
            None
        };
        #[cfg(unix)]
        let fifo_path = fifo.as_ref().map(|ingress| ingress.path().to_path_buf());

        let forwarder = tokio::spawn(forward_lines(
            rx,
            kill_token.clone(),
            Arc::clone(&output),
            config.poll_interval(),
            config.idle_limit,
        ));
        debug!(channel = id, "log channel started");

        Ok(Self {
            id,
            tx,
            kill_token,
            output,
            poll_interval: config.poll_interval(),
            forwarder: Mutex::new(Some(forwarder)),
            #[cfg(unix)]
            fifo: Mutex::new(fifo),
            #[cfg(unix)]
            fifo_path,
            closed: AtomicBool::new(false),
        })
    }

    /// Channel forwarding to the process stdout.
    pub fn stdout(config: &LogChannelConfig) -> io::Result<Self> {
        Self::spawn(config, Box::new(io::stdout()))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path child processes may write log lines into, if a FIFO was created.
    pub fn fifo_path(&self) -> Option<PathBuf> {
        #[cfg(unix)]
        {
            self.fifo_path.clone()
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Whether lines are still going through the forwarder.
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self
                .forwarder
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    pub fn log<I, S>(&self, parts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send(join_parts(parts));
    }

    fn send(&self, line: String) {
        if self.closed.load(Ordering::SeqCst) {
            write_line(&self.output, &line);
            return;
        }
        if let Err(mpsc::error::SendError(line)) = self.tx.send(line) {
            write_line(&self.output, &line);
        }
    }

    /// Drain and remove the FIFO, then send the kill token and wait for the
    /// forwarder.
    ///
    /// Returns `None` when the channel was already closed.
    pub async fn close(&self) -> Option<ForwarderExit> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }

        #[cfg(unix)]
        {
            let fifo = self.fifo.lock().take();
            if let Some(fifo) = fifo {
                fifo.drain(self.poll_interval).await;
            }
        }

        let _ = self.tx.send(self.kill_token.clone());

        let handle = self.forwarder.lock().take();
        let exit = match handle {
            Some(handle) => match handle.await {
                Ok(exit) => Some(exit),
                Err(err) => {
                    warn!(channel = self.id, error = %err, "log forwarder task failed");
                    None
                }
            },
            None => None,
        };

        debug!(channel = self.id, ?exit, "log channel closed");
        exit
    }
}

impl LogSink for LogChannel {
    fn log_line(&self, line: &str) {
        self.send(line.to_owned());
    }
}

impl Drop for LogChannel {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(fifo) = self.fifo.get_mut().take() {
            fifo.shutdown();
        }
    }
}

async fn forward_lines(
    mut rx: UnboundedReceiver<String>,
    kill_token: String,
    output: SharedOutput,
    poll_interval: Duration,
    idle_limit: u32,
) -> ForwarderExit {
    let mut idle_polls = 0u32;
    loop {
        match tokio::time::timeout(poll_interval, rx.recv()).await {
            Ok(Some(line)) if line == kill_token => return ForwarderExit::KillToken,
            Ok(Some(line)) => {
                idle_polls = 0;
                write_line(&output, &line);
            }
            Ok(None) => return ForwarderExit::Disconnected,
            Err(_) => {
                idle_polls += 1;
                if idle_polls >= idle_limit {
                    debug!(idle_polls, "log forwarder idle, exiting");
                    return ForwarderExit::IdleTimeout;
                }
            }
        }
    }
}

pub(crate) fn write_line(output: &SharedOutput, line: &str) {
    let mut out = output.lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

/// Writes lines into a FIFO owned by a parent process's channel.
#[cfg(unix)]
#[derive(Debug)]
pub struct FifoSink {
    file: Mutex<std::fs::File>,
}

#[cfg(unix)]
impl FifoSink {
    /// Open `path` for writing without blocking; fails when nobody reads it.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Connect to the FIFO advertised in [`LOG_FIFO_ENV`], if any.
    pub fn from_env() -> Option<Self> {
        let path = std::env::var_os(LOG_FIFO_ENV)?;
        match Self::open(&path) {
            Ok(sink) => Some(sink),
            Err(err) => {
                debug!(error = %err, "inherited log fifo unavailable");
                None
            }
        }
    }
}

#[cfg(unix)]
impl LogSink for FifoSink {
    fn log_line(&self, line: &str) {
        let mut file = self.file.lock();
        if writeln!(file, "{line}").is_err() {
            StdoutSink.log_line(line);
        }
    }
}

/// Install the process-wide channel, or return the one already active.
pub fn install(
    config: &LogChannelConfig,
    output: Box<dyn Write + Send>,
) -> io::Result<Arc<LogChannel>> {
    let mut active = ACTIVE.lock();
    if let Some(channel) = active.as_ref().filter(|channel| channel.is_active()) {
        warn!(
            channel = channel.id(),
            "log channel already active; keeping the existing one"
        );
        return Ok(Arc::clone(channel));
    }
    let channel = Arc::new(LogChannel::spawn(config, output)?);
    *active = Some(Arc::clone(&channel));
    Ok(channel)
}

pub fn active() -> Option<Arc<LogChannel>> {
    ACTIVE.lock().clone()
}

/// Log through the active channel, or straight to stdout without one.
pub fn log<I, S>(parts: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match active() {
        Some(channel) => channel.log(parts),
        None => StdoutSink.log(parts),
    }
}

/// Close and forget the active channel. Safe to call repeatedly.
pub async fn teardown() -> Option<ForwarderExit> {
    let channel = ACTIVE.lock().take();
    match channel {
        Some(channel) => channel.close().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SharedBuffer, capture_warnings};
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn quick_config(fifo: bool) -> LogChannelConfig {
        LogChannelConfig {
            poll_interval_ms: 20,
            idle_limit: 50,
            max_line_bytes: 1024,
            fifo,
        }
    }

    async fn wait_for(buffer: &SharedBuffer, expected: &str) -> bool {
        for _ in 0..200 {
            if buffer.contents().contains(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn forwards_lines_in_order_until_killed() {
        let buffer = SharedBuffer::new();
        let channel = LogChannel::spawn(&quick_config(false), Box::new(buffer.clone())).unwrap();

        channel.log(["starting", "stack"]);
        channel.log_line("second line");

        assert_eq!(channel.close().await, Some(ForwarderExit::KillToken));
        assert_eq!(buffer.contents(), "starting stack\nsecond line\n");
        assert!(!buffer.contents().contains(&channel.kill_token));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_later_lines_are_written_directly() {
        let buffer = SharedBuffer::new();
        let channel = LogChannel::spawn(&quick_config(false), Box::new(buffer.clone())).unwrap();

        assert_eq!(channel.close().await, Some(ForwarderExit::KillToken));
        assert_eq!(channel.close().await, None);
        assert!(!channel.is_active());

        channel.log(["after", "teardown"]);
        assert_eq!(buffer.contents(), "after teardown\n");
    }

    #[tokio::test(start_paused = true)]
    async fn forwarder_exits_after_idle_limit() {
        let buffer = SharedBuffer::new();
        let config = LogChannelConfig {
            poll_interval_ms: 10,
            idle_limit: 3,
            ..quick_config(false)
        };
        let channel = LogChannel::spawn(&config, Box::new(buffer.clone())).unwrap();

        for _ in 0..100 {
            if !channel.is_active() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!channel.is_active());

        channel.log_line("still visible");
        assert_eq!(buffer.contents(), "still visible\n");
        assert_eq!(channel.close().await, Some(ForwarderExit::IdleTimeout));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fifo_lines_reach_the_output() {
        let buffer = SharedBuffer::new();
        let channel = LogChannel::spawn(&quick_config(true), Box::new(buffer.clone())).unwrap();
        let path = channel.fifo_path().expect("fifo path");
        assert!(path.exists());

        let sink = FifoSink::open(&path).unwrap();
        sink.log(["from", "child"]);
        assert!(wait_for(&buffer, "from child\n").await);

        sink.log_line("written just before teardown");
        drop(sink);
        assert_eq!(channel.close().await, Some(ForwarderExit::KillToken));
        assert_eq!(
            buffer.contents(),
            "from child\nwritten just before teardown\n"
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    #[serial]
    async fn reinstall_keeps_the_active_channel() {
        let (first, logs) =
            capture_warnings(|| install(&quick_config(false), Box::new(SharedBuffer::new())));
        let first = first.unwrap();
        assert_eq!(logs, "");

        let (second, logs) =
            capture_warnings(|| install(&quick_config(false), Box::new(SharedBuffer::new())));
        assert_eq!(first.id(), second.unwrap().id());
        assert!(logs.contains("already active"), "{logs}");
        assert!(logs.contains(&format!("channel={}", first.id())), "{logs}");

        assert_eq!(teardown().await, Some(ForwarderExit::KillToken));
        assert_eq!(teardown().await, None);
        assert!(active().is_none());

        let third = install(&quick_config(false), Box::new(SharedBuffer::new())).unwrap();
        assert_ne!(first.id(), third.id());
        teardown().await;
    }
}
