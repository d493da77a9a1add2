//! Named-pipe ingress for the log channel.
//!
//! Child processes that cannot share the parent's in-memory channel write
//! newline-terminated lines into the FIFO; each line is handed to the
//! channel exactly like a direct `log` call.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::stat::Mode;
use tempfile::TempDir;
use tokio::io::BufReader;
use tokio::net::unix::pipe;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::log_channel::{SharedOutput, write_line};
use crate::stream::{ReadLine, read_line_with_limit};

const FIFO_FILE_NAME: &str = "log.fifo";

pub(crate) struct FifoIngress {
    // Removing the directory also removes the FIFO inside it.
    _dir: TempDir,
    path: PathBuf,
    // Held open so the receiver never observes end-of-file between writers.
    keepalive: Option<pipe::Sender>,
    reader: JoinHandle<()>,
}

impl FifoIngress {
    /// Create the FIFO in a private temporary directory and start pumping
    /// its lines into `tx`, or straight into `output` once the forwarder is
    /// gone. Must be called from inside a tokio runtime.
    pub(crate) fn open(
        tx: UnboundedSender<String>,
        output: SharedOutput,
        max_line_bytes: usize,
    ) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("stackguard-log-")
            .tempdir()?;
        let path = dir.path().join(FIFO_FILE_NAME);
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;

        let receiver = pipe::OpenOptions::new().open_receiver(&path)?;
        let keepalive = pipe::OpenOptions::new().open_sender(&path)?;
        let reader = tokio::spawn(pump_lines(receiver, tx, output, max_line_bytes));

        debug!(path = %path.display(), "log fifo ready");
        Ok(Self {
            _dir: dir,
            path,
            keepalive: Some(keepalive),
            reader,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Let the reader finish the lines already written, then stop it.
    ///
    /// Waits at most `grace` for the remaining writers to close their end.
    pub(crate) async fn drain(mut self, grace: Duration) {
        drop(self.keepalive.take());
        if tokio::time::timeout(grace, &mut self.reader).await.is_err() {
            debug!(path = %self.path.display(), "log fifo still has writers; dropping them");
            self.reader.abort();
        }
    }

    pub(crate) fn shutdown(self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for FifoIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoIngress")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

async fn pump_lines(
    receiver: pipe::Receiver,
    tx: UnboundedSender<String>,
    output: SharedOutput,
    max_line_bytes: usize,
) {
    let mut reader = BufReader::new(receiver);
    let mut buf = Vec::new();
    loop {
        let line = match read_line_with_limit(&mut reader, &mut buf, max_line_bytes).await {
            Ok(ReadLine::Line(line)) => line,
            Ok(ReadLine::Truncated(line)) => {
                debug!(limit = max_line_bytes, "truncated overlong fifo line");
                line
            }
            Ok(ReadLine::Eof) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "log fifo read failed");
                break;
            }
        };
        if let Err(SendError(line)) = tx.send(line) {
            write_line(&output, &line);
        }
    }
}
