use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Destination for human-readable log lines.
///
/// Functions whose stdout is captured by their caller take a sink instead of
/// printing, so progress messages never end up in the captured value.
pub trait LogSink: Send + Sync {
    fn log_line(&self, line: &str);

    /// Join `parts` with single spaces and log the result.
    fn log<I, S>(&self, parts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        Self: Sized,
    {
        self.log_line(&join_parts(parts));
    }
}

pub(crate) fn join_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (index, part) in parts.into_iter().enumerate() {
        if index > 0 {
            line.push(' ');
        }
        line.push_str(part.as_ref());
    }
    line
}

/// Writes each line straight to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn log_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

/// Drops every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn log_line(&self, _line: &str) {}
}

/// Keeps lines in memory; handy for tests and for replaying output later.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn log_line(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}

/// `Write` handle over a shared buffer, used to observe forwarded output.
#[derive(Debug, Default, Clone)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber that records `WARN` and above into a buffer.
#[cfg(test)]
pub(crate) fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = SharedBuffer::new();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_joins_parts_with_spaces() {
        let sink = MemorySink::new();
        sink.log(["checking", "host", "media.local"]);
        sink.log(Vec::<String>::new());
        assert_eq!(sink.lines(), vec!["checking host media.local".to_string(), String::new()]);
    }

    #[test]
    fn shared_buffer_collects_writes() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        writeln!(writer, "hello").unwrap();
        assert_eq!(buffer.contents(), "hello\n");
    }
}
