use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Result of a bounded line read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadLine {
    /// A complete line without its terminator.
    Line(String),
    /// A line longer than the limit; only its first bytes are kept.
    Truncated(String),
    Eof,
}

/// Read one line of at most `max_len` bytes, decoding it lossily.
///
/// The terminating `\n` (and a preceding `\r`) is stripped. Bytes beyond the
/// limit are consumed and discarded so the next call starts on a fresh line.
/// A final line without terminator is returned before [`ReadLine::Eof`].
pub async fn read_line_with_limit<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<ReadLine> {
    buf.clear();
    let mut truncated = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() && !truncated {
                return Ok(ReadLine::Eof);
            }
            return Ok(finish(buf, truncated));
        }

        let (chunk, consumed, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..pos], pos + 1, true),
            None => (available, available.len(), false),
        };

        let room = max_len.saturating_sub(buf.len());
        if chunk.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        reader.consume(consumed);

        if done {
            return Ok(finish(buf, truncated));
        }
    }
}

fn finish(buf: &mut Vec<u8>, truncated: bool) -> ReadLine {
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    if truncated {
        ReadLine::Truncated(line)
    } else {
        ReadLine::Line(line)
    }
}
