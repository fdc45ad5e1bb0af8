//! Newline-delimited JSON framing shared by the CLI stream and the tool bridge.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::CliJsonDecodeError;

/// Default carry-over ceiling in bytes.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100_000;
/// Largest ceiling a caller may configure.
pub const MAX_BUFFER_SIZE_LIMIT: usize = 10_000_000;

/// Observer for decode failures that would otherwise only reach `log::trace!`.
pub type DecodeDiagnostic = Arc<dyn Fn(&CliJsonDecodeError) + Send + Sync + 'static>;

/// Incremental decoder for line-delimited JSON objects.
///
/// A line that ends inside a JSON value is carried over and joined with the
/// next one. The carry-over is bounded; once it passes the ceiling the codec
/// forgets everything and starts again on the next line.
pub struct LineCodec {
    buffer: String,
    max_buffer_size: usize,
    diagnostics: Option<DecodeDiagnostic>,
}

impl LineCodec {
    /// Create a codec. The ceiling is clamped to `1..=MAX_BUFFER_SIZE_LIMIT`.
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer_size: max_buffer_size.clamp(1, MAX_BUFFER_SIZE_LIMIT),
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Option<DecodeDiagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Bytes currently held waiting for the rest of a value.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed one line and return every complete JSON object it finishes.
    ///
    /// Non-object values are dropped. Malformed input discards the carry-over
    /// so the next line starts clean.
    pub fn decode_line(&mut self, line: &str) -> Vec<Map<String, Value>> {
        let fragment = line.trim();
        if fragment.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(fragment);
        if self.buffer.len() > self.max_buffer_size {
            self.reject_oversized(self.buffer.len());
            return Vec::new();
        }

        let mut objects = Vec::new();
        let mut consumed = self.buffer.len();
        let mut failure = None;
        {
            let mut values = serde_json::Deserializer::from_str(&self.buffer).into_iter::<Value>();
            loop {
                let offset = values.byte_offset();
                match values.next() {
                    None => break,
                    Some(Ok(Value::Object(object))) => objects.push(object),
                    Some(Ok(other)) => {
                        log::trace!("[line_codec::decode] dropping non-object value: {other}");
                    }
                    Some(Err(err)) if err.is_eof() => {
                        consumed = offset;
                        break;
                    }
                    Some(Err(err)) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        match failure {
            Some(err) => {
                self.report(err);
                self.buffer.clear();
            }
            None => {
                self.buffer.drain(..consumed);
                if self.buffer.trim().is_empty() {
                    self.buffer.clear();
                }
            }
        }

        objects
    }

    /// Drop all buffered state after a line of `size` bytes blew the ceiling.
    pub fn reject_oversized(&mut self, size: usize) {
        let message = format!("Buffer size {size} exceeds limit {}", self.max_buffer_size);
        log::warn!("[line_codec::decode] {message}; discarding buffered data");
        let error = serde_json::Error::io(std::io::Error::new(ErrorKind::InvalidData, message));
        self.report(error);
        self.buffer.clear();
    }

    /// Encode one frame as a single JSON line terminated by `\n`.
    pub fn encode<T: Serialize + ?Sized>(frame: &T) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        Ok(line)
    }

    fn report(&self, error: serde_json::Error) {
        let decode_error = CliJsonDecodeError::new(self.buffer.clone(), error);
        log::trace!("[line_codec::decode] {decode_error}");
        if let Some(diagnostics) = self.diagnostics.as_ref() {
            diagnostics(&decode_error);
        }
    }
}

/// Outcome of [`read_line_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// End of input with nothing buffered.
    Eof,
    /// A line (possibly without trailing newline at end of input) is in the buffer.
    Line,
    /// The line was longer than the limit; its bytes were discarded.
    Overflow(usize),
}

/// Read one `\n`-terminated line into `buf` without holding more than `limit` bytes.
///
/// Bytes past the limit are consumed and thrown away up to the next newline.
/// The caller clears `buf` between lines.
pub async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut overflowed = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if overflowed > 0 {
                LineRead::Overflow(overflowed)
            } else if buf.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Line
            });
        }

        let (used, complete) = match available.iter().position(|byte| *byte == b'\n') {
            Some(index) => (index + 1, true),
            None => (available.len(), false),
        };

        if overflowed == 0 && buf.len() + used <= limit.saturating_add(1) {
            buf.extend_from_slice(&available[..used]);
        } else {
            overflowed += buf.len() + used;
            buf.clear();
        }
        reader.consume(used);

        if complete {
            return Ok(if overflowed > 0 {
                LineRead::Overflow(overflowed)
            } else {
                LineRead::Line
            });
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl fmt::Debug for LineCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineCodec")
            .field("buffered", &self.buffer.len())
            .field("max_buffer_size", &self.max_buffer_size)
            .field("has_diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}
