//! Incremental SSE (Server-Sent Events) frame parser.
//!
//! Handles:
//! - Partial frames across TCP chunks
//! - Multi-line data fields
//! - CRLF and LF line endings
//! - Buffer compaction to prevent unbounded growth

use bytes::{Buf, BytesMut};
use memchr::memchr;

/// A parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Line-based SSE parser.
pub struct SseParser {
    buffer: BytesMut,
    /// Offset of unconsumed data in buffer.
    consumed: usize,
}

impl SseParser {
    /// Create a new parser with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create a new parser with specified initial capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(cap),
            consumed: 0,
        }
    }

    /// Feed bytes into the parser.
    #[inline]
    pub fn feed(&mut self, data: &[u8]) {
        if self.consumed > self.buffer.len() / 2 && self.consumed > 4096 {
            self.compact();
        }
        self.buffer.extend_from_slice(data);
    }

    /// Terminate a trailing frame that arrived without its blank line.
    /// Called once the body has ended.
    pub fn finish(&mut self) {
        if self.buffer_len() > 0 {
            self.buffer.extend_from_slice(b"\n\n");
        }
    }

    fn compact(&mut self) {
        if self.consumed > 0 {
            self.buffer.advance(self.consumed);
            self.consumed = 0;
        }
    }

    /// Try to parse the next complete event carrying data.
    /// Returns `None` if more data is needed.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            let buf = &self.buffer[self.consumed..];
            let mut data = String::new();
            let mut has_data = false;
            let mut event = None;
            let mut pos = 0;
            let mut event_end = None;

            while pos < buf.len() {
                let line_end = pos + memchr(b'\n', &buf[pos..])?;

                let line = &buf[pos..line_end];
                let line = line.strip_suffix(b"\r").unwrap_or(line);

                if line.is_empty() {
                    event_end = Some(line_end + 1);
                    break;
                }

                // Lines starting with ':' are comments and yield an empty field name.
                if let Some(colon_pos) = memchr(b':', line) {
                    let field = &line[..colon_pos];
                    let value = &line[colon_pos + 1..];
                    let value = value.strip_prefix(b" ").unwrap_or(value);

                    if let Ok(value) = std::str::from_utf8(value) {
                        match field {
                            b"data" => {
                                if has_data {
                                    data.push('\n');
                                }
                                data.push_str(value);
                                has_data = true;
                            }
                            b"event" => event = Some(value.to_string()),
                            _ => {}
                        }
                    }
                }

                pos = line_end + 1;
            }

            self.consumed += event_end?;

            if has_data {
                return Some(SseEvent { event, data });
            }
        }
    }

    /// Check if the data is an end-of-stream marker.
    #[inline]
    pub fn is_done(data: &str) -> bool {
        data == "[DONE]"
    }

    /// Current unconsumed buffer size.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len() - self.consumed
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
