use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Default cap on a single frame, matching common IRC line budgets (§10.5).
/// Configurable per [`LineFramer::with_max_line_len`].
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// Error raised by the framer when a peer violates the framing contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer grew past `max_line_len` bytes without a newline.
    #[error("line of at least {seen} bytes exceeds the {limit} byte frame budget")]
    FrameTooLong { seen: usize, limit: usize },
}

/// Converts an arbitrary byte stream into newline-terminated lines.
///
/// Bytes arrive via [`LineFramer::push`] in whatever chunking the transport
/// delivers them; [`LineFramer::next_line`] drains one complete line at a
/// time, tolerating both `\n` and `\r\n` terminators. A line with no bytes
/// before the newline yields an empty string rather than an error — callers
/// decide whether to tolerate or reject that at the parser/session layer.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_line_len: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Creates a framer using [`DEFAULT_MAX_LINE_LEN`].
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// Creates a framer with an explicit line-length budget.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_len,
        }
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drains and returns the next complete line, if one is buffered.
    ///
    /// The returned `String` excludes the terminating `\n` and a single
    /// trailing `\r`, and is lossily decoded as UTF-8 (a malformed peer
    /// sending non-UTF-8 bytes gets replacement characters rather than a
    /// dropped connection; the command/parameter parser is free to reject
    /// the resulting text on its own terms).
    pub fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        let Some(pos) = self.buffer.iter().position(|b| *b == NEWLINE) else {
            if self.buffer.len() > self.max_line_len {
                return Err(FrameError::FrameTooLong {
                    seen: self.buffer.len(),
                    limit: self.max_line_len,
                });
            }
            return Ok(None);
        };

        if pos > self.max_line_len {
            return Err(FrameError::FrameTooLong {
                seen: pos,
                limit: self.max_line_len,
            });
        }

        let mut line = self.buffer.split_to(pos);
        self.buffer.advance(1); // consume the '\n' itself
        if line.last() == Some(&CARRIAGE_RETURN) {
            line.truncate(line.len() - 1);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}
