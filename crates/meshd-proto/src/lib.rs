//! Line framing and message parsing for the meshd spanning-tree wire
//! protocol: newline-delimited ASCII text, each line an optional
//! colon-prefixed source, a command word, and positional parameters.

mod framer;
mod parser;

pub use framer::{FrameError, LineFramer, DEFAULT_MAX_LINE_LEN};
pub use parser::{parse_line, Message, ParseError};
