//! Response Framing
//!
//! Every reply is a framed envelope: a count line `!N\r\n` followed by
//! exactly N payload lines, each CRLF-terminated. N counts payload lines,
//! not bytes. Payload lines carry a one-character sigil:
//!
//! | Sigil | Meaning |
//! |-------|---------|
//! | `+`   | Simple status (`+OK`) |
//! | `-`   | Error, prefixed `-ERR ` |
//! | `:`   | Integer |
//! | `$`   | Length header (`$<len>`, or `$-1` for missing) |
//! | none  | Bare value string; an empty line means "missing" |
//!
//! Most commands reply with a single line; MGET, LEN and INFO reply with
//! one line per requested item.

use std::fmt;

/// The CRLF terminator used throughout the wire protocol.
pub const CRLF: &[u8] = b"\r\n";

/// One payload line of a framed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Simple status, serialized as `+<status>`.
    Status(&'static str),

    /// Error, serialized as `-ERR <message>`.
    Error(String),

    /// Integer, serialized as `:<n>`.
    Integer(i64),

    /// Value byte-length header, serialized as `$<len>` or `$-1` when the
    /// key is absent.
    Length(Option<usize>),

    /// Bare value string; the empty string serializes to an empty line,
    /// which clients read as "missing".
    Value(String),
}

impl Line {
    fn write_into(&self, buf: &mut Vec<u8>) {
        match self {
            Line::Status(status) => {
                buf.push(b'+');
                buf.extend_from_slice(status.as_bytes());
            }
            Line::Error(message) => {
                buf.extend_from_slice(b"-ERR ");
                buf.extend_from_slice(message.as_bytes());
            }
            Line::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
            }
            Line::Length(Some(len)) => {
                buf.push(b'$');
                buf.extend_from_slice(len.to_string().as_bytes());
            }
            Line::Length(None) => buf.extend_from_slice(b"$-1"),
            Line::Value(value) => buf.extend_from_slice(value.as_bytes()),
        }
        buf.extend_from_slice(CRLF);
    }
}

/// A complete framed response: the `!N` count line plus its payload lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    lines: Vec<Line>,
}

impl Envelope {
    /// An envelope holding exactly one payload line.
    pub fn single(line: Line) -> Self {
        Self { lines: vec![line] }
    }

    /// An envelope holding the given payload lines, in order.
    pub fn from_lines(lines: Vec<Line>) -> Self {
        Self { lines }
    }

    /// The ubiquitous `+OK` reply.
    pub fn ok() -> Self {
        Self::single(Line::Status("OK"))
    }

    /// A single-line error reply; `message` is prefixed with `-ERR `.
    pub fn error(message: impl Into<String>) -> Self {
        Self::single(Line::Error(message.into()))
    }

    /// Number of payload lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the envelope holds no payload lines. Not produced by any
    /// command, but kept alongside `len`.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Serializes the envelope into its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(b'!');
        buf.extend_from_slice(self.lines.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for line in &self.lines {
            line.write_into(&mut buf);
        }
        buf
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}
