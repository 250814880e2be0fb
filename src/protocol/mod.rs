//! Line Protocol Codec
//!
//! Valhaj's wire protocol is line-oriented text in both directions:
//!
//! - **Requests** ([`parser`]): one command per CRLF-terminated line,
//!   space-separated arguments, double quotes with backslash pass-through.
//! - **Responses** ([`response`]): a `!N` count line followed by N sigiled
//!   payload lines, each CRLF-terminated.
//!
//! Pipelined clients concatenate CRLF-separated commands in one write; the
//! server answers with one envelope per logical command, in order.
//!
//! ## Example
//!
//! ```
//! use valhaj::protocol::{parser, Envelope};
//!
//! let args = parser::tokenize(b"SET name \"valhaj db\"").unwrap();
//! assert_eq!(args, vec!["SET", "name", "valhaj db"]);
//!
//! assert_eq!(Envelope::ok().to_bytes(), b"!1\r\n+OK\r\n");
//! ```

pub mod parser;
pub mod response;

// Re-export commonly used types
pub use parser::ParseError;
pub use response::{Envelope, Line, CRLF};
