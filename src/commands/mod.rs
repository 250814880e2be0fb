//! Command Layer
//!
//! Receives tokenized request lines from the session engine, validates
//! them, executes them against the storage layer and produces framed
//! replies.
//!
//! ```text
//! Session loop
//!      │  arguments: Vec<String>
//!      ▼
//! ┌─────────────────┐
//! │   Dispatcher    │   arity / options / admin gating
//! └────────┬────────┘
//!          │  store primitives
//!          ▼
//! ┌─────────────────┐
//! │  ShardedCache   │
//! └────────┬────────┘
//!          │
//!          ▼
//!   Outcome { reply, next_index, keep_open }
//! ```
//!
//! Supported commands: SELECT, FLUSHALL, FLUSH, MOVE, MGET, MSET, GET, SET,
//! INCR, DECR, APPEND, PREPEND, LEN, RENAME, COPY, GETSET, GETDEL, DEL,
//! EXISTS, QUIT, INFO, ECHO, SHUTDOWN.

pub mod handler;

// Re-export the main command handler
pub use handler::{Dispatcher, Outcome};
