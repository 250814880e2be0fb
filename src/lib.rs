//! # Valhaj - An In-Memory Multi-Database Key-Value Server
//!
//! Valhaj is an in-memory key-value server speaking a line-oriented text
//! protocol over TCP or Unix domain sockets. It keeps several independent
//! logical databases in one process, persists each to a plain-text snapshot
//! at clean shutdown, and can be fronted by an mTLS terminating proxy.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Valhaj                              │
//! │                                                                │
//! │  ┌────────────┐    ┌─────────────┐    ┌──────────────┐         │
//! │  │  Listener  │───>│   Session   │───>│  Dispatcher  │         │
//! │  │ (tcp/unix) │    │    loop     │    │              │         │
//! │  └────────────┘    └─────────────┘    └──────┬───────┘         │
//! │                                              │                 │
//! │                                              ▼                 │
//! │  ┌────────────┐    ┌────────────────────────────────────────┐  │
//! │  │ Line codec │    │            CacheContainer              │  │
//! │  │  !N / +-:$ │    │  db 0: 50 shards │ db 1 │ db 2         │  │
//! │  └────────────┘    └───────────────────┬────────────────────┘  │
//! │                                        │                       │
//! │                              ┌─────────┴─────────┐             │
//! │                              │   Snapshot I/O    │             │
//! │                              │ data<i>.vdb files │             │
//! │                              └───────────────────┘             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Requests are CRLF-terminated lines; arguments are space-separated and
//! may be double-quoted (backslash escapes pass through verbatim). Every
//! reply is a framed envelope `!N\r\n` followed by N payload lines using
//! the sigils `+` (status), `-` (error), `:` (integer), `$` (length) or
//! none (bare value, empty line = missing). Pipelined commands receive one
//! envelope each, in order.
//!
//! ## Concurrency
//!
//! One task per session; per-shard reader-writer locks; composite atomic
//! store primitives so no layer above the store ever holds a lock. TTLs
//! are fire-and-forget delete timers. Shutdown closes a process-global
//! quit broadcast, stops the listener, drains every session and then
//! snapshots each database in parallel.
//!
//! ## Module Overview
//!
//! - [`storage`]: sharded multi-database store and snapshot persistence
//! - [`protocol`]: request tokenizer and response framing
//! - [`commands`]: command dispatch over the store primitives
//! - [`connection`]: per-session loop, deadlines and admin gating
//! - [`server`]: listener, quit broadcast and session drain
//! - [`client`]: wire client used by the REPL, proxy and tests
//! - [`stats`]: the `INFO` metric set
//! - [`config`]: compile-time constants

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::Dispatcher;
pub use protocol::{Envelope, Line};
pub use server::{Server, Shutdown};
pub use stats::ServerStats;
pub use storage::{CacheContainer, ShardedCache};
