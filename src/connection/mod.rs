//! Session Engine
//!
//! Each accepted connection runs an independent session task:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Session loop                           │
//! │                                                             │
//! │   poll quit ──> read line (deadline) ──> tokenize           │
//! │       ▲                                      │              │
//! │       │                                      ▼              │
//! │   write framed reply <── dispatch <── rebind database       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The per-read deadline doubles as the shutdown poll interval: a timed-out
//! read simply loops back to the quit check. Within one session commands
//! execute strictly in issue order, one framed reply per command.

pub mod handler;

// Re-export commonly used types
pub use handler::{run, Peer};
