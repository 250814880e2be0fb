//! Storage Layer
//!
//! The storage layer has two halves:
//!
//! - [`engine`]: the in-memory sharded multi-database store and its
//!   composite atomic primitives. This is what sessions mutate.
//! - [`snapshot`]: per-database text snapshots, restored at boot and saved
//!   at clean shutdown.
//!
//! ## Example
//!
//! ```
//! use valhaj::storage::CacheContainer;
//!
//! let container = CacheContainer::new(3, 50);
//! container.database(0).store("name", "valhaj");
//! assert_eq!(
//!     container.database(0).load("name"),
//!     Some("valhaj".to_string())
//! );
//! // The same key is independent per database
//! assert_eq!(container.database(1).load("name"), None);
//! ```

pub mod engine;
pub mod snapshot;

// Re-export commonly used types
pub use engine::{CacheContainer, ShardedCache};
pub use snapshot::{restore_state, save_state, SnapshotError};
