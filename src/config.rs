//! Compile-Time Configuration
//!
//! Valhaj deliberately has no flags or config files: every tunable is a
//! constant, and changing one means rebuilding the binary. The constants
//! are grouped by the component that consumes them.

/* release */

/// Project name, used by banners and log lines.
pub const RELEASE_TITLE: &str = "valhaj";

/// Crate version, reported by `INFO` as `server_version`.
pub const RELEASE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust toolchain, reported by `INFO` as
/// `release_runtime_version`.
pub const RELEASE_RUST_VERSION: &str = env!("CARGO_PKG_RUST_VERSION");

/* server */

/// Transport the server listens on: `"tcp"` or `"unix"`.
pub const SERVER_NETWORK: &str = "tcp";

/// Bind address for the TCP transport.
pub const SERVER_INET_ADDRESS: &str = "0.0.0.0:6380";

/// Socket path for the Unix transport.
pub const SERVER_UNIX_ADDRESS: &str = "/tmp/valhaj.sock";

/// Per-read deadline in milliseconds. Bounds how long a quiescent session
/// takes to notice the quit signal during graceful shutdown.
pub const SERVER_GRACEFUL_SHUTDOWN_DELAY_MS: u64 = 1000;

/* storage */

/// Snapshot filename prefix; database `i` persists to
/// `<basename><i><extension>` in the working directory.
pub const STORAGE_BASENAME: &str = "data";

/// Snapshot filename extension.
pub const STORAGE_EXTENSION: &str = ".vdb";

/* memory */

/// Number of logical databases in the container. Fixed after startup.
pub const CACHE_CONTAINER_SIZE: usize = 3;

/// Number of lock-striped shards per logical database.
pub const CACHE_SHARD_COUNT: usize = 50;

/* proxy */

/// Address the mTLS proxy listens on.
pub const PROXY_INET_ADDRESS: &str = "0.0.0.0:6381";

/// Transport of the backend the proxy forwards to: `"tcp"` or `"unix"`.
pub const PROXY_BACKEND_NETWORK: &str = "unix";

/// Address or socket path of the proxy's backend.
pub const PROXY_BACKEND_ADDRESS: &str = "/tmp/valhaj.sock";

/// PEM file holding the CA certificate that signed the client certificates.
pub const PROXY_CA_FILE: &str = "./ca-cert.pem";

/// PEM file holding the proxy's own certificate chain.
pub const PROXY_CERT_FILE: &str = "./server-cert.pem";

/// PEM file holding the proxy's private key.
pub const PROXY_KEY_FILE: &str = "./server-key.pem";

/* repl */

/// Address the REPL connects to.
pub const REPL_ADDRESS: &str = "127.0.0.1:6380";
