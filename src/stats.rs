//! Server Statistics
//!
//! Static process facts captured at boot plus the dynamic metrics the
//! `INFO` command reports. The line set and its order are part of the wire
//! contract and matched verbatim by the end-to-end tests.

use crate::config;
use std::time::{Duration, Instant};

/// Process-wide metrics, created once at boot and shared with every
/// session's dispatcher.
#[derive(Debug)]
pub struct ServerStats {
    started: Instant,
    pid: u32,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            pid: std::process::id(),
        }
    }

    /// Time since boot.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Assembles the `INFO` payload for a session bound to database
    /// `index`, currently holding `total_keys` keys across `shards` shards.
    pub fn lines(&self, index: usize, total_keys: usize, shards: usize) -> Vec<String> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let threads = tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_workers())
            .unwrap_or(1);

        vec![
            format!("server_pid:{}", self.pid),
            format!("server_uptime:{}", format_uptime(self.uptime())),
            format!("server_version:{}", config::RELEASE_VERSION),
            format!("server_network:{}", config::SERVER_NETWORK),
            format!("system_logical_cpus:{cpus}"),
            format!("runtime_current_threads:{threads}"),
            format!(
                "release_os_arch:{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            format!("release_runtime_version:{}", config::RELEASE_RUST_VERSION),
            format!("keyspace_keys:{total_keys}"),
            format!("memory_database_shards:{shards}"),
            format!(
                "memory_logical_databases:{}",
                config::CACHE_CONTAINER_SIZE
            ),
            format!("memory_active_database:{index}"),
        ]
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a seconds-rounded duration as `73s`, `2m13s` or `1h2m3s`.
fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs_f64().round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(73)), "1m13s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h2m3s");
        // Sub-second part rounds to the nearest second
        assert_eq!(format_uptime(Duration::from_millis(2600)), "3s");
    }

    #[tokio::test]
    async fn test_lines_order_and_keys() {
        let stats = ServerStats::new();
        let lines = stats.lines(2, 17, 50);

        let keys: Vec<&str> = lines
            .iter()
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                "server_pid",
                "server_uptime",
                "server_version",
                "server_network",
                "system_logical_cpus",
                "runtime_current_threads",
                "release_os_arch",
                "release_runtime_version",
                "keyspace_keys",
                "memory_database_shards",
                "memory_logical_databases",
                "memory_active_database",
            ]
        );
        assert!(lines.contains(&"keyspace_keys:17".to_string()));
        assert!(lines.contains(&"memory_active_database:2".to_string()));
        assert!(lines.contains(&"memory_database_shards:50".to_string()));
    }
}
