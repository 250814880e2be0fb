//! Snapshot Persistence
//!
//! Best-effort persistence at process boundaries: every logical database is
//! restored from its own snapshot file at boot and written back at clean
//! shutdown. The format is deliberately primitive: alternating key and
//! value rows, each terminated by `\n`, no escaping. A key or value that
//! contains a newline corrupts its file.
//!
//! Restore and save both run one task per database and wait for all of
//! them. A missing snapshot is routine (first boot) and only logged; a
//! malformed one is skipped so a damaged file cannot take the server down.

use crate::config;
use crate::storage::{CacheContainer, ShardedCache};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Reasons a single database snapshot was skipped.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The database held no keys, so no file was written.
    #[error("no data to persist to disk")]
    NoData,

    /// No snapshot file existed at boot.
    #[error("no snapshot to restore")]
    NoSnapshot,

    /// The file held an odd number of rows and cannot be paired up.
    #[error("error loading incomplete snapshot")]
    Incomplete,

    /// Underlying filesystem failure.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Generates the snapshot filename for each database in the container:
/// `data0.vdb`, `data1.vdb`, …
pub fn labels() -> Vec<String> {
    (0..config::CACHE_CONTAINER_SIZE)
        .map(|i| {
            format!(
                "{}{}{}",
                config::STORAGE_BASENAME,
                i,
                config::STORAGE_EXTENSION
            )
        })
        .collect()
}

/// Writes one database to `filename`. An empty database writes nothing and
/// leaves any existing file untouched.
pub async fn disk_write(
    filename: &str,
    database: &ShardedCache,
    index: usize,
) -> Result<(), SnapshotError> {
    let (items, count) = database.range();
    if items.is_empty() {
        return Err(SnapshotError::NoData);
    }

    let mut content = String::new();
    for item in &items {
        content.push_str(item);
        content.push('\n');
    }
    tokio::fs::write(filename, content).await?;

    info!(id = index, keys = count, "Saved database snapshot");
    Ok(())
}

/// Restores one database from `filename`. Rows are consumed in key/value
/// pairs; a file with an odd number of rows is rejected whole.
pub async fn disk_read(
    filename: &str,
    database: &ShardedCache,
    index: usize,
) -> Result<(), SnapshotError> {
    let content = match tokio::fs::read_to_string(filename).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SnapshotError::NoSnapshot);
        }
        Err(err) => return Err(err.into()),
    };

    // The final `\n` produces one empty trailing row; drop it before pairing
    let mut rows: Vec<&str> = content.split('\n').collect();
    rows.pop();
    if rows.len() % 2 != 0 {
        return Err(SnapshotError::Incomplete);
    }

    for pair in rows.chunks(2) {
        database.store(pair[0], pair[1]);
    }

    info!(id = index, keys = rows.len() / 2, "Restored database snapshot");
    Ok(())
}

/// Restores every database in the container from disk, in parallel.
pub async fn restore_state(container: &Arc<CacheContainer>) {
    let mut tasks = JoinSet::new();

    for (index, filename) in labels().into_iter().enumerate() {
        let database = Arc::clone(container.database(index));
        tasks.spawn(async move {
            if let Err(err) = disk_read(&filename, &database, index).await {
                warn!(id = index, %err, "Skipped restoring database snapshot");
            }
        });
    }

    while tasks.join_next().await.is_some() {}
}

/// Persists every database in the container to disk, in parallel. Runs
/// after the listener has closed and all sessions have drained.
pub async fn save_state(container: &Arc<CacheContainer>) {
    let mut tasks = JoinSet::new();

    for (index, filename) in labels().into_iter().enumerate() {
        let database = Arc::clone(container.database(index));
        tasks.spawn(async move {
            if let Err(err) = disk_write(&filename, &database, index).await {
                warn!(id = index, %err, "Skipped saving database snapshot");
            }
        });
    }

    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("valhaj-{}-{}", std::process::id(), name))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_labels() {
        let labels = labels();
        assert_eq!(labels.len(), config::CACHE_CONTAINER_SIZE);
        assert_eq!(labels[0], "data0.vdb");
        assert_eq!(labels[1], "data1.vdb");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let path = temp_path("round-trip.vdb");
        let source = ShardedCache::new(50);
        source.store("alpha", "1");
        source.store("beta", "2");
        source.store("gamma", "3");

        disk_write(&path, &source, 0).await.unwrap();

        let restored = ShardedCache::new(50);
        disk_read(&path, &restored, 0).await.unwrap();

        assert_eq!(restored.count().0, 3);
        assert_eq!(restored.load("alpha"), Some("1".to_string()));
        assert_eq!(restored.load("beta"), Some("2".to_string()));
        assert_eq!(restored.load("gamma"), Some("3".to_string()));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_empty_database_writes_nothing() {
        let path = temp_path("empty.vdb");
        let database = ShardedCache::new(50);

        let result = disk_write(&path, &database, 0).await;
        assert!(matches!(result, Err(SnapshotError::NoData)));
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_no_snapshot() {
        let path = temp_path("does-not-exist.vdb");
        let database = ShardedCache::new(50);

        let result = disk_read(&path, &database, 0).await;
        assert!(matches!(result, Err(SnapshotError::NoSnapshot)));
        assert_eq!(database.count().0, 0);
    }

    #[tokio::test]
    async fn test_odd_row_count_is_rejected() {
        let path = temp_path("odd.vdb");
        std::fs::write(&path, "key\nvalue\ndangling\n").unwrap();

        let database = ShardedCache::new(50);
        let result = disk_read(&path, &database, 0).await;
        assert!(matches!(result, Err(SnapshotError::Incomplete)));
        assert_eq!(database.count().0, 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_file_format_is_alternating_rows() {
        let path = temp_path("format.vdb");
        let database = ShardedCache::new(50);
        database.store("key", "value");

        disk_write(&path, &database, 0).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "key\nvalue\n");

        let _ = std::fs::remove_file(&path);
    }
}
