//! Valhaj Server Binary
//!
//! Boot order: statistics, databases, snapshot restore, listener. The
//! process then waits for SIGINT, SIGTERM or the SHUTDOWN command, drains
//! every session and saves snapshots before exiting. There are no flags;
//! all options are compile-time constants in [`valhaj::config`].

use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use valhaj::storage::{self, CacheContainer};
use valhaj::{config, Server, ServerStats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    println!(
        "Welcome to {}, version {}.",
        config::RELEASE_TITLE,
        config::RELEASE_VERSION
    );

    let stats = Arc::new(ServerStats::new());
    let container = Arc::new(CacheContainer::new(
        config::CACHE_CONTAINER_SIZE,
        config::CACHE_SHARD_COUNT,
    ));

    // Restore snapshots before accepting the first connection
    storage::restore_state(&container).await;

    let address = match config::SERVER_NETWORK {
        "unix" => config::SERVER_UNIX_ADDRESS,
        _ => config::SERVER_INET_ADDRESS,
    };
    let server = Server::bind(
        config::SERVER_NETWORK,
        address,
        Arc::clone(&container),
        stats,
    )
    .await?;

    let shutdown = server.shutdown_handle();
    let mut quit_rx = shutdown.subscribe();
    let serving = tokio::spawn(server.serve());

    // SIGINT, SIGTERM or an admin SHUTDOWN command all end up here
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = quit_rx.changed() => info!("Received SHUTDOWN command"),
    }

    shutdown.trigger();
    serving.await?;

    // Write snapshots once every session has drained
    storage::save_state(&container).await;

    info!("Bye");
    Ok(())
}
