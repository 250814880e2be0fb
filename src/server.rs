//! Listener & Shutdown Coordination
//!
//! The server owns the accept loop and the process-global quit broadcast.
//! Each accepted connection becomes an independent session task; a session
//! that panics is reaped and logged without disturbing the listener or its
//! peers.
//!
//! ## Shutdown Sequence
//!
//! 1. [`Shutdown::trigger`] flips the quit broadcast (SIGINT/SIGTERM in
//!    `main`, or the `SHUTDOWN` command from an admin session).
//! 2. The accept loop notices, stops accepting and drops the listener.
//! 3. Every session polls the broadcast between commands and returns; the
//!    per-read deadline bounds how long that takes.
//! 4. [`Server::serve`] returns once the last session has drained, after
//!    which the caller saves snapshots.

use crate::commands::Dispatcher;
use crate::connection::{self, Peer};
use crate::stats::ServerStats;
use crate::storage::CacheContainer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Byte stream a session runs over. Blanket-implemented for every duplex
/// async stream, so TCP, Unix and TLS connections all qualify.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

/// Cloneable handle to the process-global quit broadcast.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Signals every subscriber to wind down. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns a receiver that observes the quit flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The bound transport, TCP or Unix domain socket.
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    async fn accept(&self) -> io::Result<(Box<dyn SessionStream>, Peer)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Box::new(stream), Peer::Tcp(addr)))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), Peer::Unix))
            }
        }
    }
}

/// The Valhaj server: one listener, one quit broadcast, N session tasks.
pub struct Server {
    listener: Listener,
    shutdown: Shutdown,
    dispatcher: Dispatcher,
}

impl Server {
    /// Binds the requested transport and prepares the shared dispatcher.
    /// `network` is `"tcp"` or `"unix"`; anything else is rejected.
    pub async fn bind(
        network: &str,
        address: &str,
        container: Arc<CacheContainer>,
        stats: Arc<ServerStats>,
    ) -> io::Result<Self> {
        let shutdown = Shutdown::new();
        let listener = match network {
            "tcp" => Listener::Tcp(TcpListener::bind(address).await?),
            "unix" => {
                // A stale socket file from an unclean exit blocks the bind
                let _ = std::fs::remove_file(address);
                Listener::Unix(UnixListener::bind(address)?)
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network '{network}'"),
                ));
            }
        };
        info!(network, address, "Listening");

        let dispatcher = Dispatcher::new(container, stats, shutdown.clone());
        Ok(Self {
            listener,
            shutdown,
            dispatcher,
        })
    }

    /// The bound TCP address, if the TCP transport is active. Lets tests
    /// bind port 0 and discover the assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(_) => None,
        }
    }

    /// Handle for triggering or observing shutdown from outside the server.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accepts connections until the quit broadcast fires, then drains all
    /// session tasks before returning.
    pub async fn serve(self) {
        let mut quit_rx = self.shutdown.subscribe();
        let mut sessions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = quit_rx.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = self.dispatcher.clone();
                        let quit = self.shutdown.subscribe();
                        sessions.spawn(connection::run(stream, peer, dispatcher, quit));
                    }
                    Err(err) => error!(%err, "Failed to accept connection"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(finished);
                }
            }
        }

        info!("Closing listener");
        drop(self.listener);

        while let Some(finished) = sessions.join_next().await {
            reap(finished);
        }
        info!("All sessions drained");
    }
}

/// Logs a session that ended abnormally. A panicking session must never
/// take down the listener or its peers.
fn reap(finished: Result<(), tokio::task::JoinError>) {
    if let Err(err) = finished {
        if err.is_panic() {
            error!(%err, "Recovering from session panic");
        }
    }
}
