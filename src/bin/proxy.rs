//! Valhaj mTLS Terminating Proxy
//!
//! Accepts TLS 1.3 connections (client certificate required), forwards each
//! raw request line to a backend Valhaj instance and re-frames the
//! backend's reply as a single outer envelope whose count equals the number
//! of response lines the backend produced. The proxy adds no protocol
//! semantics beyond that outer framing: lines are never tokenized, and
//! empty lines are forwarded as-is.
//!
//! TLS material is read from the PEM paths in [`valhaj::config`]. Proxy
//! read failures are reported to the client as `-ERR (PRX) <msg>` and the
//! session closes.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{self, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use valhaj::client::{self, ClientError, Connection};
use valhaj::config;
use valhaj::protocol::{Envelope, Line};
use valhaj::Shutdown;

/// The proxy tolerates empty request lines; only the CRLF framing is
/// checked before forwarding.
const READ_EMPTY_MESSAGE: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    println!(
        "Welcome to {}-proxy, version {}.",
        config::RELEASE_TITLE,
        config::RELEASE_VERSION
    );

    let acceptor = tls_acceptor()?;
    let listener = TcpListener::bind(config::PROXY_INET_ADDRESS)
        .await
        .with_context(|| format!("binding {}", config::PROXY_INET_ADDRESS))?;
    info!(address = config::PROXY_INET_ADDRESS, "Listening");

    let shutdown = Shutdown::new();
    let serving = tokio::spawn(serve(listener, acceptor, shutdown.clone()));

    let mut sigterm = unix_signal(SignalKind::terminate())?;
    let mut quit_rx = shutdown.subscribe();
    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = quit_rx.changed() => info!("Shutting down after backend failure"),
    }

    shutdown.trigger();
    serving.await?;

    info!("Bye");
    Ok(())
}

/// Accepts connections until the quit broadcast fires, then drains the
/// session tasks.
async fn serve(listener: TcpListener, acceptor: TlsAcceptor, shutdown: Shutdown) {
    let mut quit_rx = shutdown.subscribe();
    let mut sessions: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = quit_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    let shutdown = shutdown.clone();
                    sessions.spawn(async move {
                        info!(client = %peer, "Client connected");
                        run_session(stream, acceptor, shutdown).await;
                        info!(client = %peer, "Client disconnected");
                    });
                }
                Err(err) => error!(%err, "Failed to accept connection"),
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(err) = finished {
                    if err.is_panic() {
                        error!(%err, "Recovering from session panic");
                    }
                }
            }
        }
    }

    info!("Closing listener");
    drop(listener);
    while sessions.join_next().await.is_some() {}
}

/// Terminates TLS, opens the backend leg and relays until either side
/// closes. A backend that cannot be reached takes the whole proxy down,
/// mirroring the reference behavior.
async fn run_session(stream: TcpStream, acceptor: TlsAcceptor, shutdown: Shutdown) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(err) => {
            error!(%err, "TLS handshake failed");
            return;
        }
    };

    let quit = shutdown.subscribe();
    let result = match config::PROXY_BACKEND_NETWORK {
        "unix" => match client::connect_unix(config::PROXY_BACKEND_ADDRESS).await {
            Ok(backend) => relay(tls, backend, quit).await,
            Err(err) => Err(err),
        },
        _ => match client::connect_tcp(config::PROXY_BACKEND_ADDRESS).await {
            Ok(backend) => relay(tls, backend, quit).await,
            Err(err) => Err(err),
        },
    };

    if let Err(err) = result {
        error!(%err, "Backend connection failed");
        shutdown.trigger();
    }
}

/// The relay loop: one raw client line in, one flattened outer envelope
/// out.
async fn relay<C, B>(
    stream: C,
    mut backend: Connection<B>,
    quit: watch::Receiver<bool>,
) -> Result<(), ClientError>
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;
    let mut line: Vec<u8> = Vec::new();
    let deadline = Duration::from_millis(config::SERVER_GRACEFUL_SHUTDOWN_DELAY_MS);

    loop {
        if *quit.borrow() {
            return Ok(());
        }

        match timeout(deadline, reader.read_until(b'\n', &mut line)).await {
            Err(_) => continue,
            Ok(Err(err)) => {
                let _ = write_proxy_error(&mut writer, &err.to_string()).await;
                return Ok(());
            }
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(_)) => {}
        }
        if line.last() != Some(&b'\n') {
            return Ok(());
        }
        if line.len() < READ_EMPTY_MESSAGE || line[line.len() - 2] != b'\r' {
            let _ =
                write_proxy_error(&mut writer, "incomplete or empty client data stream").await;
            return Ok(());
        }

        // Forward the stripped line; the backend re-adds its own CRLF
        let payload = line[..line.len() - 2].to_vec();
        line.clear();

        let fragments = match forward(&mut backend, &payload).await {
            Ok(fragments) => fragments,
            Err(err) => {
                let _ = write_proxy_error(&mut writer, &err.to_string()).await;
                return Ok(());
            }
        };

        // Flatten once: the backend's payload lines become the outer
        // envelope's payload, re-counted
        let outer = Envelope::from_lines(fragments.into_iter().map(Line::Value).collect());
        if writer.write_all(&outer.to_bytes()).await.is_err() {
            return Ok(());
        }
    }
}

async fn forward<B>(backend: &mut Connection<B>, payload: &[u8]) -> Result<Vec<String>, ClientError>
where
    B: AsyncRead + AsyncWrite + Unpin,
{
    backend.forward(payload).await?;
    backend.read_response().await
}

async fn write_proxy_error<W>(writer: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reply = Envelope::error(format!("(PRX) {message}"));
    writer.write_all(&reply.to_bytes()).await
}

/* TLS setup */

fn tls_acceptor() -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(config::PROXY_CERT_FILE)?;
    let key = load_key(config::PROXY_KEY_FILE)?;

    // Only certificates signed by the configured CA may connect
    let mut roots = RootCertStore::empty();
    for cert in load_certs(config::PROXY_CA_FILE)? {
        roots.add(cert)?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;

    let tls_config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
    let mut reader = std::io::BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificates in {path}"))?;
    Ok(certs)
}

fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing private key in {path}"))?
        .with_context(|| format!("no private key found in {path}"))
}
