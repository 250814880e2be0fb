//! Connection Handler
//!
//! Runs one client session: reads CRLF-terminated request lines under a
//! deadline, tokenizes them, hands them to the command dispatcher and
//! writes the framed reply back. The loop polls the process-global quit
//! broadcast between commands, so a quiescent session notices shutdown
//! within one read deadline.
//!
//! ## Error Policy
//!
//! - Deadline expiry: loop back and poll the quit broadcast.
//! - EOF: the client went away; return silently.
//! - Framing/other read errors: report one framed `-ERR` and close.
//! - Empty tokenized command: `-ERR superfluous write` and close.
//! - Write errors: close without further attempts.

use crate::commands::Dispatcher;
use crate::config;
use crate::protocol::parser::{self, ParseError};
use crate::protocol::Envelope;
use crate::server::SessionStream;
use crate::storage::ShardedCache;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

/// Where a connection came from. Decides administrative privileges:
/// Unix-socket peers and loopback TCP peers may issue FLUSH, FLUSHALL and
/// SHUTDOWN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// Connected over the Unix domain socket.
    Unix,
    /// Connected over TCP from the given remote address.
    Tcp(SocketAddr),
}

impl Peer {
    /// True when the peer is local: a Unix socket, or a remote address
    /// containing the IPv4 or IPv6 loopback literal.
    pub fn is_admin(&self) -> bool {
        match self {
            Peer::Unix => true,
            Peer::Tcp(addr) => {
                let address = addr.to_string();
                address.contains("127.0.0.1") || address.contains("[::1]")
            }
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Unix => write!(f, "unix"),
            Peer::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// What a single read attempt produced.
enum Read {
    /// A complete tokenized command.
    Command(Vec<String>),
    /// The deadline expired; poll quit and try again.
    Deadline,
    /// The client closed the connection.
    Eof,
    /// A framing or transport error to report before closing.
    Failed(String),
}

/// Runs a session to completion. Spawned once per accepted connection.
pub async fn run(
    stream: Box<dyn SessionStream>,
    peer: Peer,
    dispatcher: Dispatcher,
    quit: watch::Receiver<bool>,
) {
    info!(client = %peer, "Client connected");
    session_loop(stream, &peer, dispatcher, quit).await;
    info!(client = %peer, "Client disconnected");
}

async fn session_loop(
    stream: Box<dyn SessionStream>,
    peer: &Peer,
    dispatcher: Dispatcher,
    quit: watch::Receiver<bool>,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    // Partial lines survive deadline expiry in this buffer: `read_until`
    // appends, and a cancelled read leaves what it got so far in place.
    let mut line: Vec<u8> = Vec::new();

    let mut index = 0usize;
    let mut bound: Option<usize> = None;
    let mut database: Arc<ShardedCache> = Arc::clone(dispatcher.container().database(0));

    loop {
        if *quit.borrow() {
            return;
        }

        let arguments = match read_command(&mut reader, &mut line).await {
            Read::Deadline => continue,
            Read::Eof => return,
            Read::Failed(message) => {
                // The connection is closing anyway; a failed write here is moot
                let _ = write_reply(&mut writer, &Envelope::error(message)).await;
                return;
            }
            Read::Command(arguments) => arguments,
        };

        if arguments.is_empty() {
            let _ = write_reply(&mut writer, &Envelope::error("superfluous write")).await;
            return;
        }

        // Only update the database reference when the index changed
        if bound != Some(index) {
            database = Arc::clone(dispatcher.container().database(index));
            bound = Some(index);
        }

        let outcome = dispatcher.execute(&arguments, peer, index, &database).await;
        if write_reply(&mut writer, &outcome.reply).await.is_err() {
            debug!(client = %peer, "Write failed, closing session");
            return;
        }

        index = outcome.next_index;
        if !outcome.keep_open {
            return;
        }
    }
}

/// Reads one line under the graceful-shutdown deadline and tokenizes it.
async fn read_command<R>(reader: &mut BufReader<R>, line: &mut Vec<u8>) -> Read
where
    R: tokio::io::AsyncRead + Unpin,
{
    let deadline = Duration::from_millis(config::SERVER_GRACEFUL_SHUTDOWN_DELAY_MS);
    let read = match timeout(deadline, reader.read_until(b'\n', line)).await {
        Err(_) => return Read::Deadline,
        Ok(Err(err)) => return Read::Failed(err.to_string()),
        Ok(Ok(n)) => n,
    };

    // `read_until` without a trailing delimiter means the stream ended;
    // any partial command is discarded with it.
    if read == 0 || line.last() != Some(&b'\n') {
        return Read::Eof;
    }

    let result = parse_line(line);
    line.clear();
    match result {
        Ok(arguments) => Read::Command(arguments),
        Err(err) => Read::Failed(err.to_string()),
    }
}

fn parse_line(line: &[u8]) -> Result<Vec<String>, ParseError> {
    let payload = parser::strip_line(line)?;
    parser::tokenize(payload)
}

async fn write_reply<W>(writer: &mut BufWriter<W>, reply: &Envelope) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(&reply.to_bytes()).await?;
    writer.flush().await
}
