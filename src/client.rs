//! Wire Client
//!
//! A minimal client for the Valhaj line protocol, shared by the REPL, the
//! proxy's backend leg and the end-to-end tests. It sends one query line
//! and reads back one framed envelope: the `!N` count header followed by N
//! response fragments, each stripped of its CRLF terminator.

use std::io;
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::{TcpStream, UnixStream};

/// Shortest acceptable raw line from the server: just CRLF. Unlike the
/// server side, empty fragments are legal, they mean "missing".
const READ_EMPTY_MESSAGE: usize = 2;

/// Shortest acceptable count header: `!` plus one digit.
const COUNT_MIN_MESSAGE: usize = 2;

/// Errors produced while talking to a Valhaj server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server closed the connection or sent a malformed line.
    #[error("incomplete or empty server data stream")]
    IncompleteData,

    /// The response did not start with a parsable `!N` count header.
    #[error("invalid count protocol response format")]
    InvalidCount,

    /// Underlying transport failure.
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
}

/// One open connection to a Valhaj server.
pub struct Connection<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wraps an established byte stream.
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Sends one query line and collects the server's framed response as a
    /// list of fragments, one per payload line.
    pub async fn exec(&mut self, query: &str) -> Result<Vec<String>, ClientError> {
        self.writer.write_all(query.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;

        self.read_response().await
    }

    /// Reads one framed envelope without sending anything. Used by the
    /// proxy, which forwards the raw query bytes itself.
    pub async fn read_response(&mut self) -> Result<Vec<String>, ClientError> {
        let header = self.read_line().await?;
        if header.len() < COUNT_MIN_MESSAGE || !header.starts_with('!') {
            return Err(ClientError::InvalidCount);
        }
        let count: usize = header[1..].parse().map_err(|_| ClientError::InvalidCount)?;

        let mut fragments = Vec::with_capacity(count);
        for _ in 0..count {
            fragments.push(self.read_line().await?);
        }
        Ok(fragments)
    }

    /// Sends raw, already-terminated bytes to the server.
    pub async fn forward(&mut self, line: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Reads one CRLF-terminated line and strips the terminator.
    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = Vec::new();
        let read = self.reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Err(ClientError::IncompleteData);
        }

        if line.len() < READ_EMPTY_MESSAGE || line[line.len() - 2] != b'\r' {
            return Err(ClientError::IncompleteData);
        }
        line.truncate(line.len() - 2);
        String::from_utf8(line).map_err(|_| ClientError::IncompleteData)
    }
}

/// Opens an unencrypted TCP connection to the server.
pub async fn connect_tcp(address: &str) -> Result<Connection<TcpStream>, ClientError> {
    let stream = TcpStream::connect(address).await?;
    Ok(Connection::new(stream))
}

/// Opens a connection over the server's Unix domain socket.
pub async fn connect_unix(path: &str) -> Result<Connection<UnixStream>, ClientError> {
    let stream = UnixStream::connect(path).await?;
    Ok(Connection::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one connection with a canned byte response.
    async fn canned_server(response: &'static [u8]) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut scratch = [0u8; 256];
            let _ = stream.read(&mut scratch).await;
            stream.write_all(response).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_exec_reads_framed_response() {
        let addr = canned_server(b"!3\r\nhi\r\nbye\r\n\r\n").await;
        let mut connection = connect_tcp(&addr.to_string()).await.unwrap();

        let fragments = connection.exec("MGET a b c").await.unwrap();
        assert_eq!(fragments, vec!["hi", "bye", ""]);
    }

    #[tokio::test]
    async fn test_exec_rejects_missing_count_header() {
        let addr = canned_server(b"+OK\r\n").await;
        let mut connection = connect_tcp(&addr.to_string()).await.unwrap();

        assert!(matches!(
            connection.exec("GET k").await,
            Err(ClientError::InvalidCount)
        ));
    }

    #[tokio::test]
    async fn test_exec_rejects_bare_newline() {
        let addr = canned_server(b"!1\n+OK\n").await;
        let mut connection = connect_tcp(&addr.to_string()).await.unwrap();

        assert!(matches!(
            connection.exec("GET k").await,
            Err(ClientError::IncompleteData)
        ));
    }
}
