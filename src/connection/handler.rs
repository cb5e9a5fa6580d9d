//! Per-client connection task.
//!
//! ```text
//!   accept ──> fill buffer ──> parse every complete request ──> execute
//!                  ▲                                              │
//!                  └──────────── write queued replies <───────────┘
//!
//!   ends on QUIT (after its +OK is written), EOF, or an unparseable request
//! ```
//!
//! Pipelined requests are answered in one write.

use crate::commands::CommandHandler;
use crate::protocol::{parse_request, ProtocolError, Request};
use bytes::BytesMut;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Unparsed bytes a client may leave buffered (one max-size bulk plus framing).
const MAX_PENDING_BYTES: usize = 65 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Server-wide connection counters, shared by every connection task.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    commands: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// A copy of [`ConnectionStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub commands: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    fn record_read(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn record_written(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that can never form a request
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Clean EOF between requests
    #[error("client closed the connection")]
    Closed,

    /// EOF in the middle of a request
    #[error("client closed the connection mid-request ({0} bytes unparsed)")]
    TruncatedRequest(usize),

    #[error("request exceeds {} buffered bytes", MAX_PENDING_BYTES)]
    RequestTooLarge,
}

impl ConnectionError {
    /// True for the ways a client normally goes away.
    fn is_hangup(&self) -> bool {
        match self {
            ConnectionError::Closed => true,
            ConnectionError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Serves one client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    peer: SocketAddr,
    /// Bytes read but not yet parsed
    inbound: BytesMut,
    /// Encoded replies not yet written
    outbound: Vec<u8>,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream: BufWriter::new(stream),
            peer,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: Vec::new(),
            commands,
            stats,
        }
    }

    /// Serves requests until the client quits, hangs up, or misbehaves.
    ///
    /// `Ok(())` means the client sent QUIT.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(peer = %self.peer, "Client connected");

        let outcome = self.serve().await;
        match &outcome {
            Ok(()) => debug!(peer = %self.peer, "Client quit"),
            Err(e) if e.is_hangup() => debug!(peer = %self.peer, "Client hung up"),
            Err(e) => info!(peer = %self.peer, error = %e, "Dropping connection"),
        }

        self.stats.closed();
        outcome
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let quit = self.execute_buffered()?;
            self.flush_replies().await?;
            if quit {
                return Ok(());
            }
            self.fill_buffer().await?;
        }
    }

    /// Executes every complete request in the buffer, queueing the replies.
    ///
    /// Returns true once a QUIT has been answered; anything after it is
    /// ignored.
    fn execute_buffered(&mut self) -> Result<bool, ConnectionError> {
        while let Some(request) = self.next_request()? {
            if request.is_empty() {
                continue;
            }

            let reply = self.commands.execute(&request);
            self.stats.record_command();
            trace!(peer = %self.peer, reply = %reply, "Executed");
            reply.encode_into(&mut self.outbound);

            if CommandHandler::is_quit(&request) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        match parse_request(&self.inbound) {
            Ok(Some((request, consumed))) => {
                let _ = self.inbound.split_to(consumed);
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Unparseable request");
                Err(e.into())
            }
        }
    }

    async fn fill_buffer(&mut self) -> Result<(), ConnectionError> {
        if self.inbound.len() >= MAX_PENDING_BYTES {
            return Err(ConnectionError::RequestTooLarge);
        }
        self.inbound.reserve(READ_CHUNK);

        let n = self.stream.get_mut().read_buf(&mut self.inbound).await?;
        if n == 0 {
            return Err(match self.inbound.len() {
                0 => ConnectionError::Closed,
                pending => ConnectionError::TruncatedRequest(pending),
            });
        }

        self.stats.record_read(n);
        Ok(())
    }

    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        if self.outbound.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.outbound).await?;
        self.stream.flush().await?;
        self.stats.record_written(self.outbound.len());
        self.outbound.clear();
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion. Outcomes are logged by the
/// handler itself.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let _ = ConnectionHandler::new(stream, peer, commands, stats)
        .run()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EngineConfig, NoopBackend, StorageEngine};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn spawn_listener() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::open(
            Arc::new(NoopBackend::new()),
            EngineConfig::new(Duration::from_secs(3600)),
        ));
        let stats = Arc::new(ConnectionStats::new());

        let shared = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let commands = CommandHandler::new(Arc::clone(&storage));
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    commands,
                    Arc::clone(&shared),
                ));
            }
        });

        (addr, stats)
    }

    async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    /// The server side closed: either FIN or RST is fine.
    async fn expect_closed(client: &mut TcpStream) {
        let mut rest = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut rest))
            .await
            .expect("connection still open");
        if let Ok(n) = read {
            assert_eq!(n, 0);
        }
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (addr, _) = spawn_listener().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"\r\n$5\r\nhello\r\n").await.unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client.write_all(b"GET k\r\n").await.unwrap();
        expect_reply(&mut client, b"$5\r\nhello\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_replies_keep_order() {
        let (addr, _) = spawn_listener().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"SET a 1\r\nSET b 2\r\n\r\nGET b\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\nGET c\r\n")
            .await
            .unwrap();
        expect_reply(
            &mut client,
            b"+OK\r\n+OK\r\n$1\r\n2\r\n$1\r\n1\r\n-NOTFOUND record not found\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _) = spawn_listener().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING\r\nQUIT\r\n").await.unwrap();
        expect_reply(&mut client, b"+PONG\r\n+OK\r\n").await;
        expect_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_protocol_error_drops_connection() {
        let (addr, _) = spawn_listener().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n:5\r\n").await.unwrap();
        expect_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let (addr, stats) = spawn_listener().await;
        assert_eq!(stats.snapshot(), ConnectionSnapshot::default());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"PING\r\nDBSIZE\r\n").await.unwrap();
        expect_reply(&mut client, b"+PONG\r\n:0\r\n").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.commands, 2);
        assert_eq!(snap.bytes_in, 14);
        assert_eq!(snap.bytes_out, 11);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.snapshot().active, 0);
    }
}
