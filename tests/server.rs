//! End-to-end tests driving a real server over TCP.

use ledgerkv::config::Config;
use ledgerkv::server::{Server, ShutdownError};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ShutdownError>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(log_path: &Path) -> Running {
    let config = Config {
        port: 0,
        log_path: log_path.to_string_lossy().into_owned(),
        flush_interval_ms: 50,
        shutdown_timeout_secs: 5,
        ..Config::default()
    };

    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    Running {
        addr,
        shutdown: tx,
        handle,
    }
}

/// Sends `request` and asserts the exact reply bytes.
async fn call(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
    client.write_all(request).await.unwrap();
    let mut reply = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut reply))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&reply),
        String::from_utf8_lossy(expected),
        "request {:?}",
        String::from_utf8_lossy(request)
    );
}

#[tokio::test]
async fn test_data_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("cache.json");

    let server = start(&log).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    call(&mut client, b"SET a 1 SYNC\r\n", b"+OK\r\n").await;
    call(&mut client, b"SET b 2\r\n", b"+OK\r\n").await;
    call(&mut client, b"SET c 3 EX 3600\r\n", b"+OK\r\n").await;
    call(&mut client, b"SET d 4\r\n", b"+OK\r\n").await;
    call(&mut client, b"DEL d SYNC\r\n", b"+OK\r\n").await;
    call(&mut client, b"DBSIZE\r\n", b":3\r\n").await;

    drop(client);
    server.stop().await;

    let server = start(&log).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    call(&mut client, b"DBSIZE\r\n", b":3\r\n").await;
    call(&mut client, b"GET a\r\n", b"$1\r\n1\r\n").await;
    call(&mut client, b"GET b\r\n", b"$1\r\n2\r\n").await;
    call(&mut client, b"GET c\r\n", b"$1\r\n3\r\n").await;
    call(&mut client, b"GET d\r\n", b"-NOTFOUND record not found\r\n").await;

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_background_flush_reaches_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("cache.json");

    let server = start(&log).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    call(&mut client, b"SET k v\r\n", b"+OK\r\n").await;

    // A few flush intervals later the write is on disk without a SAVE
    tokio::time::sleep(Duration::from_millis(300)).await;
    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("\"key\":\"k\""), "log was: {}", contents);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_expired_then_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir.path().join("cache.json")).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    call(&mut client, b"SET k v EX 1\r\n", b"+OK\r\n").await;
    call(&mut client, b"GET k\r\n", b"$1\r\nv\r\n").await;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    call(&mut client, b"GET k\r\n", b"-NOTFOUND record expired\r\n").await;
    call(&mut client, b"GET k\r\n", b"-NOTFOUND record not found\r\n").await;

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_error_replies_over_resp() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(&dir.path().join("cache.json")).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    call(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n",
        b"-ERR key should not be empty\r\n",
    )
    .await;
    call(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n",
        b"-ERR value should not be empty\r\n",
    )
    .await;
    call(
        &mut client,
        b"*1\r\n$5\r\nHELLO\r\n",
        b"-ERR unknown command 'HELLO'\r\n",
    )
    .await;
    call(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

    drop(client);
    server.stop().await;
}
