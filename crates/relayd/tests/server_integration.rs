//! Integration tests for the TCP relay server.
//!
//! These tests run a real `RelayServer` on an ephemeral loopback port and
//! drive it with plain TCP clients speaking the line protocol.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{strip_line_ending, ServerLine};
use relayd::config::RelayConfig;
use relayd::registry::Registry;
use relayd::server::RelayServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for an expected line
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to listen when asserting that nothing arrives
const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Upper bound for tests that push enough data to fill socket buffers
const FLOOD_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between registry polls
const POLL_INTERVAL: Duration = Duration::from_millis(5);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawns a server on an ephemeral port.
    async fn spawn() -> Self {
        Self::spawn_with(RelayConfig::new("127.0.0.1", 0)).await
    }

    /// Spawns a server with a custom configuration.
    async fn spawn_with(config: RelayConfig) -> Self {
        let cancel_token = CancellationToken::new();
        let server = RelayServer::bind(config, cancel_token.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let registry = server.registry();

        let task = tokio::spawn(async move {
            server.run().await.expect("server run");
        });

        TestServer {
            addr,
            registry,
            cancel_token,
            task,
        }
    }

    /// Connects a raw client without sending a name.
    async fn connect_raw(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect");
        TestClient::new(stream)
    }

    /// Connects a client, sends its name and waits until it is registered.
    async fn join(&self, name: &str) -> TestClient {
        let before = self.registry.len().await;
        let mut client = self.connect_raw().await;
        client.send(name).await;
        self.wait_for_peers(before + 1).await;
        client
    }

    /// Waits until the registry holds exactly `expected` peers.
    async fn wait_for_peers(&self, expected: usize) {
        let start = Instant::now();
        loop {
            let len = self.registry.len().await;
            if len == expected {
                return;
            }
            assert!(
                start.elapsed() < RECV_TIMEOUT,
                "registry has {len} peers, expected {expected}"
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Shuts down the server and waits for it to finish.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server stops in time")
            .expect("server task");
    }
}

/// Test client connection with line helpers.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one line.
    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    /// Sends raw bytes.
    async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives one line, panicking if none arrives in time.
    async fn recv(&mut self) -> String {
        self.recv_timeout(RECV_TIMEOUT)
            .await
            .expect("expected a line from the server")
    }

    /// Receives one line and parses it.
    async fn recv_parsed(&mut self) -> ServerLine {
        ServerLine::parse(&self.recv().await).expect("well-formed relay line")
    }

    /// Receives one line if it arrives within `duration`.
    async fn recv_timeout(&mut self, duration: Duration) -> Option<String> {
        let mut line = String::new();
        match timeout(duration, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(strip_line_ending(&line).to_string()),
            _ => None,
        }
    }

    /// Asserts that nothing arrives for a short while.
    async fn assert_quiet(&mut self) {
        if let Some(line) = self.recv_timeout(QUIET_PERIOD).await {
            panic!("expected no line, got {line:?}");
        }
    }

    /// Drains any pending lines and asserts the server closed the stream.
    async fn expect_eof(&mut self) {
        let start = Instant::now();
        loop {
            let mut line = String::new();
            let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("stream closes in time")
                .unwrap_or(0);
            if read == 0 {
                return;
            }
            assert!(start.elapsed() < RECV_TIMEOUT, "stream never closed");
        }
    }

    /// Closes the client's write side, signalling EOF to the server.
    async fn hang_up(mut self) -> BufReader<OwnedReadHalf> {
        self.writer.shutdown().await.unwrap();
        self.reader
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_server_accepts_connection() {
    let server = TestServer::spawn().await;
    let _client = server.join("alice").await;
    assert_eq!(server.registry.names().await[0].as_str(), "alice");
    server.shutdown().await;
}

#[tokio::test]
async fn test_chat_scenario() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    alice.assert_quiet().await;

    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "🟢 bob joined the chat");
    bob.assert_quiet().await;

    alice.send("hi").await;
    assert_eq!(bob.recv().await, "alice: hi");
    // No server-side exclusion: the sender receives its own line too
    assert_eq!(alice.recv().await, "alice: hi");

    drop(bob.hang_up().await);
    assert_eq!(alice.recv().await, "🔴 bob left the chat");
    server.wait_for_peers(1).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_join_reaches_earlier_clients_only() {
    let server = TestServer::spawn().await;

    let mut first = server.join("first").await;
    let mut second = server.join("second").await;
    assert_eq!(first.recv().await, "🟢 second joined the chat");

    let mut third = server.join("third").await;
    assert_eq!(first.recv().await, "🟢 third joined the chat");
    assert_eq!(second.recv().await, "🟢 third joined the chat");
    third.assert_quiet().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_message_round_trip() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    alice.recv().await; // bob joined

    alice.send("hello").await;
    assert_eq!(
        bob.recv_parsed().await,
        ServerLine::Chat {
            name: "alice".to_string(),
            text: "hello".to_string(),
        }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_line_not_broadcast() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    alice.recv().await; // bob joined

    alice.send("").await;
    bob.assert_quiet().await;

    alice.send("after").await;
    assert_eq!(bob.recv().await, "alice: after");

    server.shutdown().await;
}

#[tokio::test]
async fn test_crlf_lines_accepted() {
    let server = TestServer::spawn().await;

    let mut watcher = server.join("watcher").await;
    let mut telnet = server.connect_raw().await;
    telnet.send_raw(b"old-school\r\n").await;
    assert_eq!(watcher.recv().await, "🟢 old-school joined the chat");

    telnet.send_raw(b"hello\r\n").await;
    assert_eq!(watcher.recv().await, "old-school: hello");

    server.shutdown().await;
}

#[tokio::test]
async fn test_blank_name_falls_back_to_address() {
    let server = TestServer::spawn().await;

    let mut watcher = server.join("watcher").await;
    let mut anon = server.connect_raw().await;
    let local = anon.writer.local_addr().unwrap();
    anon.send("").await;

    let expected = format!("🟢 {}:{} joined the chat", local.ip(), local.port());
    assert_eq!(watcher.recv().await, expected);

    server.shutdown().await;
}

#[tokio::test]
async fn test_multiline_message_split_into_lines() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    alice.recv().await; // bob joined

    alice.send_raw(b"line one\nline two\n").await;
    assert_eq!(bob.recv().await, "alice: line one");
    assert_eq!(bob.recv().await, "alice: line two");

    server.shutdown().await;
}

#[tokio::test]
async fn test_sender_order_preserved() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    alice.recv().await; // bob joined

    for i in 0..20 {
        alice.send(&format!("msg {i}")).await;
    }
    for i in 0..20 {
        assert_eq!(bob.recv().await, format!("alice: msg {i}"));
    }

    server.shutdown().await;
}

// ============================================================================
// Registry Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_registry_tracks_live_sessions() {
    let server = TestServer::spawn().await;

    let mut clients = Vec::new();
    for i in 0..5 {
        clients.push(server.join(&format!("user-{i}")).await);
    }
    server.wait_for_peers(5).await;

    let leaving: Vec<_> = clients.drain(..2).collect();
    for client in leaving {
        drop(client.hang_up().await);
    }
    server.wait_for_peers(3).await;

    drop(clients);
    server.wait_for_peers(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_leave_delivered_despite_dead_peer() {
    let server = TestServer::spawn().await;

    // The dead peer joins first so it is written to before the live one
    let mut ghost = server.join("ghost").await;
    let mut alice = server.join("alice").await;
    assert_eq!(ghost.recv().await, "🟢 alice joined the chat");
    let bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "🟢 bob joined the chat");

    // Make ghost unreachable from the server's side without it leaving
    let (_, ghost_peer) = server
        .registry
        .snapshot()
        .await
        .into_iter()
        .find(|(_, peer)| peer.name.as_str() == "ghost")
        .expect("ghost registered");
    ghost_peer.outbound.close().await.unwrap();

    drop(bob.hang_up().await);

    // alice still gets bob's leave, and ghost's own leave once evicted.
    // The two come from different sessions, so their order is not fixed.
    let mut leaves = vec![alice.recv().await, alice.recv().await];
    leaves.sort();
    assert_eq!(leaves, vec!["🔴 bob left the chat", "🔴 ghost left the chat"]);
    server.wait_for_peers(1).await;

    // ghost's socket is shut down, not leaked
    ghost.expect_eof().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_stalled_reader_evicted_without_blocking_sender() {
    let config = RelayConfig::new("127.0.0.1", 0).with_write_timeout(Duration::from_millis(250));
    let server = TestServer::spawn_with(config).await;

    // Joins but never reads, so its socket buffers eventually fill up
    let _stalled = server.join("stalled").await;
    let alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    // alice keeps draining her own copies so only the stalled client backs up
    let TestClient {
        reader: mut alice_reader,
        writer: mut alice_writer,
    } = alice;
    let alice_drain = tokio::spawn(async move {
        let mut line = String::new();
        while alice_reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            line.clear();
        }
    });

    // bob drains everything until both the leave and alice's last line arrive.
    // They come from different sessions, so either may be first.
    let bob_watch = tokio::spawn(async move {
        let (mut saw_leave, mut saw_last) = (false, false);
        while !(saw_leave && saw_last) {
            let line = bob
                .recv_timeout(FLOOD_TIMEOUT)
                .await
                .expect("bob stays connected");
            match line.as_str() {
                "🔴 stalled left the chat" => saw_leave = true,
                "alice: still here" => saw_last = true,
                _ => {}
            }
        }
    });

    let payload = format!("{}\n", "x".repeat(64 * 1024));
    let flood = async {
        for _ in 0..512 {
            alice_writer.write_all(payload.as_bytes()).await.unwrap();
            if !server
                .registry
                .names()
                .await
                .iter()
                .any(|name| name.as_str() == "stalled")
            {
                return;
            }
        }
        panic!("stalled client was never evicted");
    };
    timeout(FLOOD_TIMEOUT, flood)
        .await
        .expect("sender keeps making progress while a peer is stalled");

    server.wait_for_peers(2).await;

    // alice's session is still relaying after the eviction
    alice_writer.write_all(b"still here\n").await.unwrap();
    timeout(FLOOD_TIMEOUT, bob_watch)
        .await
        .expect("bob sees the leave and alice's later line")
        .unwrap();

    alice_drain.abort();
    server.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_client_streams() {
    let server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    server.shutdown().await;

    alice.expect_eof().await;
    bob.expect_eof().await;
}

#[tokio::test]
async fn test_no_new_connections_after_shutdown() {
    let server = TestServer::spawn().await;
    let addr = server.addr;
    server.shutdown().await;

    let result = timeout(RECV_TIMEOUT, TcpStream::connect(addr)).await;
    assert!(matches!(result, Ok(Err(_))), "listener should be closed");
}
