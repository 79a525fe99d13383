//! End-to-end scenarios over loopback TCP: echo round-trips, backpressure,
//! pool limits, shutdown with purge, overflow isolation, and dispatch.

#![cfg(not(feature = "loom"))]

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

use lite_net::client::Client;
use lite_net::config::Config;
use lite_net::counter::Counter;
use lite_net::error::Result;
use lite_net::protocol::{Protocol, Side, SocketReader, SocketWriter};
use lite_net::server::Server;
use lite_net::socket::Socket;

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// State shared between a protocol instance and the test body.
#[derive(Clone)]
struct Shared {
    /// Frames observed by `read`, delimiter stripped.
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Counts down once per observed frame; tests `add` the expected total
    /// up front and wait for zero.
    seen_count: Arc<Counter>,
    /// Leftovers surfaced by `purge`.
    purged: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            seen_count: Arc::new(Counter::new()),
            purged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }

    fn purged(&self) -> Vec<Vec<u8>> {
        self.purged.lock().unwrap().clone()
    }
}

/// Newline-framed test protocol. Records every frame it reads; optionally
/// echoes them back, optionally parks its `write` callback behind a gate.
struct LineProto {
    shared: Shared,
    gate: Option<watch::Receiver<bool>>,
    echo: bool,
}

impl LineProto {
    fn plain(shared: &Shared) -> Self {
        Self {
            shared: shared.clone(),
            gate: None,
            echo: false,
        }
    }

    fn echo(shared: &Shared) -> Self {
        Self {
            shared: shared.clone(),
            gate: None,
            echo: true,
        }
    }

    fn gated(shared: &Shared, gate: watch::Receiver<bool>) -> Self {
        Self {
            shared: shared.clone(),
            gate: Some(gate),
            echo: false,
        }
    }
}

#[async_trait]
impl Protocol for LineProto {
    type Message = Vec<u8>;
    type Context = ();

    async fn read(
        &self,
        _side: Side,
        socket: &Socket<Self>,
        reader: &mut SocketReader,
    ) -> Result<()> {
        loop {
            let (frame, len) = {
                let line = reader.read_line().await?;
                (line[..line.len() - 1].to_vec(), line.len())
            };
            self.shared.seen.lock().unwrap().push(frame.clone());
            self.shared.seen_count.add(-1);
            if self.echo {
                socket.write(frame).await?;
            }
            reader.shift(len);
        }
    }

    async fn write(
        &self,
        _side: Side,
        _socket: &Socket<Self>,
        writer: &mut SocketWriter,
        batch: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map_err(|_| lite_net::error::Error::Cancelled)?;
        }
        for message in batch.iter() {
            writer.write(message).await?;
            writer.write(b"\n").await?;
        }
        writer.flush().await
    }

    async fn purge(&self, _side: Side, _socket: &Socket<Self>, leftover: Vec<Vec<u8>>) {
        self.shared.purged.lock().unwrap().extend(leftover);
    }
}

async fn read_line_raw(stream: &mut TcpStream) -> Vec<u8> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        // A reset from a connection the server dropped counts as closed.
        let n = match stream.read(&mut byte).await {
            Ok(n) => n,
            Err(_) => 0,
        };
        if n == 0 {
            break;
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    line
}

async fn echo_roundtrip(stream: &mut TcpStream, line: &[u8]) -> Vec<u8> {
    stream.write_all(line).await.unwrap();
    read_line_raw(stream).await
}

#[tokio::test]
async fn line_echo_four_messages_and_client_restart() {
    init_tracing();

    let server_shared = Shared::new();
    let client_shared = Shared::new();

    let server = Server::bind(any_addr(), LineProto::echo(&server_shared), Config::server())
        .expect("bind");
    server.serve().expect("serve");

    server_shared.seen_count.add(4);
    client_shared.seen_count.add(4);

    let client = Client::new(
        server.local_addr(),
        LineProto::plain(&client_shared),
        Config::client(),
    );
    for message in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec(), b"D".to_vec()] {
        client.write(message).await.expect("write");
    }

    timeout(Duration::from_secs(5), server_shared.seen_count.wait())
        .await
        .expect("server should observe all four");
    timeout(Duration::from_secs(5), client_shared.seen_count.wait())
        .await
        .expect("client should observe all four echoes");

    assert_eq!(server_shared.seen(), vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec(), b"D".to_vec()]);
    assert_eq!(client_shared.seen(), vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec(), b"D".to_vec()]);

    timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("client shutdown");
    assert_eq!(client.connection_count().await, 0);
    assert!(client_shared.purged().is_empty());

    // Restart: a fresh client against the same server repeats the exchange.
    let restart_shared = Shared::new();
    server_shared.seen_count.add(4);
    restart_shared.seen_count.add(4);

    let restarted = Client::new(
        server.local_addr(),
        LineProto::plain(&restart_shared),
        Config::client(),
    );
    for message in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec(), b"D".to_vec()] {
        restarted.write(message).await.expect("write after restart");
    }

    timeout(Duration::from_secs(5), server_shared.seen_count.wait())
        .await
        .expect("server should observe the restarted batch");
    assert_eq!(server_shared.seen().len(), 8);

    timeout(Duration::from_secs(5), restarted.shutdown())
        .await
        .expect("restarted client shutdown");
    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
    assert_eq!(server.connection_count().await, 0);
}

#[tokio::test]
async fn backpressure_parks_writer_until_gate_opens() {
    init_tracing();

    let server_shared = Shared::new();
    let client_shared = Shared::new();
    let (gate_tx, gate_rx) = watch::channel(false);

    let server = Server::bind(any_addr(), LineProto::plain(&server_shared), Config::server())
        .expect("bind");
    server.serve().expect("serve");

    server_shared.seen_count.add(6);

    let client = Client::new(
        server.local_addr(),
        LineProto::gated(&client_shared, gate_rx),
        Config::client()
            .max_connections(1)
            .write_queue_size(NonZeroUsize::new(4).unwrap()),
    );

    // First message gets drained into the gated write callback immediately.
    client.write(b"m0".to_vec()).await.expect("write m0");
    sleep(Duration::from_millis(100)).await;

    // The next four fill the queue behind the parked writer.
    for i in 1..=4u8 {
        client
            .write(format!("m{i}").into_bytes())
            .await
            .expect("write queued");
    }

    // The sixth has nowhere to go and must park.
    let parked_client = client.clone();
    let parked = tokio::spawn(async move { parked_client.write(b"m5".to_vec()).await });
    sleep(Duration::from_millis(100)).await;
    assert!(!parked.is_finished(), "write must park while the queue is full");

    gate_tx.send(true).unwrap();

    timeout(Duration::from_secs(5), server_shared.seen_count.wait())
        .await
        .expect("all six messages should arrive after the gate opens");
    parked.await.unwrap().expect("parked write completes");

    let expected: Vec<Vec<u8>> = (0..=5).map(|i| format!("m{i}").into_bytes()).collect();
    assert_eq!(server_shared.seen(), expected);

    timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("client shutdown");
    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}

#[tokio::test]
async fn server_full_rejects_and_recovers() {
    init_tracing();

    let server_shared = Shared::new();
    let server = Server::bind(
        any_addr(),
        LineProto::echo(&server_shared),
        Config::server().max_connections(2),
    )
    .expect("bind");
    server.serve().expect("serve");
    let addr = server.local_addr();

    let mut s1 = TcpStream::connect(addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut s1, b"one\n").await, b"one\n");
    let mut s2 = TcpStream::connect(addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut s2, b"two\n").await, b"two\n");
    assert_eq!(server.connection_count().await, 2);

    // Third dial: the OS accepts, the server's accept path rejects and
    // drops it, and the peer observes EOF.
    let mut s3 = TcpStream::connect(addr).await.unwrap();
    let _ = s3.write_all(b"three\n").await;
    let eof = timeout(Duration::from_secs(5), read_line_raw(&mut s3))
        .await
        .expect("rejected dial should see EOF");
    assert!(eof.is_empty(), "rejected connection must be closed unanswered");

    // Closing one connection frees a slot for a later dial.
    drop(s1);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count().await, 1);

    let mut s4 = TcpStream::connect(addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut s4, b"four\n").await, b"four\n");
    assert_eq!(server.connection_count().await, 2);

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}

#[tokio::test]
async fn graceful_shutdown_purges_undelivered_tail() {
    init_tracing();

    let server_shared = Shared::new();
    let client_shared = Shared::new();
    // Never opened: the writer stays parked and the tail stays queued.
    let (_gate_tx, gate_rx) = watch::channel(false);

    let server = Server::bind(any_addr(), LineProto::plain(&server_shared), Config::server())
        .expect("bind");
    server.serve().expect("serve");

    let client = Client::new(
        server.local_addr(),
        LineProto::gated(&client_shared, gate_rx),
        Config::client()
            .max_connections(1)
            .write_queue_size(NonZeroUsize::new(16).unwrap()),
    );

    // First message is drained into the parked callback ...
    client.write(b"m0".to_vec()).await.expect("write m0");
    sleep(Duration::from_millis(150)).await;
    // ... the other nine stay in the write queue.
    for i in 1..10u8 {
        client
            .write(format!("m{i}").into_bytes())
            .await
            .expect("write queued");
    }

    timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("shutdown must not outlive its tasks");
    assert_eq!(client.connection_count().await, 0);

    // The undelivered tail is observed by purge, in FIFO order.
    let expected: Vec<Vec<u8>> = (1..10).map(|i| format!("m{i}").into_bytes()).collect();
    assert_eq!(client_shared.purged(), expected);
    assert!(server_shared.seen().is_empty());

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}

#[tokio::test]
async fn reader_overflow_isolated_to_one_connection() {
    init_tracing();

    let server_shared = Shared::new();
    let server = Server::bind(
        any_addr(),
        LineProto::echo(&server_shared),
        Config::server().read_buffer_size(64),
    )
    .expect("bind");
    server.serve().expect("serve");
    let addr = server.local_addr();

    let mut poisoned = TcpStream::connect(addr).await.unwrap();
    let mut healthy = TcpStream::connect(addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut healthy, b"before\n").await, b"before\n");

    // A 200-byte frame cannot fit a 64-byte reader buffer; that connection
    // alone dies with BufferOverflow.
    poisoned.write_all(&[b'x'; 200]).await.unwrap();
    let eof = timeout(Duration::from_secs(5), read_line_raw(&mut poisoned))
        .await
        .expect("overflowing connection should be closed");
    assert!(eof.is_empty());

    // The other connection never notices.
    assert_eq!(echo_roundtrip(&mut healthy, b"after\n").await, b"after\n");

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}

#[tokio::test]
async fn least_loaded_dispatch_prefers_idle_then_smallest() {
    init_tracing();

    let server_shared = Shared::new();
    let client_shared = Shared::new();
    let (_gate_tx, gate_rx) = watch::channel(false);

    let server = Server::bind(any_addr(), LineProto::plain(&server_shared), Config::server())
        .expect("bind");
    server.serve().expect("serve");

    let client = Client::new(
        server.local_addr(),
        LineProto::gated(&client_shared, gate_rx),
        Config::client().max_connections(2),
    );

    // Empty pool: the first pick opens connection 1.
    let s1 = client.socket().await.expect("open first connection");
    s1.write(b"a".to_vec()).await.unwrap();
    sleep(Duration::from_millis(100)).await; // drained into the parked writer

    // pending == 0 on connection 1, so it is reused.
    let s2 = client.socket().await.expect("reuse idle connection");
    assert!(Arc::ptr_eq(&s1, &s2));
    s2.write(b"b".to_vec()).await.unwrap(); // conn1 pending: 1

    // No idle connection and the pool is under its bound: connection 2.
    let s3 = client.socket().await.expect("open second connection");
    assert!(!Arc::ptr_eq(&s1, &s3));
    assert_eq!(client.connection_count().await, 2);
    s3.write(b"c".to_vec()).await.unwrap();
    sleep(Duration::from_millis(100)).await; // drained into the parked writer

    // conn1 pending 1, conn2 pending 0: the idle one wins.
    let s4 = client.socket().await.expect("pick idle connection 2");
    assert!(Arc::ptr_eq(&s3, &s4));
    s4.write(b"d".to_vec()).await.unwrap(); // conn2 pending: 1

    // Both pending 1 and the pool is at its bound: earliest in pool order.
    let s5 = client.socket().await.expect("tie goes to pool order");
    assert!(Arc::ptr_eq(&s1, &s5));
    s5.write(b"e".to_vec()).await.unwrap(); // conn1 pending: 2

    // conn1 pending 2, conn2 pending 1: least loaded wins.
    let s6 = client.socket().await.expect("pick least loaded");
    assert!(Arc::ptr_eq(&s3, &s6));

    assert_eq!(client.connection_count().await, 2, "pool never exceeds its bound");

    timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("client shutdown");
    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}

/// Handshake-produced context is visible to later callbacks, and a read
/// loop returning `Ok` tears the connection down cleanly.
struct HelloProto {
    greetings: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Protocol for HelloProto {
    type Message = Vec<u8>;
    type Context = String;

    async fn handshake(&self, side: Side, socket: &Socket<Self>) -> Result<String> {
        Ok(format!("{side}@{}", socket.peer_addr()))
    }

    async fn read(
        &self,
        side: Side,
        socket: &Socket<Self>,
        reader: &mut SocketReader,
    ) -> Result<()> {
        if side == Side::Server {
            let line = reader.read_line().await?;
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            let context = socket.context().cloned().unwrap_or_default();
            self.greetings.lock().unwrap().push(format!("{context}: {text}"));
            // Done after one frame; returning ends the connection.
            Ok(())
        } else {
            // Client side just waits for the server to hang up.
            let _ = reader.read_line().await;
            Ok(())
        }
    }

    async fn write(
        &self,
        _side: Side,
        _socket: &Socket<Self>,
        writer: &mut SocketWriter,
        batch: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        for message in batch.iter() {
            writer.write(message).await?;
            writer.write(b"\n").await?;
        }
        writer.flush().await
    }
}

#[tokio::test]
async fn handshake_context_reaches_read() {
    init_tracing();

    let greetings = Arc::new(Mutex::new(Vec::new()));
    let server = Server::bind(
        any_addr(),
        HelloProto {
            greetings: greetings.clone(),
        },
        Config::server(),
    )
    .expect("bind");
    server.serve().expect("serve");

    let client = Client::new(
        server.local_addr(),
        HelloProto {
            greetings: Arc::new(Mutex::new(Vec::new())),
        },
        Config::client(),
    );
    client.write(b"hi".to_vec()).await.expect("write");

    // The server records one greeting, then its connection winds down.
    timeout(Duration::from_secs(5), async {
        loop {
            if !greetings.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server should record the greeting");

    let recorded = greetings.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert!(
        recorded[0].starts_with("server@"),
        "context built by handshake must reach read: {recorded:?}"
    );
    assert!(recorded[0].ends_with(": hi"));

    timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("client shutdown");
    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server shutdown");
}
