//! End-to-End Tests
//!
//! A server and a client scheduler talking over TCP loopback.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel;
use wirepack::codec::{Codec, Member, TypeSchema};
use wirepack::network::{connect, Incoming, Packeter};
use wirepack::protocol::{register_builtin, Chat, Packet, Ping, Pong};
use wirepack::{Config, Protocol, Scheduler, Server};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
struct Reading {
    sensor: String,
    celsius: f64,
    sequence: u32,
}

impl Packet for Reading {
    const ID: u16 = 0x0100;

    fn schema() -> TypeSchema {
        TypeSchema::builder::<Reading>("Reading")
            .member(Member::field("sensor", |r: &Reading| &r.sensor, |r, v| r.sensor = v))
            .member(Member::field("celsius", |r: &Reading| &r.celsius, |r, v| r.celsius = v))
            .member(Member::field("sequence", |r: &Reading| &r.sequence, |r, v| r.sequence = v))
            .default_ctor()
            .build()
    }
}

fn new_scheduler() -> Arc<Scheduler> {
    let config = Config::builder().tick_ms(1).send_tick_ms(1).build().unwrap();
    let protocol = Protocol::new(Codec::with_primitives());
    register_builtin(&protocol).unwrap();
    protocol.register::<Reading>().unwrap();
    let scheduler = Scheduler::new(config, Arc::new(protocol));
    scheduler.start().unwrap();
    scheduler
}

/// Server answering Ping with Pong; accepted connections are forwarded
struct TestServer {
    server: Arc<Server>,
    scheduler: Arc<Scheduler>,
    addr: SocketAddr,
    accepted: channel::Receiver<Arc<Packeter>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        let scheduler = new_scheduler();
        let server = Arc::new(Server::bind_to(Arc::clone(&scheduler), "127.0.0.1:0").unwrap());
        let addr = server.local_addr().unwrap();
        let (tx, accepted) = channel::unbounded();

        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || {
            runner
                .run(|packeter| {
                    let responder = Arc::downgrade(packeter);
                    packeter.received().subscribe(move |incoming: &Incoming| {
                        let (Some(packeter), Some(ping)) =
                            (responder.upgrade(), incoming.downcast_ref::<Ping>())
                        else {
                            return;
                        };
                        packeter.send_packet(Pong { nonce: ping.nonce }).unwrap();
                    });
                    let _ = tx.send(Arc::clone(packeter));
                })
                .unwrap();
        });

        Self {
            server,
            scheduler,
            addr,
            accepted,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.scheduler.stop();
    }
}

// =============================================================================
// Message Exchange Tests
// =============================================================================

#[test]
fn test_message_received_once() {
    let server = TestServer::start();
    let client = new_scheduler();
    let packeter = connect(&client, server.addr).unwrap();

    let remote = server.accepted.recv_timeout(WAIT).unwrap();
    let received = remote.received().channel();

    let reading = Reading {
        sensor: "attic".to_string(),
        celsius: 21.5,
        sequence: 3,
    };
    packeter.send_packet(reading.clone()).unwrap();

    let incoming = received.recv_timeout(WAIT).unwrap();
    assert_eq!(incoming.id, Reading::ID);
    assert_eq!(incoming.downcast_ref::<Reading>(), Some(&reading));
    assert!(received.recv_timeout(Duration::from_millis(50)).is_err());

    packeter.close();
    client.stop();
}

#[test]
fn test_messages_arrive_in_order() {
    let server = TestServer::start();
    let client = new_scheduler();
    let packeter = connect(&client, server.addr).unwrap();

    let remote = server.accepted.recv_timeout(WAIT).unwrap();
    let received = remote.received().channel();

    for sent_at in 0..100u64 {
        packeter
            .send_packet(Chat {
                sender: "client".to_string(),
                body: format!("line {}", sent_at),
                room: (sent_at % 2 == 0).then(|| "even".to_string()),
                sent_at,
            })
            .unwrap();
    }

    for expected in 0..100u64 {
        let incoming = received.recv_timeout(WAIT).unwrap();
        let chat = incoming.downcast_ref::<Chat>().unwrap();
        assert_eq!(chat.sent_at, expected);
        assert_eq!(chat.room.is_some(), expected % 2 == 0);
    }

    packeter.close();
    client.stop();
}

// =============================================================================
// Request/Response Tests
// =============================================================================

#[test]
fn test_ping_request_gets_pong() {
    let server = TestServer::start();
    let client = new_scheduler();
    let packeter = connect(&client, server.addr).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::bounded(1);
    let counter = Arc::clone(&calls);
    packeter
        .request::<Ping, Pong>(Ping { nonce: 99 }, move |pong| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(pong.nonce);
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 99);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.correlator().pending(), 0);

    packeter.close();
    client.stop();
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_garbage_reported_as_error() {
    let server = TestServer::start();

    let mut raw = TcpStream::connect(server.addr).unwrap();
    let remote = server.accepted.recv_timeout(WAIT).unwrap();
    let errors = remote.errors().channel();

    raw.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    raw.flush().unwrap();

    let error = errors.recv_timeout(WAIT).unwrap();
    assert!(error.is_decode_failure());
}

#[test]
fn test_client_disconnect_unregisters() {
    let server = TestServer::start();
    let client = new_scheduler();
    let packeter = connect(&client, server.addr).unwrap();

    let remote = server.accepted.recv_timeout(WAIT).unwrap();
    assert!(remote.is_reading());

    packeter.close();
    assert!(!client.registry().contains(&packeter));

    let deadline = std::time::Instant::now() + WAIT;
    while remote.is_reading() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!remote.is_reading());
    assert!(!remote.is_open());

    client.stop();
}
