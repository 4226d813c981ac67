//! End-to-end tests against a scripted peer on a loopback socket.

use std::sync::Arc;
use std::time::Duration;

use cwp_client::time::ManualClock;
use cwp_client::{ClientConfig, CwpClient, Error, Event, EventKind, ProtocolState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    client: CwpClient,
    clock: Arc<ManualClock>,
    events: mpsc::UnboundedReceiver<Event>,
    peer: TcpStream,
    listener: TcpListener,
}

async fn connect(config: ClientConfig) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (tx, events) = mpsc::unbounded_channel();
    let clock = Arc::new(ManualClock::new(1_000));
    let mut client = CwpClient::with_clock(config, tx, clock.clone()).unwrap();
    client.connect("127.0.0.1", port, 440).unwrap();

    let (peer, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut harness = Harness {
        client,
        clock,
        events,
        peer,
        listener,
    };
    assert_eq!(harness.next_event().await, Event::new(EventKind::EConnected, 0));
    harness
}

impl Harness {
    async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv()).await.unwrap().unwrap()
    }

    async fn read_i32(&mut self) -> i32 {
        timeout(WAIT, self.peer.read_i32()).await.unwrap().unwrap()
    }

    async fn read_i16(&mut self) -> i16 {
        timeout(WAIT, self.peer.read_i16()).await.unwrap().unwrap()
    }

    async fn assert_peer_idle(&mut self) {
        let mut buf = [0u8; 1];
        assert!(timeout(Duration::from_millis(100), self.peer.read(&mut buf)).await.is_err());
    }
}

#[tokio::test]
async fn test_connect_enters_connected() {
    let harness = connect(ClientConfig::default()).await;

    assert!(harness.client.is_connected());
    assert_eq!(harness.client.state(), ProtocolState::Connected);
    assert_eq!(harness.client.frequency(), 440);
}

#[tokio::test]
async fn test_frequency_negotiation() {
    let mut harness = connect(ClientConfig::default()).await;

    // Peer proposes another frequency: the client insists on its own.
    harness.peer.write_i32(-500).await.unwrap();
    assert_eq!(harness.read_i32().await, -440);
    assert_eq!(harness.next_event().await, Event::new(EventKind::EConnected, 0));

    harness.peer.write_i32(-440).await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::EChangedFrequency, 440));
    assert_eq!(harness.client.state(), ProtocolState::LineDown);
}

#[tokio::test]
async fn test_set_frequency_sends_negated() {
    let mut harness = connect(ClientConfig::default()).await;

    harness.client.set_frequency(880).unwrap();
    assert_eq!(harness.read_i32().await, -880);
    assert_eq!(harness.next_event().await, Event::new(EventKind::EConnected, 0));
    assert_eq!(harness.client.frequency(), 880);
}

#[tokio::test]
async fn test_peer_keys_the_line() {
    let mut harness = connect(ClientConfig::default()).await;
    harness.peer.write_i32(-440).await.unwrap();
    assert_eq!(harness.next_event().await.kind, EventKind::EChangedFrequency);

    harness.peer.write_i32(1200).await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::ELineUp, 1200));
    assert!(harness.client.server_set_line_up());
    assert!(harness.client.line_is_up());

    harness.peer.write_i16(200).await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::ELineDown, 200));
    assert!(!harness.client.server_set_line_up());

    // Keepalives are swallowed.
    harness.peer.write_i32(i32::MIN).await.unwrap();
    harness.peer.write_i32(900).await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::ELineUp, 900));
}

#[tokio::test]
async fn test_user_keys_the_line() {
    let mut harness = connect(ClientConfig::default()).await;

    harness.clock.set(2_500);
    harness.client.line_up().unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::ELineUp, 0));
    assert_eq!(harness.read_i32().await, 1_500);
    assert!(harness.client.line_is_up());

    // Frequency is locked while the line is up.
    harness.client.set_frequency(880).unwrap();
    assert_eq!(harness.client.frequency(), 440);

    harness.clock.set(2_750);
    harness.client.line_down().unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::ELineDown, 0));
    assert_eq!(harness.read_i16().await, 250);
    assert_eq!(harness.client.state(), ProtocolState::LineDown);
}

#[tokio::test]
async fn test_line_up_suppressed_while_peer_holds_line() {
    let mut harness = connect(ClientConfig::default()).await;
    harness.peer.write_i32(1200).await.unwrap();
    assert_eq!(harness.next_event().await.kind, EventKind::ELineUp);

    harness.client.line_up().unwrap();
    harness.client.line_down().unwrap();

    harness.assert_peer_idle().await;
    assert!(harness.events.try_recv().is_err());
    assert!(harness.client.server_set_line_up());
}

#[tokio::test]
async fn test_peer_report_while_user_holds_is_state_change() {
    let mut harness = connect(ClientConfig::default()).await;
    harness.clock.set(2_000);
    harness.client.line_up().unwrap();
    assert_eq!(harness.next_event().await.kind, EventKind::ELineUp);
    assert_eq!(harness.read_i32().await, 1_000);

    harness.peer.write_i32(1_000).await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::EServerStateChange, 1_000));

    harness.clock.set(2_400);
    harness.client.line_down().unwrap();
    assert_eq!(harness.read_i16().await, 400);
}

#[tokio::test]
async fn test_watchdog_cycles_long_hold() {
    let config = ClientConfig {
        watchdog_period: Duration::from_millis(10),
        ..Default::default()
    };
    let mut harness = connect(config).await;

    harness.clock.set(2_000);
    harness.client.line_up().unwrap();
    assert_eq!(harness.next_event().await.kind, EventKind::ELineUp);
    assert_eq!(harness.read_i32().await, 1_000);

    harness.clock.set(34_000);
    assert_eq!(harness.read_i16().await, 32_000);
    assert_eq!(harness.read_i32().await, 33_000);

    assert_eq!(harness.client.state(), ProtocolState::LineUp);
    assert!(harness.events.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_aborts_blocked_read() {
    let mut harness = connect(ClientConfig::default()).await;

    harness.client.disconnect().unwrap();
    assert_eq!(harness.client.state(), ProtocolState::Disconnected);
    assert_eq!(harness.next_event().await, Event::new(EventKind::EDisconnected, 0));

    let mut buf = [0u8; 4];
    let read = timeout(WAIT, harness.peer.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(matches!(harness.client.line_up(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_peer_close_disconnects() {
    let mut harness = connect(ClientConfig::default()).await;

    harness.peer.shutdown().await.unwrap();
    assert_eq!(harness.next_event().await, Event::new(EventKind::EDisconnected, 0));
    assert!(!harness.client.is_connected());
    assert!(matches!(harness.client.line_down(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let mut harness = connect(ClientConfig::default()).await;
    harness.client.disconnect().unwrap();
    assert_eq!(harness.next_event().await.kind, EventKind::EDisconnected);

    let port = harness.listener.local_addr().unwrap().port();
    harness.client.connect("127.0.0.1", port, 700).unwrap();
    let (_peer, _) = timeout(WAIT, harness.listener.accept()).await.unwrap().unwrap();

    assert_eq!(harness.next_event().await, Event::new(EventKind::EConnected, 0));
    assert_eq!(harness.client.frequency(), 700);
    assert!(matches!(
        harness.client.connect("127.0.0.1", port, 700),
        Err(Error::InvalidState(_))
    ));
}
