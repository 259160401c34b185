//! Connection handshake against a scripted loopback broker
//!
//! A plain `TcpListener` stands in for the broker. It reads the client's
//! MQTT packets and answers each CONNECT the way the test scripts it, so
//! the acknowledgment timeout, broker refusal and resubscription paths run
//! without a real broker.

use solar_telemetry::config::ServiceConfig;
use solar_telemetry::transport::mqtt::{ConnectFailure, MqttClient};
use solar_telemetry::transport::{ConnectionState, DisconnectReason, Transport};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CONNECT: u8 = 0x10;
const SUBSCRIBE: u8 = 0x80;

/// How the loopback broker answers one accepted connection
#[derive(Debug, Clone, Copy)]
enum Reply {
    /// Read CONNECT and never answer
    Silent,
    /// Answer CONNACK with the given return code and keep the socket open
    ConnAck(u8),
    /// Accept with CONNACK 0, then drop the socket after a short while
    AcceptThenDrop,
}

struct LoopbackBroker {
    port: u16,
    packets: mpsc::UnboundedReceiver<(u8, Vec<u8>)>,
}

impl LoopbackBroker {
    /// Serve one connection per reply, in order, then stop listening
    async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, packets) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for reply in replies {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve(stream, reply, tx.clone()));
            }
        });
        Self { port, packets }
    }

    /// Next packet whose type nibble matches, skipping the rest
    async fn next_packet_of(&mut self, packet_type: u8) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                let (header, body) = self.packets.recv().await.unwrap();
                if header & 0xF0 == packet_type {
                    return body;
                }
            }
        })
        .await
        .unwrap()
    }
}

async fn serve(mut stream: TcpStream, reply: Reply, tx: mpsc::UnboundedSender<(u8, Vec<u8>)>) {
    let Some(connect) = read_packet(&mut stream).await else {
        return;
    };
    let _ = tx.send(connect);

    match reply {
        Reply::Silent => {}
        Reply::ConnAck(code) => {
            if stream.write_all(&[0x20, 0x02, 0x00, code]).await.is_err() {
                return;
            }
        }
        Reply::AcceptThenDrop => {
            let _ = stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            return;
        }
    }

    while let Some(packet) = read_packet(&mut stream).await {
        if tx.send(packet).is_err() {
            break;
        }
    }
}

/// One MQTT control packet: fixed header byte and body
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return None;
        }
    }
    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn loopback_config(port: u16, connect_timeout_secs: u64, backoff_ms: u64) -> ServiceConfig {
    ServiceConfig::from_toml_str(&format!(
        r#"
[service]
id = "handshake-test"

[mqtt]
broker_url = "mqtt://127.0.0.1:{port}"
connect_timeout_secs = {connect_timeout_secs}

[mqtt.reconnect]
backoff_ms = [{backoff_ms}]
max_attempts = 3
"#
    ))
    .unwrap()
}

#[tokio::test]
async fn test_silent_broker_times_out_without_connecting() {
    // Arrange
    let mut broker = LoopbackBroker::start(vec![Reply::Silent]).await;
    let client = MqttClient::from_config(&loopback_config(broker.port, 1, 500));

    // Act
    let start = Instant::now();
    let connected = client.connect().await;
    let elapsed = start.elapsed();

    // Assert
    assert!(!connected);
    assert!(elapsed >= Duration::from_millis(900), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "gave up after {elapsed:?}");
    assert!(!client.is_connected());
    assert_ne!(client.connection_state(), ConnectionState::Connected);
    assert!(contains(&broker.next_packet_of(CONNECT).await, b"handshake-test"));
    client.disconnect().await;
}

#[tokio::test]
async fn test_bad_credentials_refusal_is_reported() {
    // Arrange
    let broker = LoopbackBroker::start(vec![Reply::ConnAck(0x04)]).await;
    let client = MqttClient::from_config(&loopback_config(broker.port, 2, 500));

    // Act
    let connected = client.connect().await;

    // Assert
    assert!(!connected);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        client.last_disconnect(),
        Some(DisconnectReason::Refused(ConnectFailure::BadCredentials))
    );
    assert!(client.is_permanently_disconnected().await);
}

#[tokio::test]
async fn test_accepted_connection_subscribes_tracked_filters() {
    // Arrange
    let mut broker = LoopbackBroker::start(vec![Reply::ConnAck(0x00)]).await;
    let client = MqttClient::from_config(&loopback_config(broker.port, 2, 500));

    // Act
    let connected = client.connect().await;

    // Assert
    assert!(connected);
    assert!(client.is_connected());
    assert!(contains(&broker.next_packet_of(CONNECT).await, b"handshake-test"));
    let subscribe = broker.next_packet_of(SUBSCRIBE).await;
    assert!(contains(&subscribe, b"solar/panel/#"));
    assert_eq!(subscribe.last(), Some(&1));

    client.disconnect().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.last_disconnect(), Some(DisconnectReason::Clean));
}

#[tokio::test]
async fn test_automatic_reconnect_passes_through_connecting() {
    // Arrange
    let broker = LoopbackBroker::start(vec![Reply::AcceptThenDrop, Reply::Silent]).await;
    let client = MqttClient::from_config(&loopback_config(broker.port, 2, 200));
    assert!(client.connect().await);

    // Act
    let mut observed = vec![client.connection_state()];
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        let state = client.connection_state();
        if observed.last() != Some(&state) {
            observed.push(state);
        }
        if state == ConnectionState::Connecting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Assert
    assert_eq!(
        observed,
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        ]
    );
    assert!(matches!(
        client.last_disconnect(),
        Some(DisconnectReason::Unexpected(_))
    ));
    client.disconnect().await;
}
