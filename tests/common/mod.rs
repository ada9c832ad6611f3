#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use slog::{o, Discard, Logger};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub use tokio_mqtt3::proto::{
    ConnectReturnCode, Message, MqttPacket, PacketType, ProtoLvl, QualityOfService, SubscribeRequest,
    UnsubscribeRequest,
};
pub use tokio_mqtt3::{ConnectionSettings, ConnectionSettingsBuilder, Error, MqttClient, Session, Transport};

pub fn check_encode(packet: MqttPacket, packet_data: &[u8]) {
    let mut buf: Vec<u8> = Vec::with_capacity(packet_data.len());
    assert_eq!(packet.encode(&mut buf), Ok(()));
    assert_eq!(buf, packet_data);
}

const WAIT: Duration = Duration::from_secs(3);

/// Settings for a client talking to a `MockTransport`. Pinging is off unless a test turns it on.
pub fn settings() -> ConnectionSettingsBuilder {
    let mut builder = ConnectionSettingsBuilder::default();
    builder
        .hostname("broker.test")
        .client_id("tester")
        .keep_alive(0u16)
        .logger(Logger::root(Discard, o!()));
    builder
}

/// In-memory stand-in for a server connection. Packets written by the client land on the paired `Broker`.
pub struct MockTransport {
    connected: bool,
    incoming: UnboundedReceiver<MqttPacket>,
    outgoing: UnboundedSender<MqttPacket>,
    dropped: Arc<AtomicBool>,
}

/// The server side of a `MockTransport`.
pub struct Broker {
    to_client: UnboundedSender<MqttPacket>,
    from_client: UnboundedReceiver<MqttPacket>,
    dropped: Arc<AtomicBool>,
}

pub fn mock() -> (Box<dyn Transport>, Broker) {
    let (to_client, incoming) = unbounded_channel();
    let (outgoing, from_client) = unbounded_channel();
    let dropped = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        connected: false,
        incoming,
        outgoing,
        dropped: dropped.clone(),
    };
    let broker = Broker {
        to_client,
        from_client,
        dropped,
    };
    (Box::new(transport), broker)
}

#[async_trait]
impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, _hostname: &str, _port: u16) -> tokio_mqtt3::Result<()> {
        self.dropped.store(false, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn read_packet(&mut self, timeout: Duration) -> tokio_mqtt3::Result<MqttPacket> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.dropped.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(Error::ConnectionClosed);
        }
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Err(_) => Err(Error::Timeout),
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => {
                self.connected = false;
                Err(Error::ConnectionClosed)
            }
        }
    }

    async fn write_packet(&mut self, packet: &MqttPacket, _timeout: Duration) -> tokio_mqtt3::Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.outgoing
            .send(packet.clone())
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

impl Broker {
    pub fn send(&self, packet: MqttPacket) {
        self.to_client.send(packet).expect("client transport dropped");
    }

    /// Queues a CONNACK so the next `connect` succeeds.
    pub fn accept(&self, session_present: bool) {
        self.send(MqttPacket::ConnAck {
            session_present,
            return_code: ConnectReturnCode::Accepted,
        });
    }

    /// Makes the next read on the client side fail as if the socket was closed.
    pub fn drop_connection(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    pub async fn expect(&mut self) -> MqttPacket {
        recv(&mut self.from_client).await
    }

    /// Returns the packet the client writes within `wait`, if any.
    pub async fn try_expect(&mut self, wait: Duration) -> Option<MqttPacket> {
        tokio::time::timeout(wait, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Receives one value or panics after a few seconds.
pub async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting")
        .expect("channel closed")
}

/// Connects a fresh client to a mock broker and consumes the CONNECT it sends.
pub async fn connected_client(settings: ConnectionSettings) -> (MqttClient, Broker) {
    let (transport, mut broker) = mock();
    let client = MqttClient::with_transport(settings, transport);
    broker.accept(false);
    client.connect().await.expect("connect failed");
    match broker.expect().await {
        MqttPacket::Connect { .. } => {}
        other => panic!("expected CONNECT, got {:?}", other),
    }
    (client, broker)
}
