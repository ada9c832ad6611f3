//! Byte-stream transports the client loop talks to a server through.
//!
//! The loop only needs whole packets in and out, each bounded by a timeout. `TcpTransport` is the only built-in
//! implementation. Applications can supply their own through `MqttClient::with_transport`.

mod tcp;

pub use self::tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use slog::Logger;

use crate::errors::{Result, UnsupportedTransportSnafu};
use crate::proto::MqttPacket;

/// The kind of network connection a client should open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Tcp,
    Tls,
    WebSocket,
}

/// A packet oriented connection to a server.
///
/// Reads and writes fail with `Error::Timeout` when they run out of time, which callers treat differently from every
/// other failure.
#[async_trait]
pub trait Transport: Send {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self, hostname: &str, port: u16) -> Result<()>;

    /// Reads the next packet, waiting at most `timeout`. Must be safe to cancel between packets.
    async fn read_packet(&mut self, timeout: Duration) -> Result<MqttPacket>;

    /// Writes `packet`, waiting at most `timeout`.
    ///
    /// `Error::Timeout` promises that none of the packet reached the connection, so the caller may write it again. A
    /// transport that times out after some of the packet's bytes were accepted must fail with another error instead,
    /// such as `Error::WriteStalled`, and drop the connection.
    async fn write_packet(&mut self, packet: &MqttPacket, timeout: Duration) -> Result<()>;

    async fn close(&mut self);
}

/// Builds the built-in transport for `kind`.
pub fn build(kind: TransportKind, logger: &Logger) -> Result<Box<dyn Transport>> {
    match kind {
        TransportKind::Tcp => Ok(Box::new(TcpTransport::new(logger.clone()))),
        TransportKind::Tls | TransportKind::WebSocket => UnsupportedTransportSnafu { kind }.fail(),
    }
}
