use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use slog::Logger;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Transport;
use crate::backend::{MqttCodec, MqttFramed};
use crate::errors::{Error, Result, WriteStalledSnafu};
use crate::proto::MqttPacket;

/// Plain TCP connection to a server.
pub struct TcpTransport {
    framed: Option<MqttFramed<TcpStream>>,
    logger: Logger,
}

impl TcpTransport {
    pub fn new(logger: Logger) -> TcpTransport {
        TcpTransport {
            framed: None,
            logger,
        }
    }

    /// Frames dropped on the current connection because they could not be decoded.
    pub fn discarded_frames(&self) -> u64 {
        self.framed.as_ref().map_or(0, |f| f.codec().discarded())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn connect(&mut self, hostname: &str, port: u16) -> Result<()> {
        let stream = TcpStream::connect((hostname, port)).await?;
        stream.set_nodelay(true)?;
        debug!(self.logger, "TCP connection established"; "host" => hostname, "port" => port);
        self.framed = Some(MqttFramed::new(stream, MqttCodec::new(self.logger.clone())));
        Ok(())
    }

    async fn read_packet(&mut self, wait: Duration) -> Result<MqttPacket> {
        let framed = self.framed.as_mut().ok_or(Error::NotConnected)?;
        match timeout(wait, framed.next()).await {
            Err(_) => Err(Error::Timeout),
            Ok(Some(res)) => res,
            Ok(None) => {
                self.framed = None;
                Err(Error::ConnectionClosed)
            }
        }
    }

    async fn write_packet(&mut self, packet: &MqttPacket, wait: Duration) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(Error::NotConnected)?;
        match timeout(wait, framed.send(packet.clone())).await {
            // Nothing was encoded yet, so the packet can be written again later.
            Err(_) if framed.write_buffer().is_empty() => Err(Error::Timeout),
            Err(_) => {
                warn!(self.logger, "Write stalled mid packet, dropping connection";
                      "type" => %packet.packet_type(), "unsent" => framed.write_buffer().len());
                self.framed = None;
                WriteStalledSnafu {
                    packet_type: packet.packet_type(),
                }
                .fail()
            }
            Ok(res) => res,
        }
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = framed.close().await {
                debug!(self.logger, "Error while closing TCP connection"; "error" => %e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Discard;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::proto::{Message, QualityOfService};

    fn transport() -> TcpTransport {
        TcpTransport::new(Logger::root(Discard, o!()))
    }

    #[tokio::test]
    async fn not_connected() {
        let mut t = transport();
        assert!(!t.is_connected());
        assert!(matches!(
            t.read_packet(Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn exchanges_packets() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0xC0, 0]);
            socket.write_all(&[0xD0, 0]).await.unwrap();
        });

        let mut t = transport();
        t.connect("127.0.0.1", port).await.unwrap();
        assert!(t.is_connected());

        assert!(matches!(
            t.read_packet(Duration::from_millis(20)).await,
            Err(Error::Timeout)
        ));
        t.write_packet(&MqttPacket::PingReq, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            t.read_packet(Duration::from_secs(1)).await.unwrap(),
            MqttPacket::PingResp
        );

        server.await.unwrap();
        assert!(matches!(
            t.read_packet(Duration::from_secs(1)).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(!t.is_connected());
        t.close().await;
    }

    #[tokio::test]
    async fn rejects_undecodable_conn_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0x20, 2, 0, 9]).await.unwrap();
            socket
        });

        let mut t = transport();
        t.connect("127.0.0.1", port).await.unwrap();
        let _socket = server.await.unwrap();

        assert!(matches!(
            t.read_packet(Duration::from_secs(1)).await,
            Err(Error::Protocol {
                source: crate::proto::Error::InvalidConnectReturnCode { code: 9 }
            })
        ));
        assert_eq!(t.discarded_frames(), 0);
    }

    #[tokio::test]
    async fn counts_discarded_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // SUBACK with an unknown return code, then a PINGRESP.
            socket.write_all(&[0x90, 3, 0, 1, 9, 0xD0, 0]).await.unwrap();
            socket
        });

        let mut t = transport();
        assert_eq!(t.discarded_frames(), 0);
        t.connect("127.0.0.1", port).await.unwrap();
        let _socket = server.await.unwrap();

        assert_eq!(
            t.read_packet(Duration::from_secs(1)).await.unwrap(),
            MqttPacket::PingResp
        );
        assert_eq!(t.discarded_frames(), 1);
    }

    #[tokio::test]
    async fn stalled_write_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut t = transport();
        t.connect("127.0.0.1", port).await.unwrap();
        // Accepted but never read, so the socket buffers fill up.
        let (_socket, _) = listener.accept().await.unwrap();

        let big = Message::new("bulk", vec![0u8; 32 * 1024 * 1024], QualityOfService::QoS0);
        let res = t
            .write_packet(&MqttPacket::Publish(big), Duration::from_millis(200))
            .await;

        match res {
            Err(e @ Error::WriteStalled { .. }) => assert!(!e.is_timeout()),
            other => panic!("expected a stalled write, got {:?}", other),
        }
        assert!(!t.is_connected());
    }
}
