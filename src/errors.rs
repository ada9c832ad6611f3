use std::io;

use snafu::Snafu;
use tokio::task::JoinError;

use crate::proto::{self, ConnectReturnCode, PacketType};
use crate::transport::TransportKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("A MQTT Protocol Error occurred: {}", source))]
    Protocol { source: proto::Error },
    #[snafu(display("I/O error occurred: {}", source))]
    Io { source: io::Error },
    #[snafu(display("Timed out waiting on the network connection."))]
    Timeout,
    #[snafu(display("Network connection to server ended unexpectedly."))]
    ConnectionClosed,
    #[snafu(display("Timed out with part of a {} packet already written.", packet_type))]
    WriteStalled { packet_type: PacketType },
    #[snafu(display("Client is not connected to a server."))]
    NotConnected,
    #[snafu(display("Server refused the connection. Status: {}", code))]
    ConnectionRefused { code: ConnectReturnCode },
    #[snafu(display("Received an unexpected {} packet.", packet_type))]
    UnexpectedPacket { packet_type: PacketType },
    #[snafu(display("Server did not answer a PINGREQ in time."))]
    PingExpired,
    #[snafu(display("The {:?} transport is not supported.", kind))]
    UnsupportedTransport { kind: TransportKind },
    #[snafu(display("Client loop is unavailable after an earlier failure."))]
    LoopUnavailable,
    #[snafu(display("Loop unexpectedly aborted: {}", source))]
    LoopAborted { source: JoinError },
    #[snafu(display("A {} packet cannot be tracked by the session.", packet_type))]
    UntrackedPacket { packet_type: PacketType },
    #[snafu(display("A {} packet with message id {} is already in flight.", packet_type, message_id))]
    DuplicateMessageId {
        packet_type: PacketType,
        message_id: u16,
    },
}

impl Error {
    /// Whether this error only means an operation ran out of time. The client loop tolerates these.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Io { source } => source.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Error {
        Error::Io { source }
    }
}

impl From<proto::Error> for Error {
    fn from(source: proto::Error) -> Error {
        Error::Protocol { source }
    }
}
