use std::str::Utf8Error;

use snafu::Snafu;

use super::types::PacketType;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can occur while encoding or decoding MQTT control packets.
#[derive(Snafu, Debug, Clone, PartialEq)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Packet size exceeded maximum size. Encoded size is {}.", encoded_size))]
    PacketTooBig { encoded_size: usize },
    #[snafu(display("A string of {} bytes is too big for a MQTT UTF-8 string.", length))]
    StringTooBig { length: usize },
    #[snafu(display("'{}' contains the null character.", string))]
    InvalidString { string: String },
    #[snafu(display("String is not a valid UTF-8 string. {}", source))]
    StringNotUtf8 { source: Utf8Error },
    #[snafu(display("{} is not a known MQTT packet type.", ty))]
    UnknownPacketType { ty: u8 },
    #[snafu(display("{} is not a valid quality of service level.", qos))]
    InvalidQos { qos: u8 },
    #[snafu(display("Flags {:#06b} are not valid for a {} packet.", flags, packet_type))]
    InvalidPacketFlags { packet_type: PacketType, flags: u8 },
    #[snafu(display("'{}' is not a valid connect return code.", code))]
    InvalidConnectReturnCode { code: u8 },
    #[snafu(display("'{}' is not a valid subscribe return code.", code))]
    InvalidSubAckReturnCode { code: u8 },
    #[snafu(display("Remaining length field uses more than 4 bytes."))]
    MalformedRemainingLength,
    #[snafu(display("Error occurred while parsing {} packet.", packet_type))]
    ParseFailure { packet_type: PacketType },
    #[snafu(display("Decoding {} packets is not supported by a client.", packet_type))]
    UnsupportedDecode { packet_type: PacketType },
}
