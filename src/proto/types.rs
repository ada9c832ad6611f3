use std::convert::TryFrom;
use std::fmt;

use bytes::BufMut;
use enum_primitive::FromPrimitive;

use super::errors::*;
use super::parsers;

static CRC_0_MESSAGE: &str = "0x00 Connection Accepted";
static CRC_1_MESSAGE: &str = "0x01 Connection Refused, unacceptable protocol version";
static CRC_2_MESSAGE: &str = "0x02 Connection Refused, identifier rejected";
static CRC_3_MESSAGE: &str = "0x03 Connection Refused, Server unavailable";
static CRC_4_MESSAGE: &str = "0x04 Connection Refused, bad user name or password";
static CRC_5_MESSAGE: &str = "0x05 Connection Refused, not authorized";

/// Largest value the remaining length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest number of bytes a length prefixed MQTT string can hold.
pub const MAX_STRING_LENGTH: usize = 65_535;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct PacketFlags: u8 {
        const DUP  = 0b1000;
        const QOS2 = 0b0100;
        const QOS1 = 0b0010;
        const RET  = 0b0001;
    }
}

impl PacketFlags {
    pub fn is_retain(&self) -> bool {
        self.intersects(Self::RET)
    }

    pub fn is_duplicate(&self) -> bool {
        self.intersects(Self::DUP)
    }
}

impl From<QualityOfService> for PacketFlags {
    fn from(value: QualityOfService) -> PacketFlags {
        match value {
            QualityOfService::QoS0 => PacketFlags::empty(),
            QualityOfService::QoS1 => PacketFlags::QOS1,
            QualityOfService::QoS2 => PacketFlags::QOS2,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct ConnFlags: u8 {
        const USERNAME    = 0b10000000;
        const PASSWORD    = 0b01000000;
        const WILL_RETAIN = 0b00100000;
        const WILL_QOS2   = 0b00010000;
        const WILL_QOS1   = 0b00001000;
        const WILL_FLAG   = 0b00000100;
        const CLEAN_SESS  = 0b00000010;
    }
}

impl From<QualityOfService> for ConnFlags {
    fn from(value: QualityOfService) -> ConnFlags {
        match value {
            QualityOfService::QoS0 => ConnFlags::empty(),
            QualityOfService::QoS1 => ConnFlags::WILL_QOS1,
            QualityOfService::QoS2 => ConnFlags::WILL_QOS2,
        }
    }
}

enum_from_primitive! {
    /// Types of packets in the MQTT Protocol.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum PacketType {
        Connect     = 1,
        ConnAck     = 2,
        Publish     = 3,
        PubAck      = 4,
        PubRec      = 5,
        PubRel      = 6,
        PubComp     = 7,
        Subscribe   = 8,
        SubAck      = 9,
        Unsubscribe = 10,
        UnsubAck    = 11,
        PingReq     = 12,
        PingResp    = 13,
        Disconnect  = 14,
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<PacketType> {
        PacketType::from_u8(value).ok_or(Error::UnknownPacketType { ty: value })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::PacketType::*;
        match self {
            Connect => write!(f, "CONNECT"),
            ConnAck => write!(f, "CONN_ACK"),
            Publish => write!(f, "PUBLISH"),
            PubAck => write!(f, "PUBACK"),
            PubRec => write!(f, "PUBREC"),
            PubRel => write!(f, "PUBREL"),
            PubComp => write!(f, "PUBCOMP"),
            Subscribe => write!(f, "SUBSCRIBE"),
            SubAck => write!(f, "SUBACK"),
            Unsubscribe => write!(f, "UNSUBSCRIBE"),
            UnsubAck => write!(f, "UNSUBACK"),
            PingReq => write!(f, "PINGREQ"),
            PingResp => write!(f, "PINGRESP"),
            Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

enum_from_primitive! {
    /// Set of quality of service levels a message can be sent with. These provide certain guarantees about the delivery
    /// of messages.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum QualityOfService {
        /// At most once delivery. The receiver never acknowledges the message.
        QoS0 = 0,
        /// At least once delivery. The receiver answers with PUBACK and the message may arrive more than once.
        QoS1 = 1,
        /// Exactly once delivery, using the PUBREC, PUBREL and PUBCOMP exchange.
        QoS2 = 2
    }
}

impl TryFrom<u8> for QualityOfService {
    type Error = Error;

    fn try_from(value: u8) -> Result<QualityOfService> {
        QualityOfService::from_u8(value).ok_or(Error::InvalidQos { qos: value })
    }
}

impl Default for QualityOfService {
    fn default() -> QualityOfService {
        QualityOfService::QoS0
    }
}

enum_from_primitive! {
    /// The protocol version used by a connection.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[allow(non_camel_case_types)]
    pub enum ProtoLvl {
        V3_1 = 3,
        V3_1_1 = 4,
    }
}

impl ProtoLvl {
    /// Protocol name written at the start of a CONNECT packet.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ProtoLvl::V3_1 => "MQIsdp",
            ProtoLvl::V3_1_1 => "MQTT",
        }
    }
}

impl Default for ProtoLvl {
    fn default() -> ProtoLvl {
        ProtoLvl::V3_1_1
    }
}

/// Status returned by the server in a CONNACK packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectReturnCode {
    Accepted = 0,
    BadProtoVersion = 1,
    ClientIdRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    Unauthorized = 5,
}

impl ConnectReturnCode {
    pub fn is_accepted(&self) -> bool {
        *self == ConnectReturnCode::Accepted
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<ConnectReturnCode> {
        use self::ConnectReturnCode::*;

        match code {
            0 => Ok(Accepted),
            1 => Ok(BadProtoVersion),
            2 => Ok(ClientIdRejected),
            3 => Ok(ServerUnavailable),
            4 => Ok(BadCredentials),
            5 => Ok(Unauthorized),
            _ => Err(Error::InvalidConnectReturnCode { code }),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ConnectReturnCode::*;

        match self {
            Accepted => write!(f, "{}", CRC_0_MESSAGE),
            BadProtoVersion => write!(f, "{}", CRC_1_MESSAGE),
            ClientIdRejected => write!(f, "{}", CRC_2_MESSAGE),
            ServerUnavailable => write!(f, "{}", CRC_3_MESSAGE),
            BadCredentials => write!(f, "{}", CRC_4_MESSAGE),
            Unauthorized => write!(f, "{}", CRC_5_MESSAGE),
        }
    }
}

/// Maps a SUBACK return code to the granted QoS. `None` stands for the 0x80 failure code.
pub(crate) fn granted_qos_from_u8(code: u8) -> Result<Option<QualityOfService>> {
    match code {
        0x80 => Ok(None),
        0..=2 => QualityOfService::try_from(code).map(Some),
        _ => Err(Error::InvalidSubAckReturnCode { code }),
    }
}

pub(crate) fn granted_qos_to_u8(granted: Option<QualityOfService>) -> u8 {
    granted.map_or(0x80, |q| q as u8)
}

/// The first byte of every control packet, unpacked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub retain: bool,
    pub qos: QualityOfService,
    pub duplicate: bool,
}

impl FixedHeader {
    pub fn new(
        packet_type: PacketType,
        retain: bool,
        qos: QualityOfService,
        duplicate: bool,
    ) -> FixedHeader {
        FixedHeader {
            packet_type,
            retain,
            qos,
            duplicate,
        }
    }

    pub(crate) fn flags(&self) -> PacketFlags {
        let mut flags: PacketFlags = self.qos.into();
        flags.set(PacketFlags::DUP, self.duplicate);
        flags.set(PacketFlags::RET, self.retain);
        flags
    }

    /// Packs the header byte and appends `remaining_length` as a variable length integer.
    pub fn encode(&self, remaining_length: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(5);
        out.put_u8(((self.packet_type as u8) << 4) | self.flags().bits());
        encode_vle(remaining_length, &mut out)?;
        Ok(out)
    }

    /// Unpacks the first header byte. The remaining length bytes are read separately.
    pub fn decode(byte: u8) -> Result<FixedHeader> {
        let packet_type = PacketType::try_from(byte >> 4)?;
        let flags = PacketFlags::from_bits_truncate(byte & 0x0F);
        let qos = QualityOfService::try_from((byte >> 1) & 0b11)?;

        Ok(FixedHeader {
            packet_type,
            retain: flags.is_retain(),
            qos,
            duplicate: flags.is_duplicate(),
        })
    }
}

pub(crate) fn encode_vle<B: BufMut>(num: usize, out: &mut B) -> Result<()> {
    let mut val: usize = num;

    ensure!(num <= MAX_REMAINING_LENGTH, PacketTooBigSnafu { encoded_size: num });

    loop {
        let mut enc_byte: u8 = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            enc_byte |= 128;
        }
        out.put_u8(enc_byte);
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Reads a remaining length field from the start of `buf`.
///
/// Returns the decoded value and the number of bytes it used, or `None` when `buf` ends before the
/// field does.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0;
    let mut multiplier = 1;

    for (i, b) in buf.iter().enumerate() {
        ensure!(i < 4, MalformedRemainingLengthSnafu);

        value += (*b as usize & 127) * multiplier;
        multiplier *= 128;

        if b & 128 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    Ok(None)
}

/// Checks the rules every MQTT string must obey: at most 65535 bytes and no U+0000.
pub fn validate_string(s: &str) -> Result<()> {
    ensure!(
        s.len() <= MAX_STRING_LENGTH,
        StringTooBigSnafu { length: s.len() }
    );
    ensure!(!s.contains('\0'), InvalidStringSnafu { string: s });
    Ok(())
}

/// Writes `s` with its 2 byte big endian length prefix.
pub fn write_string<B: BufMut>(s: &str, out: &mut B) -> Result<()> {
    validate_string(s)?;
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
    Ok(())
}

/// Writes arbitrary bytes with a 2 byte big endian length prefix.
pub(crate) fn write_binary<B: BufMut>(data: &[u8], out: &mut B) -> Result<()> {
    ensure!(
        data.len() <= MAX_STRING_LENGTH,
        StringTooBigSnafu { length: data.len() }
    );
    out.put_u16(data.len() as u16);
    out.put_slice(data);
    Ok(())
}

/// Reads a length prefixed string, returning it together with the unread rest of `buf`.
pub fn read_string(buf: &[u8]) -> Result<(String, &[u8])> {
    parsers::mqtt_string(buf)
        .map(|(rest, s)| (s, rest))
        .map_err(|e| parsers::into_error(e, PacketType::Publish))
}

pub fn msb_lsb_to_u16(msb: u8, lsb: u8) -> u16 {
    (u16::from(msb) << 8) | u16::from(lsb)
}

/// An application message, either published by this client or delivered to it.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QualityOfService,
    pub retain: bool,
    pub duplicate: bool,
    /// Zero for QoS 0. Assigned by the client when a QoS 1 or 2 message is queued.
    pub message_id: u16,
}

impl Message {
    pub fn new<T: Into<String>, P: Into<Vec<u8>>>(
        topic: T,
        payload: P,
        qos: QualityOfService,
    ) -> Message {
        Message {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            ..Message::default()
        }
    }

    pub fn retained(mut self, retain: bool) -> Message {
        self.retain = retain;
        self
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A single topic subscription as carried by a SUBSCRIBE packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub message_id: u16,
    pub topic: String,
    pub qos: QualityOfService,
}

/// A single topic removal as carried by an UNSUBSCRIBE packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub message_id: u16,
    pub topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_packs_flags() {
        let header = FixedHeader::new(PacketType::Publish, true, QualityOfService::QoS2, true);
        assert_eq!(header.encode(0), Ok(vec![0b0011_1101, 0]));
        assert_eq!(FixedHeader::decode(0b0011_1101), Ok(header));
    }

    #[test]
    fn fixed_header_length_bytes() {
        let header = FixedHeader::new(PacketType::PubAck, false, QualityOfService::QoS0, false);
        assert_eq!(header.encode(127).map(|b| b.len()), Ok(2));
        assert_eq!(header.encode(128), Ok(vec![0x40, 0x80, 0x01]));
        assert_eq!(header.encode(16_383), Ok(vec![0x40, 0xFF, 0x7F]));
        assert_eq!(header.encode(16_384).map(|b| b.len()), Ok(4));
    }

    #[test]
    fn fixed_header_every_combination() {
        let qos_levels = [
            QualityOfService::QoS0,
            QualityOfService::QoS1,
            QualityOfService::QoS2,
        ];
        let lengths = [(0, 1), (1, 1), (127, 1), (128, 2), (16_383, 2)];

        for ty in 1..=14u8 {
            let packet_type = PacketType::try_from(ty).unwrap();
            for &qos in &qos_levels {
                for &retain in &[false, true] {
                    for &duplicate in &[false, true] {
                        let header = FixedHeader::new(packet_type, retain, qos, duplicate);
                        for &(length, length_bytes) in &lengths {
                            let encoded = header.encode(length).unwrap();
                            assert_eq!(encoded.len(), 1 + length_bytes, "{:?} {}", header, length);
                            assert_eq!(encoded[0] >> 4, ty);
                            assert_eq!(FixedHeader::decode(encoded[0]), Ok(header));
                            assert_eq!(
                                decode_remaining_length(&encoded[1..]),
                                Ok(Some((length, length_bytes)))
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn fixed_header_too_big() {
        let header = FixedHeader::new(PacketType::Publish, false, QualityOfService::QoS0, false);
        assert_eq!(
            header.encode(MAX_REMAINING_LENGTH + 1),
            Err(Error::PacketTooBig {
                encoded_size: MAX_REMAINING_LENGTH + 1
            })
        );
    }

    #[test]
    fn fixed_header_bad_type_or_qos() {
        assert_eq!(
            FixedHeader::decode(0x00),
            Err(Error::UnknownPacketType { ty: 0 })
        );
        assert_eq!(
            FixedHeader::decode(0xF0),
            Err(Error::UnknownPacketType { ty: 15 })
        );
        assert_eq!(
            FixedHeader::decode(0b0011_0110),
            Err(Error::InvalidQos { qos: 3 })
        );
    }

    #[test]
    fn remaining_length_decoding() {
        assert_eq!(decode_remaining_length(&[0x19, 0x7F]), Ok(Some((25, 1))));
        assert_eq!(decode_remaining_length(&[0xC1, 0x02]), Ok(Some((321, 2))));
        assert_eq!(
            decode_remaining_length(&[0xBC, 0x85, 0x80, 0x01]),
            Ok(Some((2_097_852, 4)))
        );
        assert_eq!(decode_remaining_length(&[0x80, 0x80]), Ok(None));
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(Error::MalformedRemainingLength)
        );
    }

    #[test]
    fn strings() {
        let mut out = Vec::new();
        assert_eq!(write_string("MQTT", &mut out), Ok(()));
        assert_eq!(out, vec![0, 4, 77, 81, 84, 84]);
        assert_eq!(read_string(&out), Ok(("MQTT".to_string(), &[][..])));

        assert_eq!(
            write_string("a\0b", &mut Vec::new()),
            Err(Error::InvalidString {
                string: "a\0b".to_string()
            })
        );
        let long = "x".repeat(MAX_STRING_LENGTH + 1);
        assert_eq!(
            write_string(&long, &mut Vec::new()),
            Err(Error::StringTooBig {
                length: MAX_STRING_LENGTH + 1
            })
        );
    }

    #[test]
    fn msb_lsb() {
        assert_eq!(msb_lsb_to_u16(0x01, 0x02), 258);
        assert_eq!(msb_lsb_to_u16(0xFF, 0xFF), 65_535);
    }

    #[test]
    fn return_codes() {
        assert_eq!(
            ConnectReturnCode::try_from(4),
            Ok(ConnectReturnCode::BadCredentials)
        );
        assert_eq!(
            ConnectReturnCode::try_from(6),
            Err(Error::InvalidConnectReturnCode { code: 6 })
        );
        assert_eq!(
            ConnectReturnCode::ServerUnavailable.to_string(),
            "0x03 Connection Refused, Server unavailable"
        );
        assert_eq!(granted_qos_from_u8(0x80), Ok(None));
        assert_eq!(granted_qos_from_u8(1), Ok(Some(QualityOfService::QoS1)));
        assert_eq!(
            granted_qos_from_u8(3),
            Err(Error::InvalidSubAckReturnCode { code: 3 })
        );
    }
}
