//! The MQTT 3.1 / 3.1.1 wire format.
//!
//! `MqttPacket` models every control packet a client sends or receives. Packets encode to their exact on-wire bytes
//! and decode from a fixed header byte plus the packet body.

mod errors;
mod parsers;
mod types;

pub use self::errors::{Error, Result};
pub use self::types::*;

use bytes::BufMut;

use self::errors::InvalidPacketFlagsSnafu;

/// A enumeration of possible control packets used in the MQTT Protocol.
///
/// Each variant only carries the fields its wire layout defines. Subscribe and Unsubscribe carry one topic each, which
/// is all a client ever puts in a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttPacket {
    Connect {
        protocol_level: ProtoLvl,
        clean_session: bool,
        keep_alive: u16,
        client_id: String,
        will: Option<Message>,
        username: Option<String>,
        password: Option<String>,
    },
    ConnAck {
        session_present: bool,
        return_code: ConnectReturnCode,
    },
    Publish(Message),
    PubAck {
        message_id: u16,
    },
    PubRec {
        message_id: u16,
    },
    PubRel {
        message_id: u16,
    },
    PubComp {
        message_id: u16,
    },
    Subscribe(SubscribeRequest),
    SubAck {
        message_id: u16,
        granted: Option<QualityOfService>,
    },
    Unsubscribe(UnsubscribeRequest),
    UnsubAck {
        message_id: u16,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl MqttPacket {
    /// Returns the type of this MQTT Control packet.
    ///
    /// # Examples
    /// ```
    /// # use tokio_mqtt3::proto::{MqttPacket, PacketType};
    /// let packet = MqttPacket::PubAck { message_id: 1 };
    /// assert_eq!(packet.packet_type(), PacketType::PubAck);
    /// ```
    pub fn packet_type(&self) -> PacketType {
        use self::MqttPacket::*;

        match self {
            Connect { .. } => PacketType::Connect,
            ConnAck { .. } => PacketType::ConnAck,
            Publish(_) => PacketType::Publish,
            PubAck { .. } => PacketType::PubAck,
            PubRec { .. } => PacketType::PubRec,
            PubRel { .. } => PacketType::PubRel,
            PubComp { .. } => PacketType::PubComp,
            Subscribe(_) => PacketType::Subscribe,
            SubAck { .. } => PacketType::SubAck,
            Unsubscribe(_) => PacketType::Unsubscribe,
            UnsubAck { .. } => PacketType::UnsubAck,
            PingReq => PacketType::PingReq,
            PingResp => PacketType::PingResp,
            Disconnect => PacketType::Disconnect,
        }
    }

    /// The QoS written into the fixed header. PUBLISH uses its message's QoS, SUBSCRIBE, UNSUBSCRIBE and PUBREL are
    /// always QoS 1 and everything else is QoS 0.
    pub fn qos(&self) -> QualityOfService {
        use self::MqttPacket::*;

        match self {
            Publish(message) => message.qos,
            Subscribe(_) | Unsubscribe(_) | PubRel { .. } => QualityOfService::QoS1,
            _ => QualityOfService::QoS0,
        }
    }

    /// The message identifier of packets that carry one.
    pub fn message_id(&self) -> Option<u16> {
        use self::MqttPacket::*;

        match self {
            Publish(message) if message.qos != QualityOfService::QoS0 => Some(message.message_id),
            Subscribe(request) => Some(request.message_id),
            Unsubscribe(request) => Some(request.message_id),
            PubAck { message_id }
            | PubRec { message_id }
            | PubRel { message_id }
            | PubComp { message_id }
            | SubAck { message_id, .. }
            | UnsubAck { message_id } => Some(*message_id),
            _ => None,
        }
    }

    pub fn fixed_header(&self) -> FixedHeader {
        match self {
            MqttPacket::Publish(message) => FixedHeader::new(
                PacketType::Publish,
                message.retain,
                message.qos,
                message.duplicate,
            ),
            _ => FixedHeader::new(self.packet_type(), false, self.qos(), false),
        }
    }

    fn encode_body<B: BufMut>(&self, out: &mut B) -> Result<()> {
        use self::MqttPacket::*;

        match self {
            Connect {
                protocol_level,
                clean_session,
                keep_alive,
                client_id,
                will,
                username,
                password,
            } => {
                write_string(protocol_level.protocol_name(), out)?;
                out.put_u8(*protocol_level as u8);

                let username = username.as_ref().filter(|u| !u.is_empty());
                let password = password.as_ref().filter(|p| !p.is_empty());

                let mut flags = will.as_ref().map_or(ConnFlags::empty(), |w| {
                    let mut f: ConnFlags = w.qos.into();
                    f.insert(ConnFlags::WILL_FLAG);
                    f.set(ConnFlags::WILL_RETAIN, w.retain);
                    f
                });
                flags.set(ConnFlags::CLEAN_SESS, *clean_session);
                flags.set(ConnFlags::USERNAME, username.is_some());
                flags.set(ConnFlags::PASSWORD, password.is_some());
                out.put_u8(flags.bits());

                out.put_u16(*keep_alive);

                write_string(client_id, out)?;
                if let Some(will) = will {
                    write_string(&will.topic, out)?;
                    write_binary(&will.payload, out)?;
                }
                if let Some(username) = username {
                    write_string(username, out)?;
                }
                if let Some(password) = password {
                    write_string(password, out)?;
                }
            }
            ConnAck {
                session_present,
                return_code,
            } => {
                out.put_u8(u8::from(*session_present));
                out.put_u8(*return_code as u8);
            }
            Publish(message) => {
                write_string(&message.topic, out)?;
                if message.qos != QualityOfService::QoS0 {
                    out.put_u16(message.message_id);
                }
                out.put_slice(&message.payload);
            }
            PubAck { message_id }
            | PubRec { message_id }
            | PubRel { message_id }
            | PubComp { message_id }
            | UnsubAck { message_id } => {
                out.put_u16(*message_id);
            }
            Subscribe(request) => {
                out.put_u16(request.message_id);
                write_string(&request.topic, out)?;
                out.put_u8(request.qos as u8);
            }
            SubAck {
                message_id,
                granted,
            } => {
                out.put_u16(*message_id);
                out.put_u8(granted_qos_to_u8(*granted));
            }
            Unsubscribe(request) => {
                out.put_u16(request.message_id);
                write_string(&request.topic, out)?;
            }
            PingReq | PingResp | Disconnect => {}
        }

        Ok(())
    }

    /// Attempt to encode the packet, fixed header included, into a buffer.
    ///
    /// Strings that break the MQTT string rules and packets bigger than the remaining length field allows are
    /// rejected. Nothing is written to `out` on failure.
    pub fn encode<B: BufMut>(&self, out: &mut B) -> Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;

        let header = self.fixed_header().encode(body.len())?;
        out.put_slice(&header);
        out.put_slice(&body);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decodes a packet from its first header byte and its body, the bytes after the remaining length field.
    pub fn decode_body(header: u8, body: &[u8]) -> Result<MqttPacket> {
        let fixed = FixedHeader::decode(header)?;

        let expected = match fixed.packet_type {
            PacketType::Publish => fixed.flags(),
            PacketType::Subscribe | PacketType::Unsubscribe | PacketType::PubRel => PacketFlags::QOS1,
            _ => PacketFlags::empty(),
        };
        ensure!(
            header & 0x0F == expected.bits(),
            InvalidPacketFlagsSnafu {
                packet_type: fixed.packet_type,
                flags: header & 0x0F,
            }
        );

        parsers::packet(fixed, body)
    }

    /// Like `decode_body`, but any failure is reported as `None`.
    pub fn parse(header: u8, body: &[u8]) -> Option<MqttPacket> {
        MqttPacket::decode_body(header, body).ok()
    }

    /// Attempts to decode a MQTT Control Packet from the provided slice of bytes.
    ///
    /// If there is a fully formed packet in the slice, the rest of the slice and the packet are returned. If there are
    /// not enough bytes for a fully formed packet, `Ok(None)` is returned.
    ///
    /// # Examples
    /// ```
    /// # use tokio_mqtt3::proto::MqttPacket;
    /// let buffer: Vec<u8> = vec![0b10110000, 2, 0, 1];
    /// assert_eq!(MqttPacket::from_buf(&buffer), Ok(Some((&[][..], MqttPacket::UnsubAck { message_id: 1 }))));
    /// ```
    pub fn from_buf<B: AsRef<[u8]> + ?Sized>(buf: &B) -> Result<Option<(&[u8], MqttPacket)>> {
        let buf = buf.as_ref();
        if buf.is_empty() {
            return Ok(None);
        }

        let (length, used) = match decode_remaining_length(&buf[1..])? {
            Some(t) => t,
            None => return Ok(None),
        };

        let start = 1 + used;
        if buf.len() < start + length {
            return Ok(None);
        }

        let packet = MqttPacket::decode_body(buf[0], &buf[start..start + length])?;
        Ok(Some((&buf[start + length..], packet)))
    }
}
