use bytes::BytesMut;
use slog::Logger;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::errors::Error;
use crate::proto::{decode_remaining_length, MqttPacket, PacketType};

pub type MqttFramed<I> = Framed<I, MqttCodec>;

/// Frames MQTT control packets on a byte stream.
///
/// A frame whose remaining length is intact but whose body cannot be decoded is dropped and counted, and decoding carries
/// on with the next frame. A broken remaining length field is an error because frame boundaries are lost. So is a CONNACK
/// that cannot be decoded, since the connect attempt it answers cannot succeed.
pub struct MqttCodec {
    logger: Logger,
    discarded: u64,
}

impl MqttCodec {
    pub fn new(logger: Logger) -> MqttCodec {
        MqttCodec {
            logger,
            discarded: 0,
        }
    }

    /// Number of frames dropped because they could not be decoded.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Encoder<MqttPacket> for MqttCodec {
    type Error = Error;

    fn encode(&mut self, item: MqttPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)?;
        Ok(())
    }
}

impl Decoder for MqttCodec {
    type Item = MqttPacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }

            let (length, used) = match decode_remaining_length(&src[1..])? {
                Some(t) => t,
                None => return Ok(None),
            };

            let frame_len = 1 + used + length;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let frame = src.split_to(frame_len);
            match MqttPacket::decode_body(frame[0], &frame[1 + used..]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) if frame[0] >> 4 == PacketType::ConnAck as u8 => return Err(e.into()),
                Err(e) => {
                    self.discarded += 1;
                    warn!(self.logger, "Discarding unparseable frame";
                          "header" => frame[0], "length" => length, "error" => %e,
                          "discarded" => self.discarded);
                }
            }
        }
    }
}
