//! Bookkeeping for packets that are waiting on an acknowledgment.
//!
//! QoS 1 and QoS 2 exchanges span several packets. The `Session` remembers which requests this client sent that the
//! server has not answered yet, and which QoS 2 exchanges the server started that are not finished on our side.

use linked_hash_map::LinkedHashMap;

use crate::errors::*;
use crate::proto::{Message, MqttPacket, PacketType, QualityOfService, SubscribeRequest, UnsubscribeRequest};

/// Identifies one tracked packet: its type and message identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingKey {
    pub packet_type: PacketType,
    pub message_id: u16,
}

impl TrackingKey {
    fn of(packet: &MqttPacket) -> Option<TrackingKey> {
        packet.message_id().map(|message_id| TrackingKey {
            packet_type: packet.packet_type(),
            message_id,
        })
    }
}

/// The in-flight state of a client connection.
///
/// A session can be serialized by the application and handed back to a new client to resume a connection made with
/// `clean_session` turned off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    sent_not_ack: LinkedHashMap<TrackingKey, MqttPacket>,
    received_not_ack: LinkedHashMap<TrackingKey, MqttPacket>,
}

fn push(
    map: &mut LinkedHashMap<TrackingKey, MqttPacket>,
    packet: MqttPacket,
    trackable: bool,
) -> Result<()> {
    let key = match TrackingKey::of(&packet) {
        Some(key) if trackable => key,
        _ => {
            return UntrackedPacketSnafu {
                packet_type: packet.packet_type(),
            }
            .fail()
        }
    };

    ensure!(
        !map.contains_key(&key),
        DuplicateMessageIdSnafu {
            packet_type: key.packet_type,
            message_id: key.message_id,
        }
    );

    map.insert(key, packet);
    Ok(())
}

fn pop<F>(
    map: &mut LinkedHashMap<TrackingKey, MqttPacket>,
    packet_type: PacketType,
    predicate: F,
) -> Option<MqttPacket>
where
    F: Fn(&MqttPacket) -> bool,
{
    let key = map
        .iter()
        .find(|(k, p)| k.packet_type == packet_type && predicate(p))
        .map(|(k, _)| *k)?;
    map.remove(&key)
}

fn has_id(message_id: u16) -> impl Fn(&MqttPacket) -> bool {
    move |p| p.message_id() == Some(message_id)
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// Records a packet this client just wrote that the server must acknowledge.
    ///
    /// Only QoS 1 and 2 PUBLISH, SUBSCRIBE and UNSUBSCRIBE packets are tracked. Tracking a second packet of the same
    /// type and message identifier is an error.
    pub fn push_sent_not_ack(&mut self, packet: MqttPacket) -> Result<()> {
        let trackable = match &packet {
            MqttPacket::Publish(m) => m.qos != QualityOfService::QoS0,
            MqttPacket::Subscribe(_) | MqttPacket::Unsubscribe(_) => true,
            _ => false,
        };
        push(&mut self.sent_not_ack, packet, trackable)
    }

    /// Records a QoS 2 packet that this client still has to finish answering: an incoming PUBLISH waiting on PUBREL,
    /// or a PUBREC whose exchange waits on PUBCOMP.
    pub fn push_received_not_ack(&mut self, packet: MqttPacket) -> Result<()> {
        let trackable = match &packet {
            MqttPacket::Publish(m) => m.qos == QualityOfService::QoS2,
            MqttPacket::PubRec { .. } => true,
            _ => false,
        };
        push(&mut self.received_not_ack, packet, trackable)
    }

    /// Removes and returns the oldest sent packet of `packet_type` accepted by `predicate`.
    pub fn pop_sent_not_ack<F>(&mut self, packet_type: PacketType, predicate: F) -> Option<MqttPacket>
    where
        F: Fn(&MqttPacket) -> bool,
    {
        pop(&mut self.sent_not_ack, packet_type, predicate)
    }

    /// Removes and returns the oldest received packet of `packet_type` accepted by `predicate`.
    pub fn pop_received_not_ack<F>(&mut self, packet_type: PacketType, predicate: F) -> Option<MqttPacket>
    where
        F: Fn(&MqttPacket) -> bool,
    {
        pop(&mut self.received_not_ack, packet_type, predicate)
    }

    pub fn pop_sent_publish(&mut self, message_id: u16) -> Option<Message> {
        match self.pop_sent_not_ack(PacketType::Publish, has_id(message_id)) {
            Some(MqttPacket::Publish(message)) => Some(message),
            _ => None,
        }
    }

    pub fn pop_sent_subscribe(&mut self, message_id: u16) -> Option<SubscribeRequest> {
        match self.pop_sent_not_ack(PacketType::Subscribe, has_id(message_id)) {
            Some(MqttPacket::Subscribe(request)) => Some(request),
            _ => None,
        }
    }

    pub fn pop_sent_unsubscribe(&mut self, message_id: u16) -> Option<UnsubscribeRequest> {
        match self.pop_sent_not_ack(PacketType::Unsubscribe, has_id(message_id)) {
            Some(MqttPacket::Unsubscribe(request)) => Some(request),
            _ => None,
        }
    }

    pub fn pop_received_publish(&mut self, message_id: u16) -> Option<Message> {
        match self.pop_received_not_ack(PacketType::Publish, has_id(message_id)) {
            Some(MqttPacket::Publish(message)) => Some(message),
            _ => None,
        }
    }

    pub fn pop_received_pub_rec(&mut self, message_id: u16) -> bool {
        self.pop_received_not_ack(PacketType::PubRec, has_id(message_id))
            .is_some()
    }

    pub fn has_received_publish(&self, message_id: u16) -> bool {
        self.received_not_ack.contains_key(&TrackingKey {
            packet_type: PacketType::Publish,
            message_id,
        })
    }

    /// Whether any sent request still waits on an acknowledgment under `message_id`.
    pub fn is_id_in_use(&self, message_id: u16) -> bool {
        self.sent_not_ack.keys().any(|k| k.message_id == message_id)
    }

    /// Takes out the packets to write again when a session is resumed, oldest first.
    ///
    /// A PUBLISH the server already answered with PUBREC stays tracked and continues with PUBREL. Any other request
    /// leaves the session and is returned to be written again, PUBLISH packets with their DUP flag set. Writing them
    /// tracks them again.
    pub fn take_redelivery(&mut self) -> Vec<MqttPacket> {
        let mut packets = Vec::with_capacity(self.sent_not_ack.len());
        let mut kept = LinkedHashMap::new();

        for (key, packet) in std::mem::take(&mut self.sent_not_ack) {
            match packet {
                MqttPacket::Publish(mut message) => {
                    let released = self.received_not_ack.contains_key(&TrackingKey {
                        packet_type: PacketType::PubRec,
                        message_id: key.message_id,
                    });
                    if released {
                        packets.push(MqttPacket::PubRel {
                            message_id: key.message_id,
                        });
                        kept.insert(key, MqttPacket::Publish(message));
                    } else {
                        message.duplicate = true;
                        packets.push(MqttPacket::Publish(message));
                    }
                }
                other => packets.push(other),
            }
        }

        self.sent_not_ack = kept;
        packets
    }

    pub fn sent_len(&self) -> usize {
        self.sent_not_ack.len()
    }

    pub fn received_len(&self) -> usize {
        self.received_not_ack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_not_ack.is_empty() && self.received_not_ack.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent_not_ack.clear();
        self.received_not_ack.clear();
    }
}

/// Hands out message identifiers for QoS 1 and 2 requests.
///
/// Identifiers run from 1 to 65534 and then wrap back to 1. Identifiers still in use are skipped.
#[derive(Clone, Debug, Default)]
pub struct MessageIdGenerator {
    last: u16,
}

impl MessageIdGenerator {
    pub const MAX_ID: u16 = 65_534;

    pub fn new() -> MessageIdGenerator {
        MessageIdGenerator::default()
    }

    /// Returns the next identifier for which `in_use` is false. If every identifier is taken the next one in sequence
    /// is returned regardless.
    pub fn next_id<F>(&mut self, in_use: F) -> u16
    where
        F: Fn(u16) -> bool,
    {
        let mut candidate = self.last;
        for _ in 0..Self::MAX_ID {
            candidate = if candidate >= Self::MAX_ID { 1 } else { candidate + 1 };
            if !in_use(candidate) {
                break;
            }
        }
        self.last = candidate;
        candidate
    }
}
