use std::convert::TryFrom;
use std::str;

use nom::combinator::{all_consuming, cond, map, map_res, rest};
use nom::error::{ErrorKind, FromExternalError, ParseError};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::{Err, IResult};
use snafu::ResultExt;

use super::errors::*;
use super::types::*;
use super::MqttPacket;

/// nom error carrying the protocol error that stopped the parse, if there was one.
#[derive(PartialEq, Debug)]
pub(crate) struct ParserError(Option<Error>);

impl ParserError {
    pub fn into_inner(self) -> Option<Error> {
        self.0
    }
}

impl<'a> ParseError<&'a [u8]> for ParserError {
    fn from_error_kind(_: &'a [u8], _: ErrorKind) -> ParserError {
        ParserError(None)
    }

    fn append(_: &'a [u8], _: ErrorKind, other: ParserError) -> ParserError {
        other
    }
}

impl<'a> FromExternalError<&'a [u8], Error> for ParserError {
    fn from_external_error(_: &'a [u8], _: ErrorKind, e: Error) -> ParserError {
        ParserError(Some(e))
    }
}

type ParserResult<'a, O> = IResult<&'a [u8], O, ParserError>;

/// Turns a failed parse into a protocol error, blaming `packet_type` when nothing more precise is known.
pub(crate) fn into_error(err: Err<ParserError>, packet_type: PacketType) -> Error {
    match err {
        Err::Incomplete(_) => Error::ParseFailure { packet_type },
        Err::Error(e) | Err::Failure(e) => e
            .into_inner()
            .unwrap_or(Error::ParseFailure { packet_type }),
    }
}

pub(crate) fn mqtt_string(input: &[u8]) -> ParserResult<String> {
    map_res(length_data(be_u16), |b: &[u8]| {
        let s = str::from_utf8(b).context(StringNotUtf8Snafu)?;
        validate_string(s)?;
        Ok::<String, Error>(s.to_string())
    })(input)
}

fn qos(input: &[u8]) -> ParserResult<QualityOfService> {
    map_res(be_u8, QualityOfService::try_from)(input)
}

fn conn_ack(input: &[u8]) -> ParserResult<MqttPacket> {
    let (r1, flags) = be_u8(input)?;
    let (r2, return_code) = map_res(be_u8, ConnectReturnCode::try_from)(r1)?;

    Ok((
        r2,
        MqttPacket::ConnAck {
            session_present: flags & 0x01 == 0x01,
            return_code,
        },
    ))
}

fn publish(input: &[u8], header: FixedHeader) -> ParserResult<MqttPacket> {
    let (r1, topic) = mqtt_string(input)?;
    let (r2, message_id) = cond(header.qos != QualityOfService::QoS0, be_u16)(r1)?;
    // The payload is whatever is left of the packet.
    let (r3, payload) = rest(r2)?;

    Ok((
        r3,
        MqttPacket::Publish(Message {
            topic,
            payload: payload.to_vec(),
            qos: header.qos,
            retain: header.retain,
            duplicate: header.duplicate,
            message_id: message_id.unwrap_or(0),
        }),
    ))
}

fn subscribe(input: &[u8]) -> ParserResult<MqttPacket> {
    map(tuple((be_u16, mqtt_string, qos)), |(message_id, topic, qos)| {
        MqttPacket::Subscribe(SubscribeRequest {
            message_id,
            topic,
            qos,
        })
    })(input)
}

fn sub_ack(input: &[u8]) -> ParserResult<MqttPacket> {
    map(
        tuple((be_u16, map_res(be_u8, granted_qos_from_u8))),
        |(message_id, granted)| MqttPacket::SubAck {
            message_id,
            granted,
        },
    )(input)
}

fn unsubscribe(input: &[u8]) -> ParserResult<MqttPacket> {
    map(tuple((be_u16, mqtt_string)), |(message_id, topic)| {
        MqttPacket::Unsubscribe(UnsubscribeRequest { message_id, topic })
    })(input)
}

fn message_id<'a, C>(input: &'a [u8], build: C) -> ParserResult<'a, MqttPacket>
where
    C: Fn(u16) -> MqttPacket,
{
    map(be_u16, build)(input)
}

fn empty(input: &[u8], packet: MqttPacket) -> ParserResult<MqttPacket> {
    Ok((input, packet))
}

fn packet_body(input: &[u8], header: FixedHeader) -> ParserResult<MqttPacket> {
    use self::PacketType::*;

    match header.packet_type {
        // A client never has to read CONNECT; the caller rejects it before we get here.
        Connect => Err(Err::Failure(ParserError(Some(Error::UnsupportedDecode {
            packet_type: Connect,
        })))),
        ConnAck => conn_ack(input),
        Publish => publish(input, header),
        PubAck => message_id(input, |message_id| MqttPacket::PubAck { message_id }),
        PubRec => message_id(input, |message_id| MqttPacket::PubRec { message_id }),
        PubRel => message_id(input, |message_id| MqttPacket::PubRel { message_id }),
        PubComp => message_id(input, |message_id| MqttPacket::PubComp { message_id }),
        Subscribe => subscribe(input),
        SubAck => sub_ack(input),
        Unsubscribe => unsubscribe(input),
        UnsubAck => message_id(input, |message_id| MqttPacket::UnsubAck { message_id }),
        PingReq => empty(input, MqttPacket::PingReq),
        PingResp => empty(input, MqttPacket::PingResp),
        Disconnect => empty(input, MqttPacket::Disconnect),
    }
}

/// Parses a complete packet body. Trailing bytes are an error.
pub(crate) fn packet(header: FixedHeader, body: &[u8]) -> Result<MqttPacket> {
    all_consuming(|i| packet_body(i, header))(body)
        .map(|(_, packet)| packet)
        .map_err(|e| into_error(e, header.packet_type))
}
