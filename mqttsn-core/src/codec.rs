//! Frame envelope (length + type) and per-message encode/decode.
//!
//! Decoding never overlays a packed struct on the input bytes: every
//! multi-byte field is pulled out through an explicit big-endian read,
//! either a byte-shift helper here or one of `nom`'s `be_u16`/`be_u8`
//! combinators, so the codec behaves the same regardless of the target's
//! alignment requirements.

use core::convert::TryFrom;
use core::str;

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    combinator::{map, map_opt, map_res, rest},
    number::complete::{be_u16, be_u8},
    sequence::tuple,
    IResult,
};

use crate::error::{DecodeError, EncodeError};
use crate::types::*;

/// An escaped length prefix (0x01 followed by a big-endian u16) is used
/// once the frame, including the prefix itself, would not fit in one byte.
const ESCAPE: u8 = 0x01;
const CLIENT_ID_MAX_LEN: usize = 23;

/// Encode `msg` into a freshly allocated frame: `[length][type][body...]`.
pub fn encode(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut body = BytesMut::new();
    encode_body(msg, &mut body)?;

    let total_len = 2 + body.len();
    let mut frame = Vec::with_capacity(total_len.max(4));

    if total_len <= 255 {
        frame.put_u8(total_len as u8);
    } else if total_len <= u16::from(u16::MAX) as usize {
        frame.put_u8(ESCAPE);
        frame.put_u16(total_len as u16);
    } else {
        return Err(EncodeError::FrameTooLarge);
    }

    frame.put_u8(msg.msg_type() as u8);
    frame.extend_from_slice(&body);

    Ok(frame)
}

fn put_str(buf: &mut BytesMut, field: &'static str, s: &str) -> Result<(), EncodeError> {
    if s.len() > 250 {
        return Err(EncodeError::FieldTooLarge(field));
    }
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn encode_body(msg: &Message, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match msg {
        Message::Advertise { gw_id, duration } => {
            buf.put_u8(*gw_id);
            buf.put_u16(*duration);
        }
        Message::SearchGw { radius } => buf.put_u8(*radius),
        Message::GwInfo { gw_id, gw_add } => {
            buf.put_u8(*gw_id);
            buf.put_slice(gw_add);
        }
        Message::Connect {
            flags,
            duration,
            client_id,
        } => {
            if client_id.len() > CLIENT_ID_MAX_LEN {
                return Err(EncodeError::FieldTooLarge("client_id"));
            }
            buf.put_u8(flags.bits());
            buf.put_u8(0x01); // protocol id, fixed per spec
            buf.put_u16(*duration);
            put_str(buf, "client_id", client_id)?;
        }
        Message::ConnAck { return_code } => buf.put_u8(*return_code as u8),
        Message::WillTopicReq => {}
        Message::WillTopic { flags, topic } => {
            buf.put_u8(flags.bits());
            put_str(buf, "will_topic", topic)?;
        }
        Message::WillMsgReq => {}
        Message::WillMsg { message } => buf.put_slice(message),
        Message::Register {
            topic_id,
            msg_id,
            topic_name,
        } => {
            buf.put_u16(*topic_id);
            buf.put_u16(*msg_id);
            put_str(buf, "topic_name", topic_name)?;
        }
        Message::RegAck {
            topic_id,
            msg_id,
            return_code,
        } => {
            buf.put_u16(*topic_id);
            buf.put_u16(*msg_id);
            buf.put_u8(*return_code as u8);
        }
        Message::Publish {
            flags,
            topic_id,
            msg_id,
            data,
        } => {
            buf.put_u8(flags.bits());
            buf.put_u16(*topic_id);
            buf.put_u16(*msg_id);
            buf.put_slice(data);
        }
        Message::PubAck {
            topic_id,
            msg_id,
            return_code,
        } => {
            buf.put_u16(*topic_id);
            buf.put_u16(*msg_id);
            buf.put_u8(*return_code as u8);
        }
        Message::PubRec { msg_id } | Message::PubRel { msg_id } | Message::PubComp { msg_id } => {
            buf.put_u16(*msg_id);
        }
        Message::Subscribe { flags, msg_id, topic } => {
            buf.put_u8(flags.bits());
            buf.put_u16(*msg_id);
            encode_topic_ref(buf, topic)?;
        }
        Message::SubAck {
            flags,
            topic_id,
            msg_id,
            return_code,
        } => {
            buf.put_u8(flags.bits());
            buf.put_u16(*topic_id);
            buf.put_u16(*msg_id);
            buf.put_u8(*return_code as u8);
        }
        Message::Unsubscribe { msg_id, topic } => {
            // TopicIdType lives in a flags byte that SUBSCRIBE/UNSUBSCRIBE share;
            // UNSUBSCRIBE's only ever carries the type bits, DUP/QoS unused.
            let flags = topic_ref_flags(topic);
            buf.put_u8(flags.bits());
            buf.put_u16(*msg_id);
            encode_topic_ref(buf, topic)?;
        }
        Message::UnsubAck { msg_id } => buf.put_u16(*msg_id),
        Message::PingReq { client_id } => {
            if let Some(id) = client_id {
                put_str(buf, "client_id", id)?;
            }
        }
        Message::PingResp => {}
        Message::Disconnect { duration } => {
            if let Some(d) = duration {
                buf.put_u16(*d);
            }
        }
    }

    Ok(())
}

fn topic_ref_flags(topic: &TopicRef) -> Flags {
    let kind = match topic {
        TopicRef::Name(_) => TopicIdType::Normal,
        TopicRef::Predefined(_) => TopicIdType::Predefined,
        TopicRef::Short(_) => TopicIdType::Short,
    };
    Flags::empty().with_topic_id_type(kind)
}

fn encode_topic_ref(buf: &mut BytesMut, topic: &TopicRef) -> Result<(), EncodeError> {
    match topic {
        TopicRef::Name(name) => put_str(buf, "topic_name", name)?,
        TopicRef::Predefined(id) => buf.put_u16(*id),
        TopicRef::Short(bytes) => buf.put_slice(bytes),
    }
    Ok(())
}

/// Decode exactly one frame out of `input`. `input` must contain the whole
/// frame (length prefix included) and nothing past it; the inbound queue
/// is responsible for framing raw datagrams before they reach here.
pub fn decode(input: &[u8]) -> Result<Message, DecodeError> {
    let (rest, total_len) = frame_length(input).map_err(|_| DecodeError::TooShort)?;

    if total_len != input.len() {
        return Err(DecodeError::LengthMismatch);
    }

    let (body, type_byte) =
        be_u8::<_, nom::error::Error<&[u8]>>(rest).map_err(|_| DecodeError::TooShort)?;
    let msg_type = MsgType::try_from(type_byte).map_err(DecodeError::UnknownType)?;

    decode_body(msg_type, body)
}

fn frame_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (rest, first) = be_u8(input)?;

    if first == ESCAPE {
        map(be_u16, |len| len as usize)(rest)
    } else {
        Ok((rest, first as usize))
    }
}

fn utf8_str(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(rest, str::from_utf8)(input)
}

fn return_code(input: &[u8]) -> IResult<&[u8], ReturnCode> {
    map_opt(be_u8, ReturnCode::from_u8)(input)
}

fn decode_body(msg_type: MsgType, body: &[u8]) -> Result<Message, DecodeError> {
    let too_short = |_| DecodeError::TooShort;

    match msg_type {
        MsgType::Advertise => {
            let (_, (gw_id, duration)) =
                tuple((be_u8, be_u16))(body).map_err(too_short)?;
            Ok(Message::Advertise { gw_id, duration })
        }
        MsgType::SearchGw => {
            let (_, radius) = be_u8(body).map_err(too_short)?;
            Ok(Message::SearchGw { radius })
        }
        MsgType::GwInfo => {
            let (rest, gw_id) = be_u8(body).map_err(too_short)?;
            Ok(Message::GwInfo {
                gw_id,
                gw_add: rest.to_vec(),
            })
        }
        MsgType::Connect => {
            let (rest, (flags_byte, _protocol_id, duration)) =
                tuple((be_u8, be_u8, be_u16))(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            let (_, client_id) = utf8_str(rest).map_err(too_short)?;
            Ok(Message::Connect {
                flags,
                duration,
                client_id: client_id.to_owned(),
            })
        }
        MsgType::ConnAck => {
            let (_, code) = return_code(body).map_err(too_short)?;
            Ok(Message::ConnAck { return_code: code })
        }
        MsgType::WillTopicReq => Ok(Message::WillTopicReq),
        MsgType::WillTopic => {
            if body.is_empty() {
                // An empty WILLTOPIC deletes the will; we still need flags,
                // but the spec leaves the field optional in that case.
                return Ok(Message::WillTopic {
                    flags: Flags::empty(),
                    topic: String::new(),
                });
            }
            let (rest, flags_byte) = be_u8(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            let (_, topic) = utf8_str(rest).map_err(too_short)?;
            Ok(Message::WillTopic {
                flags,
                topic: topic.to_owned(),
            })
        }
        MsgType::WillMsgReq => Ok(Message::WillMsgReq),
        MsgType::WillMsg => Ok(Message::WillMsg {
            message: body.to_vec(),
        }),
        MsgType::Register => {
            let (rest, (topic_id, msg_id)) = tuple((be_u16, be_u16))(body).map_err(too_short)?;
            let (_, topic_name) = utf8_str(rest).map_err(too_short)?;
            Ok(Message::Register {
                topic_id,
                msg_id,
                topic_name: topic_name.to_owned(),
            })
        }
        MsgType::RegAck => {
            let (_, (topic_id, msg_id, code)) =
                tuple((be_u16, be_u16, return_code))(body).map_err(too_short)?;
            Ok(Message::RegAck {
                topic_id,
                msg_id,
                return_code: code,
            })
        }
        MsgType::Publish => {
            let (rest, (flags_byte, topic_id, msg_id)) =
                tuple((be_u8, be_u16, be_u16))(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            if flags.topic_id_type() == Err(()) {
                return Err(DecodeError::TopicIdTypeReserved);
            }
            Ok(Message::Publish {
                flags,
                topic_id,
                msg_id,
                data: rest.to_vec(),
            })
        }
        MsgType::PubAck => {
            let (_, (topic_id, msg_id, code)) =
                tuple((be_u16, be_u16, return_code))(body).map_err(too_short)?;
            Ok(Message::PubAck {
                topic_id,
                msg_id,
                return_code: code,
            })
        }
        MsgType::PubRec => Ok(Message::PubRec {
            msg_id: be_u16(body).map_err(too_short)?.1,
        }),
        MsgType::PubRel => Ok(Message::PubRel {
            msg_id: be_u16(body).map_err(too_short)?.1,
        }),
        MsgType::PubComp => Ok(Message::PubComp {
            msg_id: be_u16(body).map_err(too_short)?.1,
        }),
        MsgType::Subscribe => {
            let (rest, (flags_byte, msg_id)) = tuple((be_u8, be_u16))(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            let topic = decode_topic_ref(flags, rest)?;
            Ok(Message::Subscribe { flags, msg_id, topic })
        }
        MsgType::SubAck => {
            let (_, (flags_byte, topic_id, msg_id, code)) =
                tuple((be_u8, be_u16, be_u16, return_code))(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            Ok(Message::SubAck {
                flags,
                topic_id,
                msg_id,
                return_code: code,
            })
        }
        MsgType::Unsubscribe => {
            let (rest, (flags_byte, msg_id)) = tuple((be_u8, be_u16))(body).map_err(too_short)?;
            let flags = Flags::from_bits(flags_byte).ok_or(DecodeError::InvalidFlags)?;
            let topic = decode_topic_ref(flags, rest)?;
            Ok(Message::Unsubscribe { msg_id, topic })
        }
        MsgType::UnsubAck => Ok(Message::UnsubAck {
            msg_id: be_u16(body).map_err(too_short)?.1,
        }),
        MsgType::PingReq => {
            if body.is_empty() {
                Ok(Message::PingReq { client_id: None })
            } else {
                let (_, client_id) = utf8_str(body).map_err(too_short)?;
                Ok(Message::PingReq {
                    client_id: Some(client_id.to_owned()),
                })
            }
        }
        MsgType::PingResp => Ok(Message::PingResp),
        MsgType::Disconnect => {
            if body.is_empty() {
                Ok(Message::Disconnect { duration: None })
            } else {
                let (_, duration) = be_u16(body).map_err(too_short)?;
                Ok(Message::Disconnect {
                    duration: Some(duration),
                })
            }
        }
    }
}

fn decode_topic_ref(flags: Flags, input: &[u8]) -> Result<TopicRef, DecodeError> {
    match flags.topic_id_type().map_err(|_| DecodeError::TopicIdTypeReserved)? {
        TopicIdType::Normal => {
            let (_, name) = utf8_str(input)
                .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| DecodeError::TooShort)?;
            Ok(TopicRef::Name(name.to_owned()))
        }
        TopicIdType::Predefined => {
            let (_, id) =
                be_u16::<_, nom::error::Error<&[u8]>>(input).map_err(|_| DecodeError::TooShort)?;
            Ok(TopicRef::Predefined(id))
        }
        TopicIdType::Short => {
            let (_, two) = take::<_, _, ()>(2usize)(input).map_err(|_| DecodeError::TooShort)?;
            let mut bytes = [0u8; 2];
            bytes.copy_from_slice(two);
            Ok(TopicRef::Short(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn connack_accepted_round_trips() {
        let msg = Message::ConnAck {
            return_code: ReturnCode::Accepted,
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes, vec![0x03, 0x05, 0x00]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn connack_rejected_not_supported() {
        let bytes = vec![0x03, 0x05, 0x03];
        assert_eq!(
            decode(&bytes).unwrap(),
            Message::ConnAck {
                return_code: ReturnCode::NotSupported
            }
        );
    }

    #[test]
    fn length_byte_matches_total_frame_length() {
        let msg = Message::Connect {
            flags: Flags::empty().with_qos(QoS::Zero) | Flags::CLEAN,
            duration: 60,
            client_id: "pico_w".into(),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes[0] as usize, bytes.len());
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn escaped_length_used_past_255_bytes() {
        let msg = Message::Publish {
            flags: Flags::empty(),
            topic_id: 7,
            msg_id: 1,
            data: vec![0xAB; 300],
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes[0], 0x01);
        let declared = ((bytes[1] as usize) << 8) | bytes[2] as usize;
        assert_eq!(declared, bytes.len());
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn puback_is_seven_bytes() {
        let msg = Message::PubAck {
            topic_id: 7,
            msg_id: 1,
            return_code: ReturnCode::Accepted,
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), 7);
        assert_eq!(
            bytes,
            vec![0x07, 0x0D, 0x00, 0x07, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn puback_tolerates_eight_bytes_on_receive() {
        // Some peers pad PUBACK with a trailing byte; decode must not choke
        // on the extra byte as long as the length prefix matches the frame.
        let bytes = vec![0x08, 0x0D, 0x00, 0x07, 0x00, 0x01, 0x00, 0x00];
        assert_matches!(decode(&bytes), Ok(Message::PubAck { .. }));
    }

    #[test]
    fn unknown_type_rejected() {
        let bytes = vec![0x02, 0xF0];
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownType(0xF0)));
    }

    #[test]
    fn truncated_frame_rejected() {
        let bytes = vec![0x07, 0x0D, 0x00];
        assert_eq!(decode(&bytes), Err(DecodeError::TooShort));
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut bytes = encode(&Message::PingReq { client_id: None }).unwrap();
        bytes[0] = 0xFF;
        assert_eq!(decode(&bytes), Err(DecodeError::LengthMismatch));
    }

    #[test]
    fn reserved_topic_id_type_rejected() {
        let bytes = vec![0x07, 0x0C, 0b0000_0011, 0x00, 0x07, 0x00, 0x01];
        assert_eq!(decode(&bytes), Err(DecodeError::TopicIdTypeReserved));
    }

    #[test]
    fn subscribe_short_topic_round_trips() {
        let msg = Message::Subscribe {
            flags: Flags::empty()
                .with_qos(QoS::One)
                .with_topic_id_type(TopicIdType::Short),
            msg_id: 42,
            topic: TopicRef::Short(*b"ab"),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }
}
