//! MQTT-SN wire types: message type codes, flags and the `Message` enum.
//!
//! Field layout follows the MQTT-SN v1.2 specification; this module is the
//! data model `codec.rs` encodes and decodes.

use core::convert::TryFrom;

/// One-byte MQTT-SN message type code (§4.A).
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum MsgType {
    Advertise = 0x00,
    SearchGw = 0x01,
    GwInfo = 0x02,
    Connect = 0x04,
    ConnAck = 0x05,
    WillTopicReq = 0x06,
    WillTopic = 0x07,
    WillMsgReq = 0x08,
    WillMsg = 0x09,
    Register = 0x0A,
    RegAck = 0x0B,
    Publish = 0x0C,
    PubAck = 0x0D,
    PubComp = 0x0E,
    PubRec = 0x0F,
    PubRel = 0x10,
    Subscribe = 0x12,
    SubAck = 0x13,
    Unsubscribe = 0x14,
    UnsubAck = 0x15,
    PingReq = 0x16,
    PingResp = 0x17,
    Disconnect = 0x18,
}

impl TryFrom<u8> for MsgType {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        use MsgType::*;

        Ok(match b {
            0x00 => Advertise,
            0x01 => SearchGw,
            0x02 => GwInfo,
            0x04 => Connect,
            0x05 => ConnAck,
            0x06 => WillTopicReq,
            0x07 => WillTopic,
            0x08 => WillMsgReq,
            0x09 => WillMsg,
            0x0A => Register,
            0x0B => RegAck,
            0x0C => Publish,
            0x0D => PubAck,
            0x0E => PubComp,
            0x0F => PubRec,
            0x10 => PubRel,
            0x12 => Subscribe,
            0x13 => SubAck,
            0x14 => Unsubscribe,
            0x15 => UnsubAck,
            0x16 => PingReq,
            0x17 => PingResp,
            0x18 => Disconnect,
            other => return Err(other),
        })
    }
}

/// Delivery guarantee for a PUBLISH. `MinusOne` is the MQTT-SN-only
/// "publish without connection" level; this engine never sends it but
/// accepts it on decode since gateways may echo it back in flags.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    Zero = 0,
    One = 1,
    Two = 2,
    MinusOne = -1,
}

impl QoS {
    fn from_bits(bits: u8) -> QoS {
        match bits {
            0b00 => QoS::Zero,
            0b01 => QoS::One,
            0b10 => QoS::Two,
            _ => QoS::MinusOne,
        }
    }

    fn bits(self) -> u8 {
        match self {
            QoS::Zero => 0b00,
            QoS::One => 0b01,
            QoS::Two => 0b10,
            QoS::MinusOne => 0b11,
        }
    }
}

/// Kind of topic identifier carried by PUBLISH/SUBSCRIBE/UNSUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicIdType {
    Normal,
    Predefined,
    Short,
}

bitflags::bitflags! {
    /// The flags byte shared by CONNECT, WILLTOPIC, PUBLISH, SUBSCRIBE, SUBACK and UNSUBSCRIBE.
    pub struct Flags: u8 {
        const DUP            = 0b1000_0000;
        const QOS            = 0b0110_0000;
        const RETAIN         = 0b0001_0000;
        const WILL           = 0b0000_1000;
        const CLEAN          = 0b0000_0100;
        const TOPIC_ID_TYPE  = 0b0000_0011;
    }
}

const QOS_SHIFT: u8 = 5;

impl Flags {
    pub fn qos(self) -> QoS {
        QoS::from_bits((self & Flags::QOS).bits() >> QOS_SHIFT)
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.remove(Flags::QOS);
        self |= Flags::from_bits_truncate(qos.bits() << QOS_SHIFT);
        self
    }

    pub fn topic_id_type(self) -> Result<TopicIdType, ()> {
        match (self & Flags::TOPIC_ID_TYPE).bits() {
            0b00 => Ok(TopicIdType::Normal),
            0b01 => Ok(TopicIdType::Predefined),
            0b10 => Ok(TopicIdType::Short),
            _ => Err(()),
        }
    }

    pub fn with_topic_id_type(mut self, kind: TopicIdType) -> Self {
        self.remove(Flags::TOPIC_ID_TYPE);
        let bits = match kind {
            TopicIdType::Normal => 0b00,
            TopicIdType::Predefined => 0b01,
            TopicIdType::Short => 0b10,
        };
        self |= Flags::from_bits_truncate(bits);
        self
    }
}

/// Gateway return code carried by CONNACK, REGACK, SUBACK and PUBACK.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Accepted = 0x00,
    Congestion = 0x01,
    InvalidTopicId = 0x02,
    NotSupported = 0x03,
}

impl ReturnCode {
    pub fn from_u8(b: u8) -> Option<ReturnCode> {
        Some(match b {
            0x00 => ReturnCode::Accepted,
            0x01 => ReturnCode::Congestion,
            0x02 => ReturnCode::InvalidTopicId,
            0x03 => ReturnCode::NotSupported,
            _ => return None,
        })
    }
}

/// How a topic is named on the wire in SUBSCRIBE/UNSUBSCRIBE and, implicitly, PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicRef {
    Name(String),
    Predefined(u16),
    Short([u8; 2]),
}

/// A decoded or to-be-encoded MQTT-SN control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Advertise {
        gw_id: u8,
        duration: u16,
    },
    SearchGw {
        radius: u8,
    },
    GwInfo {
        gw_id: u8,
        gw_add: Vec<u8>,
    },
    Connect {
        flags: Flags,
        duration: u16,
        client_id: String,
    },
    ConnAck {
        return_code: ReturnCode,
    },
    WillTopicReq,
    WillTopic {
        flags: Flags,
        topic: String,
    },
    WillMsgReq,
    WillMsg {
        message: Vec<u8>,
    },
    Register {
        topic_id: u16,
        msg_id: u16,
        topic_name: String,
    },
    RegAck {
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    Publish {
        flags: Flags,
        topic_id: u16,
        msg_id: u16,
        data: Vec<u8>,
    },
    PubAck {
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    PubRec {
        msg_id: u16,
    },
    PubRel {
        msg_id: u16,
    },
    PubComp {
        msg_id: u16,
    },
    Subscribe {
        flags: Flags,
        msg_id: u16,
        topic: TopicRef,
    },
    SubAck {
        flags: Flags,
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    Unsubscribe {
        msg_id: u16,
        topic: TopicRef,
    },
    UnsubAck {
        msg_id: u16,
    },
    PingReq {
        client_id: Option<String>,
    },
    PingResp,
    Disconnect {
        duration: Option<u16>,
    },
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        use Message::*;

        match self {
            Advertise { .. } => MsgType::Advertise,
            SearchGw { .. } => MsgType::SearchGw,
            GwInfo { .. } => MsgType::GwInfo,
            Connect { .. } => MsgType::Connect,
            ConnAck { .. } => MsgType::ConnAck,
            WillTopicReq => MsgType::WillTopicReq,
            WillTopic { .. } => MsgType::WillTopic,
            WillMsgReq => MsgType::WillMsgReq,
            WillMsg { .. } => MsgType::WillMsg,
            Register { .. } => MsgType::Register,
            RegAck { .. } => MsgType::RegAck,
            Publish { .. } => MsgType::Publish,
            PubAck { .. } => MsgType::PubAck,
            PubRec { .. } => MsgType::PubRec,
            PubRel { .. } => MsgType::PubRel,
            PubComp { .. } => MsgType::PubComp,
            Subscribe { .. } => MsgType::Subscribe,
            SubAck { .. } => MsgType::SubAck,
            Unsubscribe { .. } => MsgType::Unsubscribe,
            UnsubAck { .. } => MsgType::UnsubAck,
            PingReq { .. } => MsgType::PingReq,
            PingResp => MsgType::PingResp,
            Disconnect { .. } => MsgType::Disconnect,
        }
    }
}
