//! MQTT-SN v1.2 wire codec, topic registry, message-id allocator, block
//! transfer framing and supporting primitives shared by `mqttsn-client`.

pub mod chunk;
pub mod clock;
pub mod codec;
pub mod error;
pub mod id;
pub mod sniff;
pub mod topic;
pub mod types;

pub use clock::Clock;
pub use codec::{decode, encode};
pub use error::{DecodeError, EncodeError};
pub use id::MsgIdAllocator;
pub use topic::{TopicEntry, TopicRegistry};
pub use types::{Flags, Message, MsgType, QoS, ReturnCode, TopicIdType, TopicRef};
