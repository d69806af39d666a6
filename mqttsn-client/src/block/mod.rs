//! Block transfer subsystem: chunked large-payload transport layered on
//! MQTT-SN PUBLISH with NACK-driven retransmission (§4.H, §4.I).

pub mod receiver;
pub mod sender;

pub use receiver::{BlockReceiver, ChunkOutcome, Phase};
pub use sender::{BlockSender, SendAction};
