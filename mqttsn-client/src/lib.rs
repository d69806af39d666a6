//! MQTT-SN v1.2 client engine: session state machine, QoS engine, block
//! transfer and the pub/sub API a constrained node drives over a single
//! UDP-facing transport.

pub mod block;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod persistence;
pub mod pubsub;
pub mod qos;
pub mod queue;
pub mod session;
pub mod transport;

pub use callbacks::{Callbacks, NullCallbacks};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use persistence::{NullPersistence, Persistence};
pub use pubsub::{Client, Topic};
pub use session::{Session, SessionState};
pub use transport::{RecvOutcome, SendOutcome, Transport};

#[cfg(feature = "std")]
pub use transport::udp::UdpTransport;
