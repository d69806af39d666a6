//! The engine's single error enum. Every fallible public operation returns
//! [`Result<T>`], never a boxed `dyn Error` or a bare string.

use thiserror::Error;

use mqttsn_core::DecodeError;

pub type Result<T> = core::result::Result<T, Error>;

/// Every kind of failure this engine can surface, grouped by policy rather
/// than by subsystem: transient kinds are retried internally before they
/// ever reach here, protocol/resource/caller kinds never are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // --- Transient: exhausted after the engine's own retry policy ---
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("inbound queue is full")]
    QueueFull,
    #[error("transport would block")]
    WouldBlock,
    #[error("transport send is busy")]
    TransportSendBusy,

    // --- Protocol ---
    #[error("malformed frame: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("unexpected message received while waiting for a response")]
    UnexpectedMessage,
    #[error("gateway rejected the request with return code {0}")]
    Rejected(u8),

    // --- Resource ---
    #[error("out of memory")]
    OutOfMemory,
    #[error("receive budget exceeded")]
    BudgetExceeded,
    #[error("chunk payload too large")]
    ChunkTooLarge,

    // --- Fatal session: caller must reconnect ---
    #[error("not connected")]
    NotConnected,
    #[error("keep-alive lost, no PINGRESP within the deadline")]
    KeepaliveLost,
    #[error("session disconnected")]
    Disconnected,

    // --- Caller ---
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("topic unknown")]
    TopicUnknown,

    // --- Transport adapter surface (§4.J) ---
    #[error("no route to destination")]
    RouteError,
    #[error("transport at capacity")]
    Capacity,
    #[error("socket error: {0}")]
    SocketError(&'static str),
}
