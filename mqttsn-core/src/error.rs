use thiserror::Error;

/// Reasons a byte slice could not be parsed as an MQTT-SN frame.
///
/// Mirrors the `DecodeError` kinds enumerated by the wire codec specification;
/// callers match on these rather than on a generic parse failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes were supplied than the frame's own length prefix requires.
    #[error("frame too short")]
    TooShort,
    /// The length prefix does not match the number of bytes actually supplied.
    #[error("length prefix does not match frame size")]
    LengthMismatch,
    /// The message-type byte does not name a message this codec recognizes.
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    /// A flags byte combination this message type cannot carry (e.g. a reserved TopicIdType).
    #[error("invalid flags byte")]
    InvalidFlags,
    /// TopicIdType bits were `0b11` (reserved).
    #[error("reserved topic id type")]
    TopicIdTypeReserved,
}

/// Reasons a message could not be encoded to the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A field exceeded the size the wire format allows (e.g. client id > 23 bytes).
    #[error("field too large: {0}")]
    FieldTooLarge(&'static str),
    /// The encoded frame would exceed the 16-bit escaped length encoding.
    #[error("frame too large to encode")]
    FrameTooLarge,
}
