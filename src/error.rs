//! Error types for pomelo-client.

use thiserror::Error;

/// Packet framing errors. Fatal for the connection that produced them.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Packet kind byte outside `1..=5`.
    #[error("unknown packet kind: {0:#04x}")]
    UnknownPacketKind(u8),

    /// Payload does not fit the 24-bit length field or exceeds the configured maximum.
    #[error("packet payload size {size} exceeds maximum {max}")]
    PacketTooLarge {
        /// Offending payload size.
        size: usize,
        /// Limit in effect.
        max: usize,
    },
}

/// Message decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer ended before the message header, id or route was complete.
    #[error("truncated message")]
    Truncated,

    /// Message kind bits hold a value outside `0..=3`.
    #[error("invalid message kind: {0}")]
    InvalidMessageKind(u8),

    /// Varint id does not fit in 32 bits.
    #[error("message id varint overflows u32")]
    VarintOverflow,

    /// Compressed route code has no entry in the route dictionary.
    #[error("route code {0} not found in dictionary")]
    RouteNotFound(u16),

    /// Literal route is not valid UTF-8.
    #[error("route is not valid UTF-8")]
    InvalidRoute,

    /// Gzip payload could not be inflated.
    #[error("failed to inflate payload: {0}")]
    Inflate(#[source] std::io::Error),
}

/// Main error type for all pomelo-client operations.
#[derive(Debug, Error)]
pub enum PomeloError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid packet header or oversized packet.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Malformed message inside a data packet.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Handshake failed; no session was established.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Literal route longer than the 1-byte length prefix allows.
    #[error("Route length {0} exceeds 255 bytes")]
    RouteTooLong(usize),

    /// Outbound queue is full.
    #[error("Send queue full")]
    QueueFull,

    /// Session is closed (or closed before a response arrived).
    #[error("Session closed")]
    SessionClosed,

    /// No response arrived for the request within the caller's deadline.
    #[error("Request {0} timed out")]
    RequestTimeout(u32),
}

/// Result type alias using PomeloError.
pub type Result<T> = std::result::Result<T, PomeloError>;
