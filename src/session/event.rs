//! Session lifecycle states and inbound events.

use crate::protocol::Message;

/// Connection lifecycle.
///
/// `Disconnected → HandshakeSent → Connected → Closed`; `Closed` is terminal
/// and reachable from any state. States before `Connected` are observable
/// through [`SessionBuilder::subscribe_state`](super::SessionBuilder::subscribe_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream open, handshake not started.
    Disconnected,
    /// Handshake request written, waiting for the server.
    HandshakeSent,
    /// Handshake acknowledged; requests may flow.
    Connected,
    /// Session terminated.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the session was dropped.
    Local,
    /// Server sent a `Kick` packet.
    Kicked,
    /// Server closed the stream.
    PeerClosed,
    /// Unrecoverable I/O, framing or decode error.
    Error(String),
}

/// Event delivered on the session's inbound event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Server-initiated `Push` or `Notify` message.
    Push(Message),
    /// The session ended. Always the last event.
    Disconnected(CloseReason),
}
