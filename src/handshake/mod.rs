//! Handshake module - capability exchange before steady-state traffic.
//!
//! The client announces itself with a JSON [`HandshakeRequest`]; the server
//! replies with a [`HandshakeResponse`] carrying the heartbeat interval,
//! payload serializer and route dictionary. The client then acknowledges and
//! the session becomes connected.

mod exchange;
mod payload;

pub use exchange::{exchange, send_ack, HandshakeOutcome};
pub use payload::{
    ClientInfo, HandshakeRequest, HandshakeResponse, HandshakeSys, HANDSHAKE_OK, LIB_VERSION,
};
