//! # pomelo-client
//!
//! Async Rust client for the Pomelo/Pitaya binary game-server protocol.
//!
//! ## Architecture
//!
//! - **Packets**: 4-byte header (kind + 24-bit length) framing every read and write
//! - **Messages**: flags, varint request id, dictionary-compressed route, opaque payload
//! - **Session**: handshake, heartbeat replies, request/response correlation and
//!   push delivery over one multiplexed connection
//!
//! ## Example
//!
//! ```ignore
//! use pomelo_client::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pomelo_client::PomeloError> {
//!     let session = Session::builder()
//!         .user_data("token", "secret")
//!         .connect("127.0.0.1:3250")
//!         .await?;
//!
//!     let reply = session.request("lobby.verify", &b"{}"[..]).await?;
//!     println!("{}", String::from_utf8_lossy(reply.payload()));
//!
//!     session.send_notify("room.chat", &b"{\"text\":\"hi\"}"[..]).await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod compression;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

pub use error::{DecodeError, FramingError, PomeloError, Result};
pub use handshake::{ClientInfo, HandshakeResponse};
pub use protocol::{Message, MessageKind, RouteDictionary};
pub use session::{
    CloseReason, ResponseFuture, Session, SessionBuilder, SessionEvent, SessionState,
};

/// Connect over TCP with default settings and perform the handshake.
pub async fn connect<A>(addr: A) -> Result<Session>
where
    A: tokio::net::ToSocketAddrs,
{
    Session::connect(addr).await
}
