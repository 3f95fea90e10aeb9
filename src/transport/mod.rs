//! Transport module - byte-stream setup.
//!
//! The session runs over any `AsyncRead + AsyncWrite` stream; this module
//! provides the TCP connector used by [`crate::connect`].

mod tcp;

pub use tcp::{connect_tcp, DEFAULT_CONNECT_TIMEOUT};
