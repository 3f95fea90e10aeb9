//! Codec module - typed payload helpers.
//!
//! Message payloads are opaque bytes. [`JsonCodec`] turns serde values into
//! those bytes for servers using the `json` serializer and parses the JSON
//! handshake records.

mod json;

pub use json::{JsonCodec, JSON_SERIALIZER};
