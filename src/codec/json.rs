//! JSON codec using `serde_json`.
//!
//! Used for handshake records and for servers whose advertised serializer is
//! `json`. Payloads stay opaque bytes everywhere else.
//!
//! # Example
//!
//! ```
//! use pomelo_client::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Verify {
//!     token: String,
//! }
//!
//! let msg = Verify { token: "abc".to_string() };
//! let encoded = JsonCodec::encode(&msg).unwrap();
//! let decoded: Verify = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// Serializer name the server advertises for JSON payloads.
pub const JSON_SERIALIZER: &str = "json";

/// JSON codec for structured payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
