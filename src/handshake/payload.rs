//! Handshake records.
//!
//! The client sends a JSON capability descriptor; the server answers with a
//! status code, heartbeat interval, serializer name and optional route
//! dictionary. The server answer may be gzip-compressed.
//!
//! # Example
//!
//! ```
//! use pomelo_client::handshake::{ClientInfo, HandshakeRequest, HandshakeResponse};
//!
//! let request = HandshakeRequest::new(ClientInfo::default());
//! let json = request.to_bytes().unwrap();
//! assert!(std::str::from_utf8(&json).unwrap().contains("libVersion"));
//!
//! let response = HandshakeResponse::parse(br#"{"code":200,"sys":{"heartbeat":30}}"#).unwrap();
//! assert_eq!(response.sys.heartbeat, 30);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::JsonCodec;
use crate::compression;
use crate::error::{PomeloError, Result};

/// Status code of a successful handshake.
pub const HANDSHAKE_OK: u16 = 200;

/// Library version reported in the handshake.
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client identification sent in `sys` of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client platform name.
    pub platform: String,
    /// Client library version.
    #[serde(rename = "libVersion")]
    pub lib_version: String,
    /// Application build number.
    #[serde(rename = "clientBuildNumber")]
    pub build_number: String,
    /// Application version.
    #[serde(rename = "clientVersion")]
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            platform: "rust".to_string(),
            lib_version: LIB_VERSION.to_string(),
            build_number: "1".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// Handshake descriptor sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Client identification.
    pub sys: ClientInfo,
    /// Free-form user data forwarded to the server.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user: HashMap<String, serde_json::Value>,
}

impl HandshakeRequest {
    /// Create a request with no user data.
    pub fn new(sys: ClientInfo) -> Self {
        Self {
            sys,
            user: HashMap::new(),
        }
    }

    /// Serialize to the JSON handshake payload.
    pub fn to_bytes(&self) -> Result<Bytes> {
        JsonCodec::encode(self)
    }
}

/// Server-advertised session parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeSys {
    /// Route compression dictionary.
    #[serde(default)]
    pub dict: HashMap<String, u16>,
    /// Heartbeat interval in seconds (0 when the server disables heartbeats).
    #[serde(default)]
    pub heartbeat: u64,
    /// Payload serializer name, e.g. `json` or `protobuf`.
    #[serde(default)]
    pub serializer: String,
}

/// Handshake answer sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Status code; [`HANDSHAKE_OK`] on success.
    pub code: u16,
    /// Session parameters.
    #[serde(default)]
    pub sys: HandshakeSys,
}

impl HandshakeResponse {
    /// Parse a handshake payload, inflating it first if it is gzip-compressed.
    ///
    /// # Errors
    ///
    /// [`PomeloError::Handshake`] if the payload cannot be inflated or parsed,
    /// or if the status code is not [`HANDSHAKE_OK`].
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let inflated;
        let json = if compression::is_compressed(payload) {
            inflated = compression::inflate(payload)
                .map_err(|e| PomeloError::Handshake(format!("failed to inflate payload: {e}")))?;
            &inflated[..]
        } else {
            payload
        };

        let response: Self = JsonCodec::decode(json)
            .map_err(|e| PomeloError::Handshake(format!("malformed payload: {e}")))?;

        if response.code != HANDSHAKE_OK {
            return Err(PomeloError::Handshake(format!(
                "server rejected handshake with code {}",
                response.code
            )));
        }
        Ok(response)
    }

    /// Heartbeat interval, if the server enabled heartbeats.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.sys.heartbeat > 0).then(|| Duration::from_secs(self.sys.heartbeat))
    }
}
