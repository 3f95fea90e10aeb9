//! Message encoding and decoding.
//!
//! A message is the payload of a `Data` packet:
//! ```text
//! ┌───────┬─────────────────┬──────────────────────────┬─────────┐
//! │ Flags │ Id (varint)     │ Route                    │ Payload │
//! │ 1 byte│ Request/Response│ Request/Notify/Push      │ rest    │
//! └───────┴─────────────────┴──────────────────────────┴─────────┘
//! ```
//!
//! The route is either a 2-byte big-endian dictionary code (route-compressed
//! flag set) or a 1-byte length followed by the UTF-8 route name.

use bytes::{BufMut, Bytes, BytesMut};

use super::route_dict::RouteDictionary;
use super::varint::{decode_varint, encode_varint, MAX_VARINT_LEN};
use crate::codec::JsonCodec;
use crate::compression;
use crate::error::{DecodeError, PomeloError, Result};

/// Flag bit layout of the message header byte.
pub mod flags {
    /// Route is a 2-byte dictionary code.
    pub const ROUTE_COMPRESSED: u8 = 0b0000_0001;
    /// Mask for the 3 kind bits after shifting right by [`KIND_SHIFT`].
    pub const KIND_MASK: u8 = 0b0000_0111;
    /// Position of the kind bits.
    pub const KIND_SHIFT: u8 = 1;
    /// Payload is gzip-compressed.
    pub const GZIP: u8 = 0b0001_0000;
    /// Response represents a failure.
    pub const ERROR: u8 = 0b0010_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Longest literal route the 1-byte length prefix can describe.
pub const MAX_ROUTE_LEN: usize = u8::MAX as usize;

/// Message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client request expecting a response.
    Request = 0,
    /// Fire-and-forget client message.
    Notify = 1,
    /// Server answer to a request.
    Response = 2,
    /// Server-initiated message.
    Push = 3,
}

impl MessageKind {
    /// Whether messages of this kind carry an id.
    #[inline]
    pub fn has_id(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Whether messages of this kind carry a route.
    #[inline]
    pub fn has_route(self) -> bool {
        matches!(self, Self::Request | Self::Notify | Self::Push)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Notify),
            2 => Ok(Self::Response),
            3 => Ok(Self::Push),
            other => Err(DecodeError::InvalidMessageKind(other)),
        }
    }
}

/// An application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageKind,
    /// Request/response correlation id (0 for kinds without an id).
    pub id: u32,
    /// Handler route (empty for responses).
    pub route: String,
    /// Opaque payload bytes, already inflated.
    pub payload: Bytes,
    /// Error flag (set on failed responses).
    pub is_error: bool,
    /// Payload arrived gzip-compressed. Decode-only; encode always sends plain payloads.
    pub compressed: bool,
}

impl Message {
    fn new(kind: MessageKind, id: u32, route: String, payload: Bytes) -> Self {
        Self {
            kind,
            id,
            route,
            payload,
            is_error: false,
            compressed: false,
        }
    }

    /// Build a request.
    pub fn request(id: u32, route: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Request, id, route.into(), payload.into())
    }

    /// Build a notify.
    pub fn notify(route: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Notify, 0, route.into(), payload.into())
    }

    /// Build a response.
    pub fn response(id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Response, id, String::new(), payload.into())
    }

    /// Build a push.
    pub fn push(route: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Push, 0, route.into(), payload.into())
    }

    /// Mark this message as an error.
    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserialize the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(&self.payload)
    }

    /// Encode this message, compressing the route when `dict` knows it.
    pub fn encode(&self, dict: &RouteDictionary) -> Result<Bytes> {
        encode_message(self, dict)
    }

    /// Decode a message, resolving compressed routes through `dict`.
    pub fn decode(data: &[u8], dict: &RouteDictionary) -> Result<Self> {
        decode_message(data, dict)
    }
}

/// Encode a message into the body of a `Data` packet.
///
/// The route is replaced by its dictionary code whenever `dict` holds one.
///
/// # Errors
///
/// [`PomeloError::RouteTooLong`] if a literal route exceeds 255 bytes.
pub fn encode_message(msg: &Message, dict: &RouteDictionary) -> Result<Bytes> {
    let code = if msg.kind.has_route() {
        dict.code(&msg.route)
    } else {
        None
    };
    if msg.kind.has_route() && code.is_none() && msg.route.len() > MAX_ROUTE_LEN {
        return Err(PomeloError::RouteTooLong(msg.route.len()));
    }

    let mut flag = (msg.kind as u8) << flags::KIND_SHIFT;
    if code.is_some() {
        flag |= flags::ROUTE_COMPRESSED;
    }
    if msg.is_error {
        flag |= flags::ERROR;
    }

    let mut buf =
        BytesMut::with_capacity(1 + MAX_VARINT_LEN + 1 + msg.route.len() + msg.payload.len());
    buf.put_u8(flag);

    if msg.kind.has_id() {
        encode_varint(msg.id, &mut buf);
    }

    if msg.kind.has_route() {
        match code {
            Some(code) => buf.put_u16(code),
            None => {
                buf.put_u8(msg.route.len() as u8);
                buf.put_slice(msg.route.as_bytes());
            }
        }
    }

    buf.put_slice(&msg.payload);
    Ok(buf.freeze())
}

/// Decode the body of a `Data` packet into a message.
///
/// Compressed routes are resolved through `dict`; gzip payloads are inflated.
pub fn decode_message(data: &[u8], dict: &RouteDictionary) -> Result<Message> {
    let (&flag, _) = data.split_first().ok_or(DecodeError::Truncated)?;
    let kind = MessageKind::try_from((flag >> flags::KIND_SHIFT) & flags::KIND_MASK)?;
    let mut offset = 1;

    let mut id = 0;
    if kind.has_id() {
        let (value, read) = decode_varint(&data[offset..])?;
        id = value;
        offset += read;
    }

    let mut route = String::new();
    if kind.has_route() {
        if flags::has_flag(flag, flags::ROUTE_COMPRESSED) {
            let bytes = data
                .get(offset..offset + 2)
                .ok_or(DecodeError::Truncated)?;
            let code = u16::from_be_bytes([bytes[0], bytes[1]]);
            route = dict.route(code).ok_or(DecodeError::RouteNotFound(code))?;
            offset += 2;
        } else {
            let len = *data.get(offset).ok_or(DecodeError::Truncated)? as usize;
            offset += 1;
            let bytes = data
                .get(offset..offset + len)
                .ok_or(DecodeError::Truncated)?;
            route = std::str::from_utf8(bytes)
                .map_err(|_| DecodeError::InvalidRoute)?
                .to_owned();
            offset += len;
        }
    }

    let body = &data[offset..];
    let compressed = flags::has_flag(flag, flags::GZIP);
    let payload = if compressed {
        Bytes::from(compression::inflate(body).map_err(DecodeError::Inflate)?)
    } else {
        Bytes::copy_from_slice(body)
    };

    Ok(Message {
        kind,
        id,
        route,
        payload,
        is_error: flags::has_flag(flag, flags::ERROR),
        compressed,
    })
}
