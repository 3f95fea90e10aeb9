//! Packet framing.
//!
//! Every packet on the wire carries a 4-byte header:
//! ```text
//! ┌────────┬──────────────────┬───────────────┐
//! │ Kind   │ Length           │ Payload       │
//! │ 1 byte │ 3 bytes, uint BE │ Length bytes  │
//! └────────┴──────────────────┴───────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use pomelo_client::protocol::{decode_packets, encode_packet, PacketKind};
//!
//! let bytes = encode_packet(PacketKind::Data, b"hello").unwrap();
//! assert_eq!(&bytes[..4], &[0x04, 0x00, 0x00, 0x05]);
//!
//! let (packets, consumed) = decode_packets(&bytes).unwrap();
//! assert_eq!(consumed, bytes.len());
//! assert_eq!(packets[0].payload(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FramingError;

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Maximum packet payload size (16 MiB).
pub const MAX_PACKET_SIZE: usize = 1 << 24;

/// Largest length the 3-byte length field can carry.
const MAX_ENCODABLE_LENGTH: usize = (1 << 24) - 1;

/// Packet kind carried in header byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Handshake request (client) or response (server).
    Handshake = 0x01,
    /// Client acknowledgement of the server handshake.
    HandshakeAck = 0x02,
    /// Keep-alive.
    Heartbeat = 0x03,
    /// Carries an encoded message.
    Data = 0x04,
    /// Server-initiated disconnect.
    Kick = 0x05,
}

impl PacketKind {
    /// Wire value of this kind.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::HandshakeAck),
            0x03 => Ok(Self::Heartbeat),
            0x04 => Ok(Self::Data),
            0x05 => Ok(Self::Kick),
            other => Err(FramingError::UnknownPacketKind(other)),
        }
    }
}

/// A complete packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketKind,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(kind: PacketKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Packet with an empty payload.
    pub fn empty(kind: PacketKind) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode this packet to wire bytes.
    pub fn encode(&self) -> Result<Bytes, FramingError> {
        encode_packet(self.kind, &self.payload)
    }
}

/// Encode a packet header for a payload of `len` bytes.
///
/// Fails if `len` is above [`MAX_PACKET_SIZE`] or does not fit in 24 bits.
pub fn encode_header(kind: PacketKind, len: usize) -> Result<[u8; HEADER_SIZE], FramingError> {
    if len > MAX_PACKET_SIZE || len > MAX_ENCODABLE_LENGTH {
        return Err(FramingError::PacketTooLarge {
            size: len,
            max: MAX_ENCODABLE_LENGTH.min(MAX_PACKET_SIZE),
        });
    }
    Ok([
        kind.as_u8(),
        (len >> 16) as u8,
        (len >> 8) as u8,
        len as u8,
    ])
}

/// Parse a 4-byte header into kind and payload length.
///
/// Returns `Ok(None)` if `buf` is shorter than [`HEADER_SIZE`].
pub fn parse_header(
    buf: &[u8],
    max_payload_size: usize,
) -> Result<Option<(PacketKind, usize)>, FramingError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let kind = PacketKind::try_from(buf[0])?;
    let len = (buf[1] as usize) << 16 | (buf[2] as usize) << 8 | buf[3] as usize;
    if len > max_payload_size {
        return Err(FramingError::PacketTooLarge {
            size: len,
            max: max_payload_size,
        });
    }
    Ok(Some((kind, len)))
}

/// Encode a packet into a single contiguous buffer.
pub fn encode_packet(kind: PacketKind, payload: &[u8]) -> Result<Bytes, FramingError> {
    let header = encode_header(kind, payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode every complete packet at the start of `buf`.
///
/// Returns the packets and the number of bytes they occupied. A trailing
/// incomplete packet is left unconsumed; the caller keeps those bytes for the
/// next call. A buffer shorter than one header yields `(vec![], 0)`.
pub fn decode_packets(buf: &[u8]) -> Result<(Vec<Packet>, usize), FramingError> {
    let mut packets = Vec::new();
    let mut offset = 0;

    while let Some((kind, len)) = parse_header(&buf[offset..], MAX_PACKET_SIZE)? {
        let start = offset + HEADER_SIZE;
        let end = start + len;
        if end > buf.len() {
            break;
        }
        packets.push(Packet::new(kind, Bytes::copy_from_slice(&buf[start..end])));
        offset = end;
    }

    Ok((packets, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = encode_header(PacketKind::Data, 0x010203).unwrap();
        assert_eq!(header, [0x04, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_packet_kind_values() {
        assert_eq!(PacketKind::Handshake.as_u8(), 1);
        assert_eq!(PacketKind::HandshakeAck.as_u8(), 2);
        assert_eq!(PacketKind::Heartbeat.as_u8(), 3);
        assert_eq!(PacketKind::Data.as_u8(), 4);
        assert_eq!(PacketKind::Kick.as_u8(), 5);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            PacketKind::try_from(0),
            Err(FramingError::UnknownPacketKind(0))
        ));
        assert!(matches!(
            PacketKind::try_from(6),
            Err(FramingError::UnknownPacketKind(6))
        ));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let kinds = [
            PacketKind::Handshake,
            PacketKind::HandshakeAck,
            PacketKind::Heartbeat,
            PacketKind::Data,
            PacketKind::Kick,
        ];
        for kind in kinds {
            let original = Packet::new(kind, Bytes::from_static(b"payload"));
            let bytes = original.encode().unwrap();
            let (packets, consumed) = decode_packets(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(packets, vec![original]);
        }
    }

    #[test]
    fn test_empty_payload() {
        let bytes = encode_packet(PacketKind::HandshakeAck, b"").unwrap();
        assert_eq!(&bytes[..], &[0x02, 0, 0, 0]);

        let (packets, consumed) = decode_packets(&bytes).unwrap();
        assert_eq!(consumed, HEADER_SIZE);
        assert!(packets[0].is_empty());
    }

    #[test]
    fn test_short_buffer_consumes_nothing() {
        let (packets, consumed) = decode_packets(&[0x04, 0x00]).unwrap();
        assert!(packets.is_empty());
        assert_eq!(consumed, 0);

        let (packets, consumed) = decode_packets(&[]).unwrap();
        assert!(packets.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_trailing_partial_packet_left_unconsumed() {
        let mut bytes = encode_packet(PacketKind::Data, b"first").unwrap().to_vec();
        let first_len = bytes.len();
        let second = encode_packet(PacketKind::Data, b"second").unwrap();
        bytes.extend_from_slice(&second[..6]);

        let (packets, consumed) = decode_packets(&bytes).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_many_packets_in_one_buffer() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_packet(PacketKind::Heartbeat, b"").unwrap());
        bytes.extend_from_slice(&encode_packet(PacketKind::Data, b"abc").unwrap());
        bytes.extend_from_slice(&encode_packet(PacketKind::Kick, b"bye").unwrap());

        let (packets, consumed) = decode_packets(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        let kinds: Vec<_> = packets.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PacketKind::Heartbeat, PacketKind::Data, PacketKind::Kick]
        );
    }

    #[test]
    fn test_decode_unknown_kind_is_error() {
        let bytes = [0x09, 0, 0, 0];
        assert!(matches!(
            decode_packets(&bytes),
            Err(FramingError::UnknownPacketKind(0x09))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PACKET_SIZE + 1];
        let result = encode_packet(PacketKind::Data, &payload);
        assert!(matches!(result, Err(FramingError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_length_must_fit_24_bits() {
        // 1 << 24 would wrap to a zero length on the wire.
        assert!(encode_header(PacketKind::Data, MAX_PACKET_SIZE).is_err());
        assert!(encode_header(PacketKind::Data, MAX_PACKET_SIZE - 1).is_ok());
    }

    #[test]
    fn test_parse_header_respects_limit() {
        let header = encode_header(PacketKind::Data, 1000).unwrap();
        let result = parse_header(&header, 100);
        assert!(matches!(
            result,
            Err(FramingError::PacketTooLarge { size: 1000, max: 100 })
        ));
    }
}
