//! Packet buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented packets:
//! - `WaitingForHeader`: Need at least 4 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use pomelo_client::protocol::{encode_packet, PacketBuffer, PacketKind};
//!
//! let bytes = encode_packet(PacketKind::Data, b"hi").unwrap();
//! let mut buffer = PacketBuffer::new();
//!
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let packets = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(packets[0].payload(), b"hi");
//! ```

use bytes::{Bytes, BytesMut};

use super::packet::{parse_header, Packet, PacketKind, HEADER_SIZE, MAX_PACKET_SIZE};
use crate::error::Result;

/// Initial accumulation capacity.
const DEFAULT_CAPACITY: usize = 4 * 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForPayload { kind: PacketKind, remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
///
/// Unconsumed bytes are retained between calls to [`push`](Self::push).
pub struct PacketBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: usize,
}

impl PacketBuffer {
    /// Create a new packet buffer with the protocol maximum payload size.
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PACKET_SIZE)
    }

    /// Create a new packet buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete packets.
    ///
    /// # Errors
    ///
    /// Returns a framing error on an unknown packet kind or a payload
    /// exceeding the configured maximum. The stream is unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn try_extract_one(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some((kind, len)) = parse_header(&self.buffer, self.max_payload_size)?
                    else {
                        return Ok(None);
                    };
                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if len == 0 {
                        return Ok(Some(Packet::new(kind, Bytes::new())));
                    }
                    self.state = State::WaitingForPayload {
                        kind,
                        remaining: len,
                    };
                }
                State::WaitingForPayload { kind, remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(Packet::new(kind, payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
