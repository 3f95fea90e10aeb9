//! Protocol module - packet framing, message codec and route dictionary.
//!
//! Two layers share the wire:
//! - Packets: 4-byte header (kind + 24-bit length) and payload
//! - Messages: the payload of `Data` packets (flags, varint id, route, body)

mod message;
mod packet;
mod packet_buffer;
mod route_dict;
mod varint;

pub use message::{decode_message, encode_message, flags, Message, MessageKind, MAX_ROUTE_LEN};
pub use packet::{
    decode_packets, encode_header, encode_packet, parse_header, Packet, PacketKind, HEADER_SIZE,
    MAX_PACKET_SIZE,
};
pub use packet_buffer::PacketBuffer;
pub use route_dict::RouteDictionary;
pub use varint::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};
