//! Client side of the handshake exchange.
//!
//! 1. Send a `Handshake` packet carrying the client descriptor
//! 2. Read until the server's first packet is complete
//! 3. Require that packet to be a `Handshake` and parse it
//! 4. Answer with an empty `HandshakeAck`

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::payload::{HandshakeRequest, HandshakeResponse};
use crate::error::{PomeloError, Result};
use crate::protocol::{encode_packet, Packet, PacketBuffer, PacketKind};

/// Read chunk size while waiting for the server handshake.
const READ_CHUNK: usize = 4 * 1024;

/// Outcome of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Parsed server answer.
    pub response: HandshakeResponse,
    /// Packets that arrived in the same reads as the handshake, in order.
    pub trailing: Vec<Packet>,
}

/// Send the handshake request and wait for the server's answer.
///
/// Does not send the acknowledgement; see [`send_ack`].
pub async fn exchange<S>(
    stream: &mut S,
    request: &HandshakeRequest,
    buffer: &mut PacketBuffer,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let packet = encode_packet(PacketKind::Handshake, &request.to_bytes()?)?;
    stream.write_all(&packet).await?;
    stream.flush().await?;
    tracing::debug!(bytes = packet.len(), "sent handshake");

    let mut chunk = vec![0u8; READ_CHUNK];
    let mut packets = Vec::new();
    while packets.is_empty() {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(PomeloError::Handshake(
                "connection closed during handshake".to_string(),
            ));
        }
        packets = buffer.push(&chunk[..n])?;
    }

    let mut packets = packets.into_iter();
    let first = packets.next().ok_or_else(|| {
        PomeloError::Handshake("no packet received".to_string())
    })?;
    if first.kind != PacketKind::Handshake {
        return Err(PomeloError::Handshake(format!(
            "first packet from server is {:?}, not a handshake",
            first.kind
        )));
    }

    let response = HandshakeResponse::parse(first.payload())?;
    tracing::debug!(
        heartbeat = response.sys.heartbeat,
        serializer = %response.sys.serializer,
        routes = response.sys.dict.len(),
        "received handshake"
    );

    Ok(HandshakeOutcome {
        response,
        trailing: packets.collect(),
    })
}

/// Send the empty `HandshakeAck` packet.
pub async fn send_ack<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let ack = encode_packet(PacketKind::HandshakeAck, &[])?;
    stream.write_all(&ack).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression;
    use crate::protocol::decode_packets;
    use tokio::io::duplex;

    async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Packet {
        let mut buffer = PacketBuffer::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed");
            if let Some(p) = buffer.push(&chunk[..n]).unwrap().into_iter().next() {
                return p;
            }
        }
    }

    #[tokio::test]
    async fn test_exchange_and_ack() {
        let (mut client, mut server) = duplex(4096);

        let server_task = tokio::spawn(async move {
            let hello = read_packet(&mut server).await;
            assert_eq!(hello.kind, PacketKind::Handshake);
            let json: serde_json::Value = serde_json::from_slice(hello.payload()).unwrap();
            assert_eq!(json["sys"]["platform"], "rust");

            let reply = encode_packet(
                PacketKind::Handshake,
                br#"{"code":200,"sys":{"heartbeat":30}}"#,
            )
            .unwrap();
            server.write_all(&reply).await.unwrap();

            let ack = read_packet(&mut server).await;
            assert_eq!(ack.kind, PacketKind::HandshakeAck);
            assert!(ack.is_empty());
        });

        let mut buffer = PacketBuffer::new();
        let outcome = exchange(&mut client, &HandshakeRequest::default(), &mut buffer)
            .await
            .unwrap();
        assert_eq!(outcome.response.sys.heartbeat, 30);
        assert!(outcome.trailing.is_empty());

        send_ack(&mut client).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_compressed_handshake_with_trailing_packet() {
        let (mut client, mut server) = duplex(4096);

        tokio::spawn(async move {
            let _ = read_packet(&mut server).await;
            let body = compression::deflate(br#"{"code":200,"sys":{"heartbeat":5}}"#).unwrap();
            let mut bytes = encode_packet(PacketKind::Handshake, &body).unwrap().to_vec();
            bytes.extend_from_slice(&encode_packet(PacketKind::Heartbeat, &[]).unwrap());
            for chunk in bytes.chunks(3) {
                server.write_all(chunk).await.unwrap();
                server.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            // Keep the stream open until the client is done.
            let mut sink = [0u8; 16];
            let _ = server.read(&mut sink).await;
        });

        let mut buffer = PacketBuffer::new();
        let outcome = exchange(&mut client, &HandshakeRequest::default(), &mut buffer)
            .await
            .unwrap();
        assert_eq!(outcome.response.sys.heartbeat, 5);

        // The heartbeat may arrive with the handshake or stay buffered.
        let mut rest = outcome.trailing;
        if rest.is_empty() {
            let mut chunk = [0u8; 16];
            while rest.is_empty() {
                let n = client.read(&mut chunk).await.unwrap();
                rest = buffer.push(&chunk[..n]).unwrap();
            }
        }
        assert_eq!(rest[0].kind, PacketKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_wrong_first_packet_kind() {
        let (mut client, mut server) = duplex(4096);

        tokio::spawn(async move {
            let _ = read_packet(&mut server).await;
            let data = encode_packet(PacketKind::Data, b"\x02\x00").unwrap();
            server.write_all(&data).await.unwrap();
        });

        let mut buffer = PacketBuffer::new();
        let result = exchange(&mut client, &HandshakeRequest::default(), &mut buffer).await;
        assert!(
            matches!(result, Err(PomeloError::Handshake(msg)) if msg.contains("not a handshake"))
        );
    }

    #[tokio::test]
    async fn test_peer_closes_during_handshake() {
        let (mut client, server) = duplex(4096);
        drop(server);

        let mut buffer = PacketBuffer::new();
        let result = exchange(&mut client, &HandshakeRequest::default(), &mut buffer).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ack_bytes() {
        let mut out = Vec::new();
        send_ack(&mut out).await.unwrap();
        let (packets, _) = decode_packets(&out).unwrap();
        assert_eq!(packets, vec![Packet::empty(PacketKind::HandshakeAck)]);
    }
}
