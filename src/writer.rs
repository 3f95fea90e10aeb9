//! Dedicated writer task for outbound packets.
//!
//! Producers encode their packets and push them onto a bounded mpsc queue;
//! one writer task drains the queue in FIFO order and writes to the stream,
//! batching ready frames into vectored writes.
//!
//! # Architecture
//!
//! ```text
//! send_request ─┐
//! send_notify  ─┼─► mpsc::Sender<OutboundFrame> (bounded) ─► Writer Task ─► Stream
//! heartbeat    ─┘
//! ```
//!
//! The queue capacity is the backpressure limit: producers wait for a free
//! slot, but session shutdown always wins the race so nobody waits forever.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PomeloError, Result};
use crate::protocol::{encode_header, PacketKind, HEADER_SIZE};

/// Default outbound queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Default maximum frames per vectored write.
pub const DEFAULT_MAX_BATCH_FRAMES: usize = 64;

/// A packet ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded packet header (4 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Packet payload (an encoded message for `Data` packets).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds the maximum packet size.
    pub fn new(kind: PacketKind, payload: Bytes) -> Result<Self> {
        Ok(Self {
            header: encode_header(kind, payload.len())?,
            payload,
        })
    }

    /// Create a frame with an empty payload.
    pub fn empty(kind: PacketKind) -> Self {
        Self {
            header: [kind.as_u8(), 0, 0, 0],
            payload: Bytes::new(),
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Capacity of the outbound queue.
    pub channel_capacity: usize,
    /// Maximum frames collected into one vectored write.
    pub max_batch_frames: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_batch_frames: DEFAULT_MAX_BATCH_FRAMES,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across producers.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl WriterHandle {
    /// Enqueue a frame, waiting for queue capacity.
    ///
    /// Returns [`PomeloError::SessionClosed`] as soon as shutdown is signalled,
    /// even while waiting for capacity.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PomeloError::SessionClosed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(PomeloError::SessionClosed),
            sent = self.tx.send(frame) => sent.map_err(|_| PomeloError::SessionClosed),
        }
    }

    /// Enqueue a frame without waiting.
    ///
    /// Returns [`PomeloError::QueueFull`] immediately if the queue is at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PomeloError::SessionClosed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PomeloError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PomeloError::SessionClosed,
        })
    }

    /// Number of frames waiting in the queue.
    #[inline]
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Check if the queue is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

/// Create the outbound queue.
///
/// The receiver is meant for [`writer_loop`].
pub fn writer_channel(
    config: &WriterConfig,
    shutdown: CancellationToken,
) -> (WriterHandle, mpsc::Receiver<OutboundFrame>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    (WriterHandle { tx, shutdown }, rx)
}

/// Main writer loop - receives frames and writes them to the stream.
///
/// Returns `Ok(())` when shutdown is signalled or every handle is dropped,
/// shutting the stream down on the way out. A write error is returned as is.
pub async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    shutdown: CancellationToken,
    max_batch_frames: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let max_batch_frames = max_batch_frames.max(1);
    let mut batch = Vec::with_capacity(max_batch_frames);

    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        batch.push(first);
        while batch.len() < max_batch_frames {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        // A peer that stops reading must not keep the writer from shutting down.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            written = write_batch(&mut writer, &batch) => written?,
        }
        tracing::trace!(frames = batch.len(), "wrote batch");
        batch.clear();
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Writer shutdown error: {}", e);
    }
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(PomeloError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_packets, Packet};
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn data_frame(payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(PacketKind::Data, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_outbound_frame_creation() {
        let frame = data_frame(b"hello");
        assert_eq!(frame.header, [0x04, 0, 0, 5]);
        assert_eq!(frame.size(), HEADER_SIZE + 5);

        let empty = OutboundFrame::empty(PacketKind::HandshakeAck);
        assert_eq!(empty.header, [0x02, 0, 0, 0]);
        assert_eq!(empty.size(), HEADER_SIZE);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let payload = Bytes::from(vec![0u8; crate::protocol::MAX_PACKET_SIZE + 1]);
        assert!(matches!(
            OutboundFrame::new(PacketKind::Data, payload),
            Err(PomeloError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let (client, mut server) = duplex(4096);
        let token = CancellationToken::new();
        let config = WriterConfig::default();
        let (handle, rx) = writer_channel(&config, token.clone());
        let task = tokio::spawn(writer_loop(rx, client, token, config.max_batch_frames));

        let expected: [&'static [u8]; 3] = [b"one", b"two", b"three"];
        for payload in expected {
            handle.send(data_frame(payload)).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        let (packets, consumed) = decode_packets(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        let payloads: Vec<_> = packets.iter().map(Packet::payload).collect();
        assert_eq!(payloads, expected.to_vec());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let token = CancellationToken::new();
        let config = WriterConfig {
            channel_capacity: 1,
            ..WriterConfig::default()
        };
        let (handle, _rx) = writer_channel(&config, token);

        handle.try_send(data_frame(b"a")).unwrap();
        assert!(handle.is_full());
        assert_eq!(handle.queued(), 1);
        assert!(matches!(
            handle.try_send(data_frame(b"b")),
            Err(PomeloError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_waiting_sender() {
        let token = CancellationToken::new();
        let config = WriterConfig {
            channel_capacity: 1,
            ..WriterConfig::default()
        };
        let (handle, _rx) = writer_channel(&config, token.clone());
        handle.send(data_frame(b"fill")).await.unwrap();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.send(data_frame(b"blocked")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("sender stayed blocked")
            .unwrap();
        assert!(matches!(result, Err(PomeloError::SessionClosed)));
        assert!(matches!(
            handle.try_send(data_frame(b"late")),
            Err(PomeloError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_stops_on_shutdown() {
        let (client, _server) = duplex(64);
        let token = CancellationToken::new();
        let (_handle, rx) = writer_channel(&WriterConfig::default(), token.clone());
        let task = tokio::spawn(writer_loop(rx, client, token.clone(), 8));

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocked_write() {
        let (client, _server) = duplex(16);
        let token = CancellationToken::new();
        let (handle, rx) = writer_channel(&WriterConfig::default(), token.clone());
        let task = tokio::spawn(writer_loop(rx, client, token.clone(), 8));

        handle
            .send(OutboundFrame::new(PacketKind::Data, Bytes::from(vec![7u8; 1024])).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("writer stayed blocked")
            .unwrap();
        assert!(result.is_ok());
    }

    /// Sink that accepts writes but fails to shut down.
    struct BrokenShutdown(Vec<u8>);

    impl AsyncWrite for BrokenShutdown {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.0.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "already closed",
            )))
        }
    }

    #[tokio::test]
    async fn test_shutdown_error_does_not_fail_loop() {
        let token = CancellationToken::new();
        let (handle, rx) = writer_channel(&WriterConfig::default(), token.clone());
        handle.send(data_frame(b"last")).await.unwrap();
        drop(handle);

        let result = writer_loop(rx, BrokenShutdown(Vec::new()), token, 8).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![data_frame(b"hello"), OutboundFrame::empty(PacketKind::Heartbeat)];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 3);

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 2);
        assert_eq!(slices[1].len(), 5);

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), HEADER_SIZE);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| data_frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }
}
