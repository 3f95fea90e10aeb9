//! Session runtime.
//!
//! A [`Session`] owns one connection after a successful handshake:
//! 1. Handshake over the whole stream (bounded by a timeout)
//! 2. Split the stream into read and write halves
//! 3. Spawn the writer task (drains the outbound queue)
//! 4. Spawn the inbound task (reassembles packets and dispatches them)
//!
//! Either task failing, a `Kick`, EOF or [`Session::close`] terminates the
//! session. Termination runs once: it records the reason, signals shutdown,
//! fails every pending request and emits [`SessionEvent::Disconnected`].
//!
//! # Example
//!
//! ```ignore
//! use pomelo_client::{connect, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = connect("127.0.0.1:3250").await?;
//!     let mut events = session.events().expect("first call");
//!
//!     let reply = session.request("connector.entry", &b"{}"[..]).await?;
//!     println!("{}", String::from_utf8_lossy(reply.payload()));
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::Push(msg) = event {
//!             println!("push on {}", msg.route);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod builder;
mod event;
mod pending;

pub use builder::{SessionBuilder, DEFAULT_EVENT_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT};
pub use event::{CloseReason, SessionEvent, SessionState};
pub use pending::{PendingTable, ResponseFuture};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{JsonCodec, JSON_SERIALIZER};
use crate::error::{PomeloError, Result};
use crate::handshake::{exchange, send_ack, HandshakeResponse};
use crate::protocol::{Message, MessageKind, Packet, PacketBuffer, PacketKind, RouteDictionary};
use crate::writer::{writer_channel, writer_loop, OutboundFrame, WriterHandle};

use builder::SessionConfig;

/// Route of the notify sent in answer to a server heartbeat.
pub const HEARTBEAT_ROUTE: &str = "sys.heartbeat";

/// Payload of the heartbeat notify.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"{}";

/// Read chunk size of the inbound task.
const READ_CHUNK: usize = 64 * 1024;

/// State shared by the session handle and its two tasks.
struct Shared {
    pending: Arc<PendingTable>,
    dict: Arc<RouteDictionary>,
    writer: WriterHandle,
    shutdown: CancellationToken,
    state: watch::Sender<SessionState>,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Shared {
    fn reason_slot(&self) -> MutexGuard<'_, Option<CloseReason>> {
        self.close_reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Terminate the session. Only the first call has any effect.
    ///
    /// Returns the reason the session actually closed with.
    fn terminate(&self, reason: CloseReason) -> CloseReason {
        {
            let mut slot = self.reason_slot();
            if let Some(first) = slot.as_ref() {
                return first.clone();
            }
            *slot = Some(reason.clone());
        }

        self.shutdown.cancel();
        let failed = self.pending.close();
        self.state.send_replace(SessionState::Closed);

        match &reason {
            CloseReason::Error(e) => tracing::error!(error = %e, failed, "session closed"),
            other => tracing::info!(reason = ?other, failed, "session closed"),
        }
        reason
    }

    fn encode(&self, message: &Message) -> Result<OutboundFrame> {
        OutboundFrame::new(PacketKind::Data, message.encode(&self.dict)?)
    }
}

/// A connected client session.
///
/// All methods take `&self`; share a session between tasks with `Arc`.
/// Dropping the session closes it.
pub struct Session {
    shared: Arc<Shared>,
    handshake: HandshakeResponse,
    events: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Connect over TCP with default settings.
    pub async fn connect<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        SessionBuilder::new().connect(addr).await
    }

    /// Run the handshake on `stream` and start the session tasks.
    pub(crate) async fn establish<S>(mut stream: S, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let state = config.state;
        let mut buffer = PacketBuffer::with_max_payload(config.max_packet_size);

        state.send_replace(SessionState::HandshakeSent);
        let request = &config.handshake;
        let handshake = async {
            let outcome = exchange(&mut stream, request, &mut buffer).await?;
            send_ack(&mut stream).await?;
            Ok::<_, PomeloError>(outcome)
        };
        let outcome = match tokio::time::timeout(config.handshake_timeout, handshake).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                state.send_replace(SessionState::Closed);
                return Err(e);
            }
            Err(_) => {
                state.send_replace(SessionState::Closed);
                return Err(PomeloError::Handshake(format!(
                    "no answer within {:?}",
                    config.handshake_timeout
                )));
            }
        };

        let response = outcome.response;
        config.dictionary.extend(
            response
                .sys
                .dict
                .iter()
                .map(|(route, code)| (route.as_str(), *code)),
        );
        if !response.sys.serializer.is_empty() && response.sys.serializer != JSON_SERIALIZER {
            tracing::warn!(
                serializer = %response.sys.serializer,
                "server serializer is not json; JSON helpers will not match"
            );
        }

        let shutdown = CancellationToken::new();
        let (writer, rx) = writer_channel(&config.writer, shutdown.clone());
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

        state.send_replace(SessionState::Connected);
        let shared = Arc::new(Shared {
            pending: Arc::new(PendingTable::new()),
            dict: config.dictionary,
            writer,
            shutdown,
            state,
            close_reason: Mutex::new(None),
        });

        let (read_half, write_half) = tokio::io::split(stream);

        let writer_shared = shared.clone();
        let max_batch_frames = config.writer.max_batch_frames;
        let writer_task = tokio::spawn(async move {
            let shutdown = writer_shared.shutdown.clone();
            if let Err(e) = writer_loop(rx, write_half, shutdown, max_batch_frames).await {
                tracing::error!("Write loop error: {}", e);
                writer_shared.terminate(CloseReason::Error(e.to_string()));
            }
        });

        let inbound = Inbound {
            shared: shared.clone(),
            events: event_tx,
            overflowing: AtomicBool::new(false),
        };
        let reader_task = tokio::spawn(inbound.run(read_half, buffer, outcome.trailing));

        tracing::debug!(
            heartbeat = response.sys.heartbeat,
            routes = shared.dict.len(),
            "session connected"
        );

        Ok(Session {
            shared,
            handshake: response,
            events: Mutex::new(Some(event_rx)),
            tasks: AsyncMutex::new(vec![writer_task, reader_task]),
        })
    }

    /// Send a request and return a future for its response.
    ///
    /// Returns once the request is queued for writing. Waits for queue
    /// capacity, unless the session closes first.
    pub async fn send_request(
        &self,
        route: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<ResponseFuture> {
        let (id, rx) = self.shared.pending.register()?;
        // Any failure below drops `response`, which removes the entry.
        let response = ResponseFuture::new(id, rx, self.shared.pending.clone());
        let frame = self.shared.encode(&Message::request(id, route, payload))?;
        self.shared.writer.send(frame).await?;
        Ok(response)
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        route: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Message> {
        self.send_request(route, payload).await?.await
    }

    /// Send a request and wait at most `timeout` for its response.
    ///
    /// On timeout the request is removed from the pending table and
    /// [`PomeloError::RequestTimeout`] is returned.
    pub async fn request_timeout(
        &self,
        route: impl Into<String>,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Message> {
        let response = self.send_request(route, payload).await?;
        let id = response.id();
        tokio::time::timeout(timeout, response)
            .await
            .map_err(|_| PomeloError::RequestTimeout(id))?
    }

    /// Send a JSON-encoded request and wait for its response.
    pub async fn request_json<T: Serialize>(
        &self,
        route: impl Into<String>,
        value: &T,
    ) -> Result<Message> {
        self.request(route, JsonCodec::encode(value)?).await
    }

    /// Send a notify. No response is expected.
    pub async fn send_notify(
        &self,
        route: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = self.shared.encode(&Message::notify(route, payload))?;
        self.shared.writer.send(frame).await
    }

    /// Send a notify without waiting for queue capacity.
    ///
    /// Returns [`PomeloError::QueueFull`] if the outbound queue is full.
    pub fn try_send_notify(
        &self,
        route: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = self.shared.encode(&Message::notify(route, payload))?;
        self.shared.writer.try_send(frame)
    }

    /// Send a JSON-encoded notify.
    pub async fn send_notify_json<T: Serialize>(
        &self,
        route: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.send_notify(route, JsonCodec::encode(value)?).await
    }

    /// Take the inbound event receiver.
    ///
    /// Returns `None` after the first call (or after [`on_push`](Self::on_push)).
    /// The last event is always [`SessionEvent::Disconnected`] unless the
    /// queue was full at that moment; the channel closes after it either way.
    pub fn events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Deliver every push to `callback` on a spawned task.
    ///
    /// Returns `false` if the event receiver was already taken.
    pub fn on_push<F>(&self, callback: F) -> bool
    where
        F: Fn(Message) + Send + 'static,
    {
        let Some(mut events) = self.events() else {
            return false;
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Push(message) => callback(message),
                    SessionEvent::Disconnected(_) => break,
                }
            }
        });
        true
    }

    /// Close the session and wait for both tasks to stop.
    ///
    /// Pending requests fail with [`PomeloError::SessionClosed`]. Concurrent
    /// callers all return only once both tasks have stopped.
    pub async fn close(&self) {
        self.shared.terminate(CloseReason::Local);
        // Held while joining, so later callers wait for the first one.
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("session task failed: {}", e);
            }
        }
    }

    /// Wait until the session is closed, for any reason.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Check if the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.reason_slot().clone()
    }

    /// The server's handshake answer.
    pub fn handshake_info(&self) -> &HandshakeResponse {
        &self.handshake
    }

    /// The session's route dictionary.
    pub fn route_dictionary(&self) -> &Arc<RouteDictionary> {
        &self.shared.dict
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.terminate(CloseReason::Local);
    }
}

/// Inbound half of a session.
struct Inbound {
    shared: Arc<Shared>,
    events: mpsc::Sender<SessionEvent>,
    /// Set while pushes are being dropped on a full event queue.
    overflowing: AtomicBool,
}

impl Inbound {
    async fn run<R>(self, reader: R, buffer: PacketBuffer, trailing: Vec<Packet>)
    where
        R: AsyncRead + Unpin,
    {
        let reason = match self.read_loop(reader, buffer, trailing).await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!("Read loop error: {}", e);
                CloseReason::Error(e.to_string())
            }
        };

        let reason = self.shared.terminate(reason);
        if self
            .events
            .try_send(SessionEvent::Disconnected(reason))
            .is_err()
        {
            tracing::debug!("event queue unavailable, disconnect event dropped");
        }
    }

    /// Read and dispatch packets until the session ends.
    async fn read_loop<R>(
        &self,
        mut reader: R,
        mut buffer: PacketBuffer,
        trailing: Vec<Packet>,
    ) -> Result<CloseReason>
    where
        R: AsyncRead + Unpin,
    {
        for packet in trailing {
            if let Some(reason) = self.dispatch(packet).await? {
                return Ok(reason);
            }
        }

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => return Ok(CloseReason::Local),
                read = reader.read(&mut chunk) => read?,
            };
            if n == 0 {
                return Ok(CloseReason::PeerClosed);
            }

            for packet in buffer.push(&chunk[..n])? {
                if let Some(reason) = self.dispatch(packet).await? {
                    return Ok(reason);
                }
            }
        }
    }

    /// Handle one packet. Returns a close reason if the session must end.
    async fn dispatch(&self, packet: Packet) -> Result<Option<CloseReason>> {
        match packet.kind {
            PacketKind::Heartbeat => self.answer_heartbeat()?,
            PacketKind::Data => {
                let message = Message::decode(packet.payload(), &self.shared.dict)?;
                self.deliver(message);
            }
            PacketKind::Kick => {
                tracing::warn!(
                    reason = %String::from_utf8_lossy(packet.payload()),
                    "kicked by server"
                );
                return Ok(Some(CloseReason::Kicked));
            }
            PacketKind::Handshake | PacketKind::HandshakeAck => {
                tracing::warn!(kind = ?packet.kind, "ignoring handshake packet on an open session");
            }
        }
        Ok(None)
    }

    fn answer_heartbeat(&self) -> Result<()> {
        let frame = self
            .shared
            .encode(&Message::notify(HEARTBEAT_ROUTE, HEARTBEAT_PAYLOAD))?;
        // Never wait on the outbound queue from the read loop.
        match self.shared.writer.try_send(frame) {
            Ok(()) => {
                tracing::trace!("answered heartbeat");
                Ok(())
            }
            Err(PomeloError::QueueFull) => {
                tracing::debug!("outbound queue full, heartbeat reply skipped");
                Ok(())
            }
            // Shutdown is already under way; the read loop sees it next.
            Err(PomeloError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn deliver(&self, message: Message) {
        if message.kind == MessageKind::Response {
            let id = message.id;
            if !self.shared.pending.resolve(message) {
                tracing::debug!(id, "response for unknown request id ignored");
            }
            return;
        }

        match self.events.try_send(SessionEvent::Push(message)) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    tracing::debug!("event queue drained, delivering pushes again");
                }
            }
            Err(mpsc::error::TrySendError::Full(SessionEvent::Push(message))) => {
                if self.overflowing.swap(true, Ordering::Relaxed) {
                    tracing::debug!(route = %message.route, "event queue full, push dropped");
                } else {
                    tracing::warn!(route = %message.route, "event queue full, dropping pushes");
                }
            }
            Err(_) => {}
        }
    }
}
