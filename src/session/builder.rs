//! Session builder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::watch;

use super::{Session, SessionState};
use crate::error::Result;
use crate::handshake::{ClientInfo, HandshakeRequest};
use crate::protocol::{RouteDictionary, MAX_PACKET_SIZE};
use crate::transport::{connect_tcp, DEFAULT_CONNECT_TIMEOUT};
use crate::writer::WriterConfig;

/// Default push event queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default bound on the whole handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved session settings.
#[derive(Debug)]
pub(crate) struct SessionConfig {
    pub handshake: HandshakeRequest,
    pub writer: WriterConfig,
    pub event_capacity: usize,
    pub max_packet_size: usize,
    pub handshake_timeout: Duration,
    pub dictionary: Arc<RouteDictionary>,
    pub state: watch::Sender<SessionState>,
}

/// Builder for configuring and opening a [`Session`].
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use pomelo_client::{ClientInfo, Session};
///
/// let session = Session::builder()
///     .client_info(ClientInfo { version: "2.1.0".into(), ..Default::default() })
///     .user_data("token", "abc")
///     .handshake_timeout(Duration::from_secs(3))
///     .connect("127.0.0.1:3250")
///     .await?;
/// ```
pub struct SessionBuilder {
    client_info: ClientInfo,
    user: HashMap<String, serde_json::Value>,
    writer_config: WriterConfig,
    event_capacity: usize,
    max_packet_size: usize,
    handshake_timeout: Duration,
    connect_timeout: Duration,
    dictionary: Option<Arc<RouteDictionary>>,
    state: watch::Sender<SessionState>,
}

impl SessionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            client_info: ClientInfo::default(),
            user: HashMap::new(),
            writer_config: WriterConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_packet_size: MAX_PACKET_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dictionary: None,
            state: watch::channel(SessionState::Disconnected).0,
        }
    }

    /// Set the client identification sent in the handshake.
    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// Add an entry to the handshake `user` object.
    pub fn user_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.user.insert(key.into(), value.into());
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Default: 128
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the maximum frames per vectored write.
    ///
    /// Default: 64
    pub fn max_batch_frames(mut self, frames: usize) -> Self {
        self.writer_config.max_batch_frames = frames;
        self
    }

    /// Set the push event queue capacity.
    ///
    /// Pushes arriving while the queue is full are dropped with a warning.
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the largest inbound packet payload accepted.
    ///
    /// Default: 16 MiB
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Bound the handshake exchange.
    ///
    /// Default: 10 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bound the TCP connect in [`connect`](Self::connect).
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a pre-populated route dictionary.
    ///
    /// Routes advertised by the server during the handshake are added to it.
    pub fn route_dictionary(mut self, dictionary: Arc<RouteDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Watch the lifecycle state from before the handshake starts.
    ///
    /// The receiver sees `HandshakeSent` while the handshake is in flight,
    /// then `Connected`, or `Closed` if the handshake fails. It keeps
    /// following the session once it is established.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn into_config(self) -> (SessionConfig, Duration) {
        let mut handshake = HandshakeRequest::new(self.client_info);
        handshake.user = self.user;
        let config = SessionConfig {
            handshake,
            writer: self.writer_config,
            event_capacity: self.event_capacity,
            max_packet_size: self.max_packet_size,
            handshake_timeout: self.handshake_timeout,
            dictionary: self
                .dictionary
                .unwrap_or_else(|| Arc::new(RouteDictionary::new())),
            state: self.state,
        };
        (config, self.connect_timeout)
    }

    /// Connect over TCP and perform the handshake.
    pub async fn connect<A>(self, addr: A) -> Result<Session>
    where
        A: ToSocketAddrs,
    {
        let (config, connect_timeout) = self.into_config();
        let stream = connect_tcp(addr, connect_timeout).await?;
        Session::establish(stream, config).await
    }

    /// Perform the handshake over an already-open stream.
    pub async fn handshake<S>(self, stream: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (config, _) = self.into_config();
        Session::establish(stream, config).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let (config, connect_timeout) = SessionBuilder::new().into_config();
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.max_packet_size, MAX_PACKET_SIZE);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(config.handshake.user.is_empty());
        assert!(config.dictionary.is_empty());
        assert_eq!(*config.state.borrow(), SessionState::Disconnected);
    }

    #[test]
    fn test_state_receiver_follows_config_sender() {
        let builder = SessionBuilder::new();
        let states = builder.subscribe_state();
        let (config, _) = builder.into_config();

        config.state.send_replace(SessionState::HandshakeSent);
        assert_eq!(*states.borrow(), SessionState::HandshakeSent);
    }

    #[test]
    fn test_overrides() {
        let dict = Arc::new(RouteDictionary::new());
        dict.register("room.join", 3);

        let (config, _) = SessionBuilder::new()
            .user_data("token", "abc")
            .queue_capacity(4)
            .max_batch_frames(2)
            .event_capacity(8)
            .route_dictionary(dict.clone())
            .into_config();

        assert_eq!(config.handshake.user["token"], "abc");
        assert_eq!(config.writer.channel_capacity, 4);
        assert_eq!(config.writer.max_batch_frames, 2);
        assert_eq!(config.event_capacity, 8);
        assert!(Arc::ptr_eq(&config.dictionary, &dict));
    }
}
