//! TCP stream setup.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use pomelo_client::transport::connect_tcp;
//!
//! let stream = connect_tcp("127.0.0.1:3250", Duration::from_secs(5)).await?;
//! ```

use std::io;
use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a TCP connection with a connect timeout.
///
/// Nagle's algorithm is disabled on the returned stream.
///
/// # Errors
///
/// An I/O error of kind `TimedOut` if the connection is not established
/// within `timeout`; any other connect error as is.
pub async fn connect_tcp<A>(addr: A, timeout: Duration) -> Result<TcpStream>
where
    A: ToSocketAddrs,
{
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    if let Ok(peer) = stream.peer_addr() {
        tracing::debug!(%peer, "tcp connected");
    }
    Ok(stream)
}
