//! Transport capability: a fresh byte-stream pair per connection generation.
//!
//! The adapter never touches sockets directly. It asks a [`Connector`] for a
//! [`Transport`] at construction and again on every reconnect, and hands the
//! two halves to that generation's reader and writer tasks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::AdapterConfig;
use crate::{AppError, Result};

/// Read half of a live link.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a live link.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live connection, split for the reader and writer tasks.
pub struct Transport {
    /// Bytes from the server.
    pub reader: BoxedReader,
    /// Bytes to the server.
    pub writer: BoxedWriter,
    /// Printable peer identity for logs.
    pub peer: String,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Source of transports for the adapter.
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] when the endpoint cannot be reached.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Transport>> + Send + '_>>;

    /// Printable endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// TCP connector for a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    /// Connector for `host:port` with a dial timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Connector for the endpoint named in `config`.
    #[must_use]
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.connect_timeout())
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Transport>> + Send + '_>> {
        Box::pin(async move {
            let endpoint = self.endpoint();
            let stream = tokio::time::timeout(
                self.timeout,
                TcpStream::connect((self.host.as_str(), self.port)),
            )
            .await
            .map_err(|_| {
                AppError::Connection(format!(
                    "dial {endpoint} timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|err| AppError::Connection(format!("dial {endpoint} failed: {err}")))?;

            stream
                .set_nodelay(true)
                .map_err(|err| AppError::Connection(format!("set_nodelay failed: {err}")))?;

            let peer = stream
                .peer_addr()
                .map_or_else(|_| endpoint.clone(), |addr| addr.to_string());
            debug!(%peer, "transport: tcp connection established");

            let (reader, writer) = stream.into_split();
            Ok(Transport {
                reader: Box::new(reader),
                writer: Box::new(writer),
                peer,
            })
        })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
