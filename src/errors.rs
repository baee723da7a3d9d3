//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the manager client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing, validation, or credential lookup failure.
    Config(String),
    /// Initial dial to the manager endpoint failed.
    Connection(String),
    /// Mid-session read, write, or framing failure on the live link.
    ///
    /// Absorbed by the reconnect supervisor; only visible in logs.
    Link(String),
    /// Inbound frame exceeded the parser's size limits.
    Protocol(String),
    /// Login rejected by the server; carries the server `Message` field.
    Auth(String),
    /// Reconnect retry budget exhausted.
    ReconnectExhausted(String),
    /// No response arrived within the configured exec timeout.
    Timeout(String),
    /// The link dropped while a request was in flight, or the adapter was not
    /// connected when the request was issued.
    ConnectionLost(String),
    /// The event stream has already been handed out.
    AlreadyConsumed(String),
    /// The adapter has been shut down.
    Closed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Link(msg) => write!(f, "link: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::ReconnectExhausted(msg) => write!(f, "reconnect exhausted: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::AlreadyConsumed(msg) => write!(f, "already consumed: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
