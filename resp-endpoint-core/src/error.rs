//! Error types for endpoint operations

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for endpoint operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Error type shared by the encoder, decoder, endpoints and connection layer.
///
/// The type is `Clone` so a single connection failure can be delivered to every
/// command that was in flight when it happened.
#[derive(Error, Debug, Clone)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Malformed bytes on the wire. The stream position is lost.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply for a single command
    #[error("Server error: {0}")]
    Server(String),

    /// A reply arrived while no command was pending
    #[error("Queue desynchronized: {0}")]
    Desync(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The endpoint was closed by the application
    #[error("Connection closed")]
    Closed,

    /// The request queue reached its configured depth
    #[error("Request queue full ({0} commands pending)")]
    QueueFull(usize),

    /// Caller supplied an argument the encoder cannot frame
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Reply shape does not match the command's output
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Sentinel error
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl RedisError {
    /// Check whether this error invalidates the whole connection rather than a
    /// single command.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Protocol(_) | Self::Desync(_) | Self::Connection(_) | Self::Closed
        )
    }

    /// Check if this error was reported by the server for one command
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    /// Error code prefix of a server error (`ERR`, `WRONGTYPE`, ...)
    #[must_use]
    pub fn server_error_code(&self) -> Option<&str> {
        match self {
            Self::Server(msg) => msg.split_whitespace().next(),
            _ => None,
        }
    }
}
