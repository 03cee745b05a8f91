//! Error types for the WebSocket engine.
//!
//! The variants fall into four classes: transient results the caller retries
//! (`WouldBlock`, `TimedOut`, `SendInProgress`), protocol violations that set
//! a pending close status and tear the connection down, handshake failures
//! that abort the connection immediately, and resource/lifecycle errors.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The transport cannot make progress right now. Retry the same call.
    #[error("Operation would block")]
    WouldBlock,

    /// The per-operation timeout expired. Retry the same call.
    #[error("Operation timed out")]
    TimedOut,

    /// A frame transmission is still in flight; the closing handshake cannot
    /// start until it completes. Retry after finishing the send.
    #[error("A frame transmission is still in progress")]
    SendInProgress,

    /// The peer ended the byte stream.
    #[error("End of stream")]
    EndOfStream,

    /// Malformed frame or framing-level protocol violation.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Invalid opcode value in a frame header.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Malformed upgrade request received from a client.
    #[error("Invalid handshake request: {0}")]
    InvalidRequest(String),

    /// The server answered the upgrade request with an unexpected status.
    #[error("Unexpected handshake status: {0}")]
    InvalidStatus(u16),

    /// Malformed or incomplete handshake response received from a server.
    #[error("Invalid handshake response: {0}")]
    InvalidSyntax(String),

    /// The Sec-WebSocket-Key or Sec-WebSocket-Accept value failed validation.
    #[error("Invalid handshake key")]
    InvalidKey,

    /// The server requires HTTP authentication the client cannot satisfy.
    #[error("Authentication required")]
    AuthRequired,

    /// The operation is not legal in the current connection state.
    #[error("Operation not permitted in the current state")]
    WrongState,

    /// The connection is not open for data transfer.
    #[error("Connection is not open")]
    NotConnected,

    /// All connection slots are in use.
    #[error("Connection pool exhausted")]
    OutOfResources,

    /// The bounded number of connection attempts was exhausted.
    #[error("Connection attempts exhausted")]
    OpenFailed,

    /// The injected randomness source failed. Masking keys and nonces
    /// require cryptographically strong randomness, so this is fatal.
    #[error("Random source failure: {0}")]
    RandomSource(String),

    /// Transport-level I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the caller may retry the identical operation.
    ///
    /// Everything else is fatal for the connection.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::WouldBlock | Error::TimedOut | Error::SendInProgress
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock => Error::WouldBlock,
            ErrorKind::TimedOut => Error::TimedOut,
            ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
