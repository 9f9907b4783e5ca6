//! Error types for mctr-link.

use thiserror::Error;

/// Main error type for all transport and connection-management operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading runtime configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field inside one frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol violation (negative frame length, wrong direction, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A control message arrived in a state that has no transition for it.
    #[error("Unexpected message {message} in state {state}")]
    UnexpectedMessage {
        /// Message name.
        message: &'static str,
        /// Executor state at arrival.
        state: &'static str,
    },

    /// Conflicting port configuration (connection and mapping on one port).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Recoverable port-level failure.
    #[error("Port error: {0}")]
    Port(String),

    /// Bounds-checked access failed.
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Fixed length of the sequence.
        len: usize,
    },

    /// Control channel used before `connect()` or without an address.
    #[error("Control channel is not connected")]
    NotConnected,

    /// Control channel closed, locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// ERROR message received from the main controller.
    #[error("Error message was received from MC: {0}")]
    Coordinator(String),
}

impl LinkError {
    /// Whether the error must terminate the current test case or process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Io(_)
                | LinkError::Protocol(_)
                | LinkError::UnexpectedMessage { .. }
                | LinkError::Configuration(_)
                | LinkError::NotConnected
                | LinkError::ConnectionClosed
                | LinkError::Coordinator(_)
        )
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        LinkError::Decode(msg.into())
    }

    pub(crate) fn port(msg: impl Into<String>) -> Self {
        LinkError::Port(msg.into())
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
