//! Error types for the agent

use drachtio_sip_message::SipParseError;
use drachtio_wire::{FramingError, WireError};
use thiserror::Error;

use crate::events::ConnectionId;

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while driving a drachtio server
#[derive(Debug, Error)]
pub enum AgentError {
    /// The byte stream broke the framing contract
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Socket level failure
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server rejected our shared secret
    #[error("failed to authenticate to server: {reason}")]
    AuthenticationFailed { reason: String },

    /// A verb may only be routed once per agent
    #[error("duplicate route request for {verb}")]
    DuplicateVerb { verb: String },

    /// The server refused a command
    #[error("request failed: {reason}")]
    RequestFailed { reason: String },

    /// No connection could carry the request
    #[error("no connection available: {message}")]
    NoConnection { message: String },

    /// Several connections are ready and none was chosen explicitly
    #[error("{count} connections are ready, a target connection must be given")]
    AmbiguousConnection { count: usize },

    /// The connection went away before the server answered
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection exists but has not authenticated
    #[error("connection {connection} is not ready")]
    NotReady { connection: ConnectionId },

    /// The caller supplied an unusable request
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// SIP payload could not be parsed
    #[error("SIP error: {0}")]
    Sip(#[from] SipParseError),

    /// A frame could not be interpreted
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Digest credentials could not be computed
    #[error("digest authentication error: {message}")]
    Digest { message: String },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a request failed error
    pub fn request_failed(reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            reason: reason.into(),
        }
    }

    /// Create a no connection error
    pub fn no_connection(message: impl Into<String>) -> Self {
        Self::NoConnection {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a digest error
    pub fn digest(message: impl Into<String>) -> Self {
        Self::Digest {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error means the connection is gone rather than the request being bad
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AgentError::ConnectionClosed
                | AgentError::Transport { .. }
                | AgentError::Framing(_)
                | AgentError::Io(_)
        )
    }
}
