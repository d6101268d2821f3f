//! Error types for the wire protocol

use drachtio_sip_message::SipParseError;
use thiserror::Error;

/// Errors raised while splitting a byte stream into frames
///
/// Every variant except `Io` means the peer broke the framing contract; the
/// connection cannot be resynchronised and must be dropped.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The bytes before `#` were not a decimal length
    #[error("invalid message from server, did not start with length#: {prefix}")]
    InvalidLengthPrefix { prefix: String },

    /// The declared length exceeds the configured maximum
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// The frame body was not valid UTF-8
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while interpreting a complete frame body
///
/// These are scoped to a single frame; the connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The frame did not contain a message id and type tag
    #[error("malformed frame: {body}")]
    Malformed { body: String },

    /// The type tag is not part of the protocol
    #[error("unexpected message with type: {tag}")]
    UnknownTag { tag: String },

    /// A frame of a known type had too few `|`-delimited fields
    #[error("{tag} frame has {found} fields, expected at least {expected}")]
    MissingFields {
        tag: String,
        expected: usize,
        found: usize,
    },

    /// A frame that must carry a SIP payload had none
    #[error("{tag} frame is missing its SIP payload")]
    MissingPayload { tag: String },

    /// The SIP payload could not be parsed
    #[error("invalid SIP payload: {0}")]
    Sip(#[from] SipParseError),
}

impl WireError {
    /// Create a missing fields error
    pub fn missing_fields(tag: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::MissingFields {
            tag: tag.into(),
            expected,
            found,
        }
    }
}
