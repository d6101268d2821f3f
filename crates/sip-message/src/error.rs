//! Error types for SIP message parsing

use thiserror::Error;

/// Result type for SIP message parsing
pub type SipParseResult<T> = Result<T, SipParseError>;

/// Errors that can occur while parsing SIP message text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SipParseError {
    /// The input contained no start line
    #[error("empty SIP message")]
    Empty,

    /// The start line could not be interpreted as a request or status line
    #[error("invalid start line: {line}")]
    InvalidStartLine { line: String },

    /// A status line carried a non-numeric or out of range status code
    #[error("invalid status code: {value}")]
    InvalidStatusCode { value: String },

    /// A header line had no `:` separator
    #[error("invalid header line: {line}")]
    InvalidHeader { line: String },
}

impl SipParseError {
    /// Create an invalid start line error
    pub fn start_line(line: impl Into<String>) -> Self {
        Self::InvalidStartLine { line: line.into() }
    }

    /// Create an invalid header error
    pub fn header(line: impl Into<String>) -> Self {
        Self::InvalidHeader { line: line.into() }
    }
}
