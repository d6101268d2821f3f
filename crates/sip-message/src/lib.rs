//! Lightweight SIP message model for the drachtio agent
//!
//! The drachtio server performs full SIP parsing and transaction handling; the
//! messages it hands to a control-plane client are already validated. This crate
//! therefore models a SIP message at the text level: a start line, an ordered
//! list of headers and an opaque body.
//!
//! # Key Components
//!
//! - [`SipMessage`] - A request or response with header get/set and serialization
//! - [`Method`] - SIP request methods, with an `Other` escape hatch for extensions
//! - [`CSeq`] - The parsed value of a `CSeq` header
//! - [`SipParseError`] - Errors produced while parsing message text
//!
//! # Example
//!
//! ```rust
//! use drachtio_sip_message::{Method, SipMessage};
//!
//! let msg = SipMessage::request(Method::Options, "sip:alice@example.com")
//!     .with_header("Call-ID", "abc123")
//!     .with_header("CSeq", "1 OPTIONS");
//!
//! let text = msg.to_string();
//! let parsed: SipMessage = text.parse().unwrap();
//! assert_eq!(parsed.call_id(), Some("abc123"));
//! assert_eq!(parsed.method(), Some(&Method::Options));
//! ```

pub mod error;
pub mod header;
pub mod message;
pub mod method;
mod parse;

// Re-export commonly used types
pub use error::{SipParseError, SipParseResult};
pub use header::Header;
pub use message::{CSeq, MessageType, SipMessage, StartLine};
pub use method::Method;
