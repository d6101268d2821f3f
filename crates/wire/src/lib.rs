//! drachtio wire protocol
//!
//! A drachtio server and its control-plane clients exchange UTF-8 text frames
//! over TCP. Every frame is prefixed with the decimal byte length of its body:
//!
//! ```text
//! <byteLength>#<messageId>|<typeTag>|<field>|<field>...[\r\n<payload>]
//! ```
//!
//! This crate owns both halves of that contract:
//!
//! - [`codec::FrameCodec`] - a `tokio_util` codec that splits a byte stream into
//!   frame bodies and writes length-prefixed frames, tolerating arbitrary chunking
//! - [`message::WireMessage`] - the closed set of inbound frame types, decoded once
//! - [`command::Command`] - the outbound commands a client issues
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tokio_util::codec::Decoder;
//! use drachtio_wire::{FrameCodec, WireMessage};
//!
//! let mut codec = FrameCodec::new();
//! let mut buf = BytesMut::from("29#abc|response|xyz|OK|host:5");
//! assert!(codec.decode(&mut buf).unwrap().is_none());
//!
//! buf.extend_from_slice(b"060");
//! let body = codec.decode(&mut buf).unwrap().unwrap();
//! match WireMessage::decode(&body).unwrap() {
//!     WireMessage::Response(reply) => assert_eq!(reply.hostport(), Some("host:5060")),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod message;

// Re-export commonly used types
pub use codec::FrameCodec;
pub use command::{new_message_id, Command, Forking, ProxyCommand};
pub use error::{FramingError, WireError};
pub use message::{CdrEvent, CdrFrame, MessageMeta, ReplyStatus, SipFrame, WireMessage, WireReply};

/// Separator between a frame's leader and its payload
pub const CRLF: &str = "\r\n";
