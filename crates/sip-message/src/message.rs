//! SIP request and response messages
//!
//! A [`SipMessage`] is either a request or a response, distinguished by its
//! [`StartLine`]. Headers keep their original order and spelling; lookups go
//! through [`SipMessage::get`] which matches names case-insensitively.
//!
//! Serialization (`Display`) recomputes `Content-Length` from the body, so a
//! caller that edits the body never sends a stale length.

use std::fmt;
use std::str::FromStr;

use crate::error::SipParseError;
use crate::header::{names_match, Header};
use crate::method::Method;

const SIP_VERSION: &str = "SIP/2.0";

/// Request/response discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

/// The first line of a SIP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD uri SIP/2.0`
    Request { method: Method, uri: String },
    /// `SIP/2.0 status reason`
    Response { status: u16, reason: String },
}

/// Parsed `CSeq` header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// A SIP request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    start: StartLine,
    headers: Vec<Header>,
    body: String,
}

impl SipMessage {
    /// Build a request with no headers and an empty body
    pub fn request(method: Method, uri: impl Into<String>) -> Self {
        Self {
            start: StartLine::Request {
                method,
                uri: uri.into(),
            },
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Build a response; an empty reason is replaced by the standard phrase
    pub fn response(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() {
            reason_phrase(status).to_string()
        } else {
            reason
        };
        Self {
            start: StartLine::Response { status, reason },
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn from_parts(start: StartLine, headers: Vec<Header>, body: String) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    /// Parse message text
    pub fn parse(text: &str) -> Result<Self, SipParseError> {
        crate::parse::parse_message(text)
    }

    /// Builder-style header setter
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder-style body setter
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    pub fn message_type(&self) -> MessageType {
        match self.start {
            StartLine::Request { .. } => MessageType::Request,
            StartLine::Response { .. } => MessageType::Response,
        }
    }

    pub fn is_request(&self) -> bool {
        self.message_type() == MessageType::Request
    }

    pub fn is_response(&self) -> bool {
        self.message_type() == MessageType::Response
    }

    /// Request method, or `None` for a response
    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request URI, or `None` for a response
    pub fn uri(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { uri, .. } => Some(uri.as_str()),
            StartLine::Response { .. } => None,
        }
    }

    /// Replace the request URI; no effect on a response
    pub fn set_uri(&mut self, new_uri: impl Into<String>) {
        if let StartLine::Request { uri, .. } = &mut self.start {
            *uri = new_uri.into();
        }
    }

    /// Response status code, or `None` for a request
    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Response reason phrase, or `None` for a request
    pub fn reason(&self) -> Option<&str> {
        match &self.start {
            StartLine::Response { reason, .. } => Some(reason.as_str()),
            StartLine::Request { .. } => None,
        }
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First value of the named header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// All values of the named header, in message order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.is(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h.is(name))
    }

    /// Set a header, replacing every existing occurrence
    ///
    /// The new value takes the position of the first existing occurrence, or
    /// is appended when the header is not present yet.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter().position(|h| h.is(&name)) {
            Some(first) => {
                self.headers[first] = Header::new(name.clone(), value);
                let mut index = 0;
                self.headers.retain(|h| {
                    let keep = index <= first || !names_match(&h.name, &name);
                    index += 1;
                    keep
                });
            }
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Append a header without touching existing occurrences
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Remove every occurrence of the named header, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.is(name));
        before - self.headers.len()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn call_id(&self) -> Option<&str> {
        self.get("Call-ID")
    }

    /// Parsed `CSeq` header
    pub fn cseq(&self) -> Option<CSeq> {
        let value = self.get("CSeq")?;
        let mut parts = value.split_whitespace();
        let seq = parts.next()?.parse().ok()?;
        let method = Method::from(parts.next()?);
        Some(CSeq { seq, method })
    }

    /// `RSeq` of a reliable provisional response
    pub fn rseq(&self) -> Option<u32> {
        self.get("RSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Whether this is a final response (status >= 200)
    pub fn is_final(&self) -> bool {
        self.status().map(|s| s >= 200).unwrap_or(false)
    }
}

impl FromStr for SipMessage {
    type Err = SipParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            StartLine::Request { method, uri } => write!(f, "{} {} {}\r\n", method, uri, SIP_VERSION)?,
            StartLine::Response { status, reason } => {
                write!(f, "{} {} {}\r\n", SIP_VERSION, status, reason)?
            }
        }

        let mut wrote_length = false;
        for header in &self.headers {
            if header.is("Content-Length") {
                if !wrote_length {
                    write!(f, "Content-Length: {}\r\n", self.body.len())?;
                    wrote_length = true;
                }
                continue;
            }
            write!(f, "{}: {}\r\n", header.name, header.value)?;
        }
        if !wrote_length && !self.body.is_empty() {
            write!(f, "Content-Length: {}\r\n", self.body.len())?;
        }

        f.write_str("\r\n")?;
        f.write_str(&self.body)
    }
}

/// Standard reason phrase for a status code
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        600 => "Busy Everywhere",
        603 => "Decline",
        _ => "",
    }
}
