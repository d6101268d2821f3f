//! Inbound wire messages
//!
//! A frame body is `<messageId>|<typeTag>|<fields...>` optionally followed by
//! `\r\n` and a SIP payload. [`WireMessage::decode`] turns a body into one of a
//! closed set of variants, so nothing downstream needs to look at the raw
//! `|`-delimited text again.
//!
//! # Field layouts
//!
//! ```text
//! sip       id|sip|source|length|protocol|address|port|time|txnId|dialogId
//! response  id|response|correlatedId|OK|<hostport>
//! response  id|response|correlatedId|OK|source|length|protocol|address|port|time|txnId|dialogId[|continue]
//! response  id|response|correlatedId|<error>|<reason>
//! cdr       id|cdr:attempt|source|time
//! cdr       id|cdr:start|source|time|role        (likewise cdr:stop)
//! ```

use std::fmt;

use drachtio_sip_message::{SipMessage, SipParseError};

use crate::error::WireError;

const SIP_MIN_TOKENS: usize = 10;
const REPLY_MIN_TOKENS: usize = 4;
const REPLY_META_TOKENS: usize = 12;
const CONTINUE_MARKER: &str = "continue";

/// Transport metadata the server attaches to SIP messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// `network` when the message arrived from the SIP network, `application` when we sent it
    pub source: String,
    pub protocol: String,
    pub address: String,
    pub port: String,
    pub time: String,
    pub transaction_id: String,
    pub dialog_id: String,
}

impl MessageMeta {
    // tokens start at the `source` field
    fn from_tokens(tokens: &[&str]) -> Self {
        let field = |i: usize| tokens.get(i).map(|s| s.to_string()).unwrap_or_default();
        Self {
            source: field(0),
            protocol: field(2),
            address: field(3),
            port: field(4),
            time: field(5),
            transaction_id: field(6),
            dialog_id: field(7),
        }
    }

    pub fn is_network(&self) -> bool {
        self.source == "network"
    }
}

/// A SIP message pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipFrame {
    pub message_id: String,
    pub meta: MessageMeta,
    pub message: SipMessage,
}

/// Result token of a `response|` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    /// Any token other than `OK`, kept verbatim
    Failed(String),
}

/// The server's reply to one of our commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireReply {
    pub message_id: String,
    /// Message id of the command this reply answers
    pub reply_to: String,
    pub status: ReplyStatus,
    /// Fields after the result token
    pub fields: Vec<String>,
    /// Present when the reply describes a SIP message
    pub meta: Option<MessageMeta>,
    pub message: Option<SipMessage>,
    /// The payload was present but did not parse
    pub payload_error: Option<SipParseError>,
    /// The server will send further replies for the same command
    pub more_to_come: bool,
}

impl WireReply {
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Host and port of the server, carried by an `authenticate` reply
    pub fn hostport(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    /// Human readable failure reason
    pub fn failure_reason(&self) -> String {
        self.fields
            .first()
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "request failed".to_string())
    }
}

/// Call detail record event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdrEvent {
    Attempt,
    Start,
    Stop,
}

impl CdrEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdrEvent::Attempt => "attempt",
            CdrEvent::Start => "start",
            CdrEvent::Stop => "stop",
        }
    }

    /// The verb a client routes to subscribe to this event
    pub fn route_verb(&self) -> String {
        format!("cdr:{}", self.as_str())
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cdr:attempt" => Some(CdrEvent::Attempt),
            "cdr:start" => Some(CdrEvent::Start),
            "cdr:stop" => Some(CdrEvent::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for CdrEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call detail record pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdrFrame {
    pub message_id: String,
    pub event: CdrEvent,
    pub source: String,
    pub time: String,
    /// Leg role, present on `start` and `stop`
    pub role: Option<String>,
    pub message: SipMessage,
}

/// Any frame a server can send to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Sip(SipFrame),
    Response(WireReply),
    Cdr(CdrFrame),
}

impl WireMessage {
    /// Decode a complete frame body
    pub fn decode(body: &str) -> Result<Self, WireError> {
        let (leader, payload) = match body.find('\r') {
            Some(pos) => (&body[..pos], body.get(pos + 2..).filter(|p| !p.is_empty())),
            None => (body, None),
        };
        let tokens: Vec<&str> = leader.split('|').collect();
        if tokens.len() < 2 || tokens[0].is_empty() {
            return Err(WireError::Malformed {
                body: leader.to_string(),
            });
        }
        let message_id = tokens[0].to_string();
        let tag = tokens[1];

        match tag {
            "sip" => {
                if tokens.len() < SIP_MIN_TOKENS {
                    return Err(WireError::missing_fields(tag, SIP_MIN_TOKENS, tokens.len()));
                }
                let message = parse_payload(tag, payload)?;
                Ok(WireMessage::Sip(SipFrame {
                    message_id,
                    meta: MessageMeta::from_tokens(&tokens[2..]),
                    message,
                }))
            }
            "response" => {
                if tokens.len() < REPLY_MIN_TOKENS {
                    return Err(WireError::missing_fields(tag, REPLY_MIN_TOKENS, tokens.len()));
                }
                let status = match tokens[3] {
                    "OK" => ReplyStatus::Ok,
                    other => ReplyStatus::Failed(other.to_string()),
                };
                let meta = (tokens.len() >= REPLY_META_TOKENS).then(|| MessageMeta::from_tokens(&tokens[4..]));
                // a bad payload still has to reach whoever waits on `reply_to`
                let (message, payload_error) = match payload.map(SipMessage::parse) {
                    Some(Ok(message)) => (Some(message), None),
                    Some(Err(e)) => (None, Some(e)),
                    None => (None, None),
                };
                Ok(WireMessage::Response(WireReply {
                    message_id,
                    reply_to: tokens[2].to_string(),
                    status,
                    fields: tokens[4..].iter().map(|s| s.to_string()).collect(),
                    meta,
                    message,
                    payload_error,
                    more_to_come: tokens.get(12) == Some(&CONTINUE_MARKER),
                }))
            }
            _ => match CdrEvent::from_tag(tag) {
                Some(event) => {
                    let expected = if event == CdrEvent::Attempt { 4 } else { 5 };
                    if tokens.len() < expected {
                        return Err(WireError::missing_fields(tag, expected, tokens.len()));
                    }
                    let message = parse_payload(tag, payload)?;
                    Ok(WireMessage::Cdr(CdrFrame {
                        message_id,
                        event,
                        source: tokens[2].to_string(),
                        time: tokens[3].to_string(),
                        role: (event != CdrEvent::Attempt).then(|| tokens[4].to_string()),
                        message,
                    }))
                }
                None => Err(WireError::UnknownTag {
                    tag: tag.to_string(),
                }),
            },
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            WireMessage::Sip(frame) => &frame.message_id,
            WireMessage::Response(reply) => &reply.message_id,
            WireMessage::Cdr(frame) => &frame.message_id,
        }
    }
}

fn parse_payload(tag: &str, payload: Option<&str>) -> Result<SipMessage, WireError> {
    let payload = payload.ok_or_else(|| WireError::MissingPayload { tag: tag.to_string() })?;
    Ok(SipMessage::parse(payload)?)
}
