//! Request types
//!
//! # Key Components
//!
//! - [`RequestOptions`] - describes a request to originate
//! - [`OutboundRequest`] - a request the server has sent; yields [`RequestEvent`]s
//! - [`Acknowledger`] - sends the ACK or PRACK a response calls for
//! - [`InboundRequest`] - a request received from the SIP network

use drachtio_sip_message::{Method, SipMessage};
use drachtio_wire::MessageMeta;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::digest::{DigestAuth, DigestState, SharedDigestState};
use crate::error::{AgentError, AgentResult};
use crate::events::ConnectionId;

/// Request URI used for in-dialog requests that only name a dialog
pub const PLACEHOLDER_URI: &str = "sip:placeholder";

/// Options for originating a SIP request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub uri: Option<String>,
    /// Applied in order; a later entry replaces an earlier one of the same name
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Server transaction to send within, e.g. for CANCEL
    pub stack_txn_id: Option<String>,
    /// Server dialog to send within
    pub stack_dialog_id: Option<String>,
    /// Credentials for answering a digest challenge
    pub auth: Option<DigestAuth>,
}

impl RequestOptions {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: Some(uri.into()),
            headers: Vec::new(),
            body: None,
            stack_txn_id: None,
            stack_dialog_id: None,
            auth: None,
        }
    }

    /// A request within an existing dialog; the server supplies the URI
    pub fn in_dialog(method: Method, dialog_id: impl Into<String>) -> Self {
        Self {
            method,
            uri: None,
            headers: Vec::new(),
            body: None,
            stack_txn_id: None,
            stack_dialog_id: Some(dialog_id.into()),
            auth: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: DigestAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_stack_txn_id(mut self, txn_id: impl Into<String>) -> Self {
        self.stack_txn_id = Some(txn_id.into());
        self
    }

    pub fn with_stack_dialog_id(mut self, dialog_id: impl Into<String>) -> Self {
        self.stack_dialog_id = Some(dialog_id.into());
        self
    }

    pub(crate) fn build_message(&self) -> AgentResult<SipMessage> {
        let uri = match (&self.uri, &self.stack_dialog_id) {
            (Some(uri), _) if !uri.is_empty() => uri.clone(),
            (_, Some(_)) => PLACEHOLDER_URI.to_string(),
            _ => return Err(AgentError::invalid_request("a request uri is required")),
        };

        let mut message = SipMessage::request(self.method.clone(), uri);
        for (name, value) in &self.headers {
            message.set(name.as_str(), value.as_str());
        }
        if let Some(body) = &self.body {
            message.set_body(body.as_str());
        }
        Ok(message)
    }
}

/// A request as the server sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub message: SipMessage,
    pub meta: MessageMeta,
}

impl SentRequest {
    pub fn method(&self) -> Option<&Method> {
        self.message.method()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.message.call_id()
    }

    pub fn transaction_id(&self) -> &str {
        &self.meta.transaction_id
    }
}

/// A response received from the SIP network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedResponse {
    pub message: SipMessage,
    pub meta: MessageMeta,
}

impl ReceivedResponse {
    pub fn status(&self) -> u16 {
        self.message.status().unwrap_or_default()
    }

    pub fn is_final(&self) -> bool {
        self.message.is_final()
    }
}

/// Something that happened to an [`OutboundRequest`]
#[derive(Debug)]
pub enum RequestEvent {
    /// A response; `ack` is set when the response must be acknowledged
    Response {
        response: ReceivedResponse,
        ack: Option<Acknowledger>,
    },
    /// A digest challenge was answered with this new request
    Authenticate { request: SentRequest },
    /// A digest challenge could not be answered; the challenge follows as a response
    AuthenticationFailed { reason: String },
}

/// A request the server accepted and sent
///
/// Responses arrive through [`OutboundRequest::next_event`] until the final
/// one, after which the event stream ends.
#[derive(Debug)]
pub struct OutboundRequest {
    pub(crate) agent: Agent,
    pub(crate) connection: ConnectionId,
    pub(crate) request: SentRequest,
    pub(crate) events: mpsc::UnboundedReceiver<RequestEvent>,
    pub(crate) digest: SharedDigestState,
}

impl OutboundRequest {
    pub fn request(&self) -> &SentRequest {
        &self.request
    }

    pub fn message(&self) -> &SipMessage {
        &self.request.message
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Where answering a digest challenge for this request stands
    pub fn digest_state(&self) -> DigestState {
        self.digest.get()
    }

    /// Next event, or `None` once the final response was delivered or the connection closed
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        self.events.recv().await
    }

    /// Wait for the final response, skipping provisional responses and digest retries
    pub async fn final_response(&mut self) -> AgentResult<(ReceivedResponse, Option<Acknowledger>)> {
        while let Some(event) = self.events.recv().await {
            if let RequestEvent::Response { response, ack } = event {
                if response.is_final() {
                    return Ok((response, ack));
                }
            }
        }
        Err(AgentError::ConnectionClosed)
    }

    /// Cancel a pending INVITE
    pub async fn cancel(&self) -> AgentResult<OutboundRequest> {
        if self.request.method() != Some(&Method::Invite) {
            return Err(AgentError::invalid_request("only an INVITE can be cancelled"));
        }
        let uri = self.request.message.uri().unwrap_or(PLACEHOLDER_URI);
        let options = RequestOptions::new(Method::Cancel, uri).with_stack_txn_id(self.request.transaction_id());
        self.agent.send_request(Some(self.connection), options).await
    }
}

/// Which acknowledgement a response calls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckKind {
    /// ACK for a final response to INVITE
    Ack,
    /// PRACK for a reliable provisional response, with its `RAck` value
    Prack { rack: String },
}

/// Headers and body for an ACK or PRACK
#[derive(Debug, Clone, Default)]
pub struct AckOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl AckOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Sends the ACK or PRACK for one response
#[derive(Debug, Clone)]
pub struct Acknowledger {
    pub(crate) agent: Agent,
    pub(crate) connection: ConnectionId,
    pub(crate) dialog_id: String,
    pub(crate) request: SipMessage,
    pub(crate) kind: AckKind,
}

impl Acknowledger {
    /// Acknowledger for `response` to `request`, if the response needs one
    pub(crate) fn for_response(
        agent: &Agent,
        connection: ConnectionId,
        request: &SipMessage,
        response: &SipMessage,
        dialog_id: &str,
    ) -> Option<Self> {
        let status = response.status()?;
        let kind = if status >= 200 && request.method() == Some(&Method::Invite) {
            AckKind::Ack
        } else if (101..200).contains(&status) {
            let rseq = response.rseq()?;
            let cseq = response.cseq()?;
            AckKind::Prack {
                rack: format!("{} {} {}", rseq, cseq.seq, cseq.method),
            }
        } else {
            return None;
        };
        Some(Self {
            agent: agent.clone(),
            connection,
            dialog_id: dialog_id.to_string(),
            request: request.clone(),
            kind,
        })
    }

    pub fn kind(&self) -> &AckKind {
        &self.kind
    }

    pub fn method(&self) -> Method {
        match self.kind {
            AckKind::Ack => Method::Ack,
            AckKind::Prack { .. } => Method::Prack,
        }
    }

    pub fn dialog_id(&self) -> &str {
        &self.dialog_id
    }

    /// Send the acknowledgement and wait for the server to echo it
    pub async fn send(self, options: AckOptions) -> AgentResult<SipMessage> {
        let options = match &self.kind {
            AckKind::Ack => options,
            AckKind::Prack { rack } => options.with_header("RAck", rack.as_str()),
        };
        let method = self.method();
        self.agent
            .send_ack(self.connection, method, &self.dialog_id, &self.request, options)
            .await
    }
}

/// A request received from the SIP network
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub(crate) message: SipMessage,
    pub(crate) meta: MessageMeta,
    pub(crate) connection: ConnectionId,
    pub(crate) cancelled: CancellationToken,
}

impl InboundRequest {
    pub fn message(&self) -> &SipMessage {
        &self.message
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    pub fn method(&self) -> Option<&Method> {
        self.message.method()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.message.call_id()
    }

    pub fn transaction_id(&self) -> &str {
        &self.meta.transaction_id
    }

    pub fn dialog_id(&self) -> &str {
        &self.meta.dialog_id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Whether the caller sent a CANCEL for this INVITE
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Resolves when the caller sends a CANCEL for this INVITE
    pub async fn cancelled(&self) {
        self.cancelled.cancelled().await
    }
}
