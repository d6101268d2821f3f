//! Originating requests, acknowledgements and proxy operations

use std::sync::Arc;

use drachtio_sip_message::{Method, SipMessage};
use drachtio_wire::{Command, Forking, MessageMeta, ProxyCommand, WireReply};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::agent::request::{
    AckOptions, Acknowledger, InboundRequest, OutboundRequest, ReceivedResponse, RequestEvent, RequestOptions,
    SentRequest,
};
use crate::agent::Agent;
use crate::config::DefaultConnection;
use crate::digest::{DigestState, SharedDigestState};
use crate::error::{AgentError, AgentResult};
use crate::events::ConnectionId;
use crate::session::{
    Continuation, PeerSession, PendingRequest, PendingResponse, PendingTransaction, RequestReply, ResponseSent,
};

/// Parameters for [`Agent::proxy`]
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    pub destinations: Vec<String>,
    pub remain_in_dialog: bool,
    pub full_response: bool,
    pub follow_redirects: bool,
    pub forking: Forking,
    pub provisional_timeout: Option<String>,
    pub final_timeout: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ProxyOptions {
    pub fn new<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destinations: destinations.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_remain_in_dialog(mut self, remain: bool) -> Self {
        self.remain_in_dialog = remain;
        self
    }

    pub fn with_full_response(mut self, full: bool) -> Self {
        self.full_response = full;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_forking(mut self, forking: Forking) -> Self {
        self.forking = forking;
        self
    }

    /// e.g. `"2s"`
    pub fn with_provisional_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.provisional_timeout = Some(timeout.into());
        self
    }

    pub fn with_final_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.final_timeout = Some(timeout.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One reply to a proxy command
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub success: bool,
    /// Set when the server reports a failure
    pub reason: Option<String>,
    pub meta: Option<MessageMeta>,
    pub message: Option<SipMessage>,
    /// No further outcomes follow
    pub last: bool,
}

impl From<WireReply> for ProxyOutcome {
    fn from(reply: WireReply) -> Self {
        let reason = reply_error(&reply).map(|e| failure_text(&e));
        Self {
            success: reason.is_none(),
            reason,
            meta: reply.meta,
            message: reply.message,
            last: !reply.more_to_come,
        }
    }
}

impl Agent {
    /// Pick the connection for a request
    pub(crate) fn select_session(&self, target: Option<ConnectionId>) -> AgentResult<Arc<PeerSession>> {
        if let Some(connection) = target {
            let session = self
                .session(connection)
                .map_err(|_| AgentError::no_connection(format!("{} is not open", connection)))?;
            if !session.is_ready() {
                return Err(AgentError::NotReady { connection });
            }
            return Ok(session);
        }

        let ready: Vec<Arc<PeerSession>> = self.sessions().into_iter().filter(|s| s.is_ready()).collect();
        match self.config().default_connection {
            DefaultConnection::Disabled => Err(AgentError::no_connection(
                "no target given and default connection selection is disabled",
            )),
            DefaultConnection::FirstAvailable => ready
                .into_iter()
                .next()
                .ok_or_else(|| AgentError::no_connection("no ready connection")),
            DefaultConnection::OnlyWhenSingle => match ready.len() {
                0 => Err(AgentError::no_connection("no ready connection")),
                1 => Ok(ready[0].clone()),
                count => Err(AgentError::AmbiguousConnection { count }),
            },
        }
    }

    /// Send a SIP request through a drachtio server
    ///
    /// Resolves once the server has sent the request; responses then arrive
    /// on the returned [`OutboundRequest`].
    pub async fn send_request(
        &self,
        target: Option<ConnectionId>,
        options: RequestOptions,
    ) -> AgentResult<OutboundRequest> {
        let session = self.select_session(target)?;
        let message = options.build_message()?;
        let (reply, reply_rx) = oneshot::channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let digest = SharedDigestState::default();

        let command = Command::Sip {
            transaction_id: options.stack_txn_id.clone(),
            dialog_id: options.stack_dialog_id.clone(),
            message: message.clone(),
        };
        session.send(
            command,
            Some(Continuation::Request(PendingRequest {
                options,
                message,
                events,
                reply: RequestReply::Caller(reply),
                digest: digest.clone(),
            })),
        )?;

        let request = reply_rx.await.map_err(|_| AgentError::ConnectionClosed)??;
        Ok(OutboundRequest {
            agent: self.clone(),
            connection: session.id,
            request,
            events: events_rx,
            digest,
        })
    }

    /// Resend a challenged request with credentials; events go to the original request
    pub(crate) async fn send_auth_retry(
        &self,
        connection: ConnectionId,
        options: RequestOptions,
        events: mpsc::UnboundedSender<RequestEvent>,
        digest: SharedDigestState,
        challenge: ReceivedResponse,
        ack: Option<Acknowledger>,
    ) -> AgentResult<()> {
        let session = self.session(connection)?;
        let message = options.build_message()?;
        let command = Command::Sip {
            transaction_id: options.stack_txn_id.clone(),
            dialog_id: options.stack_dialog_id.clone(),
            message: message.clone(),
        };
        session.send(
            command,
            Some(Continuation::Request(PendingRequest {
                options,
                message,
                events,
                reply: RequestReply::AuthRetry { challenge, ack },
                digest,
            })),
        )?;
        Ok(())
    }

    /// Send an ACK or PRACK within a dialog
    ///
    /// The message reuses the request URI of `request`.
    pub async fn send_ack(
        &self,
        connection: ConnectionId,
        method: Method,
        dialog_id: &str,
        request: &SipMessage,
        options: AckOptions,
    ) -> AgentResult<SipMessage> {
        let session = self.session(connection)?;
        let uri = request
            .uri()
            .ok_or_else(|| AgentError::invalid_request("acknowledged message is not a request"))?;

        let mut message = SipMessage::request(method, uri);
        for (name, value) in options.headers {
            message.set(name, value);
        }
        if let Some(body) = options.body {
            message.set_body(body);
        }

        let (reply, reply_rx) = oneshot::channel();
        session.send(
            Command::Sip {
                transaction_id: None,
                dialog_id: Some(dialog_id.to_string()),
                message,
            },
            Some(Continuation::Ack { reply }),
        )?;
        reply_rx.await.map_err(|_| AgentError::ConnectionClosed)?
    }

    /// Let the server proxy an inbound request
    ///
    /// Every reply from the server is delivered on the returned channel,
    /// which closes after the last one.
    pub fn proxy(
        &self,
        request: &InboundRequest,
        options: ProxyOptions,
    ) -> AgentResult<mpsc::UnboundedReceiver<ProxyOutcome>> {
        let first = options
            .destinations
            .first()
            .ok_or_else(|| AgentError::invalid_request("proxy needs at least one destination"))?;
        let method = request
            .method()
            .cloned()
            .ok_or_else(|| AgentError::invalid_request("only requests can be proxied"))?;
        let session = self.session(request.connection())?;

        let mut message = SipMessage::request(method, first.as_str());
        for (name, value) in &options.headers {
            message.set(name.as_str(), value.as_str());
        }

        let command = Command::Proxy(ProxyCommand {
            transaction_id: request.transaction_id().to_string(),
            remain_in_dialog: options.remain_in_dialog,
            full_response: options.full_response,
            follow_redirects: options.follow_redirects,
            forking: options.forking,
            provisional_timeout: options.provisional_timeout.unwrap_or_default(),
            final_timeout: options.final_timeout.unwrap_or_default(),
            destinations: options.destinations,
            message,
        });

        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        session.send(command, Some(Continuation::Proxy { outcomes }))?;
        Ok(outcomes_rx)
    }
}

/// The server answered a `sip|` request command
pub(crate) fn complete_request(session: &Arc<PeerSession>, pending: PendingRequest, reply: WireReply) {
    let PendingRequest {
        options,
        message,
        events,
        reply: waiter,
        digest,
    } = pending;

    if let Some(error) = reply_error(&reply) {
        debug!(connection = %session.id, "request failed: {}", error);
        match waiter {
            RequestReply::Caller(tx) => {
                let _ = tx.send(Err(error));
            }
            RequestReply::AuthRetry { challenge, ack } => {
                digest.set(DigestState::Failed);
                if let Some(call_id) = challenge.message.call_id() {
                    session.tables().pending_sip_auth_retries.remove(call_id);
                }
                let _ = events.send(RequestEvent::AuthenticationFailed {
                    reason: failure_text(&error),
                });
                let _ = events.send(RequestEvent::Response {
                    response: challenge,
                    ack,
                });
            }
        }
        return;
    }

    let request = SentRequest {
        message: reply.message.unwrap_or(message),
        meta: reply.meta.unwrap_or_default(),
    };

    // the server never reports the response to a CANCEL
    if options.method != Method::Cancel {
        session.tables().pending_sip_transactions.insert(
            request.meta.transaction_id.clone(),
            PendingTransaction {
                request: request.clone(),
                options,
                events: events.clone(),
                digest: digest.clone(),
            },
        );
    }

    match waiter {
        RequestReply::Caller(tx) => {
            if tx.send(Ok(request)).is_err() {
                debug!(connection = %session.id, "caller went away before the request was sent");
            }
        }
        RequestReply::AuthRetry { .. } => {
            debug!(connection = %session.id, "request resent with credentials");
            digest.set(DigestState::Completed);
            let _ = events.send(RequestEvent::Authenticate { request });
        }
    }
}

/// The failure a reply carries: a refused command or an unreadable echo
pub(crate) fn reply_error(reply: &WireReply) -> Option<AgentError> {
    if !reply.is_ok() {
        return Some(AgentError::request_failed(reply.failure_reason()));
    }
    reply.payload_error.clone().map(AgentError::Sip)
}

fn failure_text(error: &AgentError) -> String {
    match error {
        AgentError::RequestFailed { reason } => reason.clone(),
        other => other.to_string(),
    }
}

/// The server answered a `sip|` response command
pub(crate) fn complete_response(session: &Arc<PeerSession>, pending: PendingResponse, reply: WireReply) {
    if let Some(error) = reply_error(&reply) {
        let _ = pending.reply.send(Err(error));
        return;
    }

    let message = reply
        .message
        .unwrap_or_else(|| SipMessage::response(pending.status, ""));
    let dialog_id = reply.meta.map(|m| m.dialog_id).unwrap_or_default();

    let mut ack_registered = false;
    if let Some(notifier) = pending.ack_notifier {
        let wants_ack = message.rseq().is_some() || (pending.status == 200 && pending.to_invite);
        if wants_ack && !dialog_id.is_empty() {
            session.tables().pending_ack_or_prack.insert(dialog_id, notifier);
            ack_registered = true;
        }
    }

    let _ = pending.reply.send(Ok(ResponseSent {
        message,
        ack_registered,
    }));
}
