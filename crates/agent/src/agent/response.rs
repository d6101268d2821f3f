//! Responding to inbound requests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drachtio_sip_message::{Method, SipMessage};
use drachtio_wire::Command;
use tokio::sync::oneshot;
use tracing::debug;

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::events::ConnectionId;
use crate::session::{Continuation, PendingResponse};

/// Reason phrase, headers and body of a response
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    /// Standard phrase for the status when unset
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ResponseOptions {
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn build_message(self, status: u16) -> SipMessage {
        let mut message = SipMessage::response(status, self.reason.unwrap_or_default());
        for (name, value) in self.headers {
            message.set(name, value);
        }
        if let Some(body) = self.body {
            message.set_body(body);
        }
        message
    }
}

#[derive(Debug, Default)]
struct ResponseState {
    final_sent: AtomicBool,
    finished: AtomicBool,
}

/// Receives an ACK or PRACK for a response sent with notification
pub type AckReceiver = oneshot::Receiver<SipMessage>;

/// The response side of an [`crate::InboundRequest`]
///
/// Clones share state, so whoever holds a clone sees whether a final
/// response went out.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    agent: Agent,
    connection: ConnectionId,
    method: Method,
    call_id: String,
    transaction_id: String,
    state: Arc<ResponseState>,
}

impl ServerResponse {
    pub(crate) fn new(
        agent: Agent,
        connection: ConnectionId,
        method: Method,
        call_id: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            connection,
            method,
            call_id: call_id.into(),
            transaction_id: transaction_id.into(),
            state: Arc::new(ResponseState::default()),
        }
    }

    /// Whether a response with status >= 200 has been sent
    pub fn final_response_sent(&self) -> bool {
        self.state.final_sent.load(Ordering::SeqCst)
    }

    /// Set shortly after the final response was handed to the connection
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Send a response and wait for the server to echo it
    pub async fn send(&self, status: u16, options: ResponseOptions) -> AgentResult<SipMessage> {
        let (message, _) = self.send_inner(status, options, false).await?;
        Ok(message)
    }

    /// Send a response and be told when the peer ACKs or PRACKs it
    ///
    /// A receiver is returned for reliable provisional responses and for a
    /// 200 to INVITE.
    pub async fn send_with_ack_notification(
        &self,
        status: u16,
        options: ResponseOptions,
    ) -> AgentResult<(SipMessage, Option<AckReceiver>)> {
        self.send_inner(status, options, true).await
    }

    async fn send_inner(
        &self,
        status: u16,
        options: ResponseOptions,
        notify_ack: bool,
    ) -> AgentResult<(SipMessage, Option<AckReceiver>)> {
        let is_final = status >= 200;
        // claimed before queueing so clones racing on a final response send one
        if is_final && self.state.final_sent.swap(true, Ordering::SeqCst) {
            return Err(AgentError::invalid_request("a final response was already sent"));
        }

        let message = options.build_message(status);
        let to_invite = self.method == Method::Invite;

        let (reply, reply_rx) = oneshot::channel();
        let (ack_notifier, ack_rx) = if notify_ack {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let queued = self.agent.session(self.connection).and_then(|session| {
            session.send(
                Command::Sip {
                    transaction_id: Some(self.transaction_id.clone()),
                    dialog_id: None,
                    message,
                },
                Some(Continuation::Response(PendingResponse {
                    reply,
                    ack_notifier,
                    status,
                    to_invite,
                })),
            )?;
            Ok(session)
        });
        let session = match queued {
            Ok(session) => session,
            Err(e) => {
                if is_final {
                    self.state.final_sent.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
        };

        if is_final {
            let state = self.state.clone();
            tokio::spawn(async move {
                state.finished.store(true, Ordering::SeqCst);
            });

            if to_invite {
                let mut tables = session.tables();
                tables.pending_inbound_invites.remove(&self.call_id);
                debug!(
                    "deleted pending invite for call-id {}, {} still pending",
                    self.call_id,
                    tables.pending_inbound_invites.len()
                );
            }
        }

        let sent = reply_rx.await.map_err(|_| AgentError::ConnectionClosed)??;
        let ack_rx = if sent.ack_registered { ack_rx } else { None };
        Ok((sent.message, ack_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::events::ConnectionRole;
    use crate::session::PeerSession;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_racing_final_responses_send_once() {
        let agent = Agent::new(AgentConfig::new("s3cr3t")).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(PeerSession::new(
            ConnectionId::next(),
            ConnectionRole::InboundAccepted,
            "127.0.0.1:9022".parse().unwrap(),
            tx,
            CancellationToken::new(),
            false,
        ));
        agent.inner.sessions.insert(session.id, session.clone());
        let response = ServerResponse::new(agent.clone(), session.id, Method::Invite, "call-1", "txn-1");

        let first = tokio::spawn({
            let response = response.clone();
            async move { response.send(200, ResponseOptions::default()).await }
        });
        let second = tokio::spawn({
            let response = response.clone();
            async move { response.send(486, ResponseOptions::default()).await }
        });

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("|sip|txn-1|"));
        assert!(response.final_response_sent());

        // the winner is still waiting for its echo; closing releases it
        agent.close_session(session.id);
        let results = [first.await.unwrap(), second.await.unwrap()];
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(AgentError::InvalidRequest { .. })))
            .count();
        let closed = results
            .iter()
            .filter(|r| matches!(r, Err(AgentError::ConnectionClosed)))
            .count();
        assert_eq!((rejected, closed), (1, 1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_build_message() {
        let message = ResponseOptions::default()
            .with_header("Contact", "<sip:a@b>")
            .with_body("v=0")
            .build_message(200);
        assert_eq!(message.status(), Some(200));
        assert_eq!(message.reason(), Some("OK"));
        assert_eq!(message.get("contact"), Some("<sip:a@b>"));
        assert_eq!(message.body(), "v=0");

        let custom = ResponseOptions::default().with_reason("Nope").build_message(480);
        assert_eq!(custom.reason(), Some("Nope"));
    }
}
