//! Per-connection correlation state
//!
//! A [`PeerSession`] exists from the moment a connection is open until it
//! closes. It owns every table that maps wire message ids, SIP transaction
//! ids, call-ids and dialog ids to the work waiting on them. The reader task
//! is the only place entries are completed; teardown takes the whole table
//! set at once, so a continuation is either completed or dropped, never both.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use drachtio_sip_message::SipMessage;
use drachtio_wire::{new_message_id, Command};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::agent::outbound::ProxyOutcome;
use crate::agent::request::{Acknowledger, ReceivedResponse, RequestEvent, RequestOptions, SentRequest};
use crate::digest::SharedDigestState;
use crate::error::{AgentError, AgentResult};
use crate::events::{ConnectionId, ConnectionRole};
use crate::logging::WIRE_TARGET;

/// Work waiting on a `response|` frame
pub(crate) enum Continuation {
    Authenticate,
    Request(PendingRequest),
    Response(PendingResponse),
    Ack {
        reply: oneshot::Sender<AgentResult<SipMessage>>,
    },
    /// Stays registered while replies carry `continue`
    Proxy {
        outcomes: mpsc::UnboundedSender<ProxyOutcome>,
    },
}

impl Continuation {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Continuation::Authenticate => "authenticate",
            Continuation::Request(_) => "request",
            Continuation::Response(_) => "response",
            Continuation::Ack { .. } => "ack",
            Continuation::Proxy { .. } => "proxy",
        }
    }
}

/// An outbound SIP request the server has not acknowledged yet
pub(crate) struct PendingRequest {
    pub options: RequestOptions,
    /// What we sent, used when the server does not echo the message
    pub message: SipMessage,
    pub events: mpsc::UnboundedSender<RequestEvent>,
    pub reply: RequestReply,
    pub digest: SharedDigestState,
}

/// Who learns the outcome of a [`PendingRequest`]
pub(crate) enum RequestReply {
    Caller(oneshot::Sender<AgentResult<SentRequest>>),
    /// A digest retry; the outcome goes to the original request's events
    AuthRetry {
        challenge: ReceivedResponse,
        ack: Option<Acknowledger>,
    },
}

/// A response we sent, waiting for the server to echo it
pub(crate) struct PendingResponse {
    pub reply: oneshot::Sender<AgentResult<ResponseSent>>,
    pub ack_notifier: Option<oneshot::Sender<SipMessage>>,
    pub status: u16,
    pub to_invite: bool,
}

pub(crate) struct ResponseSent {
    pub message: SipMessage,
    pub ack_registered: bool,
}

/// An outbound request with a SIP transaction in progress
#[derive(Clone)]
pub(crate) struct PendingTransaction {
    pub request: SentRequest,
    pub options: RequestOptions,
    pub events: mpsc::UnboundedSender<RequestEvent>,
    pub digest: SharedDigestState,
}

/// An inbound INVITE without a final response yet
pub(crate) struct TrackedInvite {
    pub cancel: CancellationToken,
    pub since: Instant,
}

/// The five correlation maps plus authentication state
#[derive(Default)]
pub(crate) struct CorrelationTables {
    /// wire message id -> continuation
    pub pending_requests: HashMap<String, Continuation>,
    /// SIP transaction id -> request we originated
    pub pending_sip_transactions: HashMap<String, PendingTransaction>,
    /// call-ids with a digest retry in flight
    pub pending_sip_auth_retries: HashSet<String>,
    /// call-id -> inbound INVITE
    pub pending_inbound_invites: HashMap<String, TrackedInvite>,
    /// dialog id -> notifier for the peer's ACK or PRACK
    pub pending_ack_or_prack: HashMap<String, oneshot::Sender<SipMessage>>,
    pub authenticated: bool,
    pub ready: bool,
    pub hostport: Option<String>,
}

impl CorrelationTables {
    /// Track an inbound INVITE, dropping entries older than `ttl`
    pub fn track_invite(&mut self, call_id: &str, cancel: CancellationToken, ttl: Duration) {
        let now = Instant::now();
        let before = self.pending_inbound_invites.len();
        self.pending_inbound_invites
            .retain(|_, invite| now.duration_since(invite.since) < ttl);
        let purged = before - self.pending_inbound_invites.len();
        if purged > 0 {
            debug!("purged {} stale inbound invites", purged);
        }
        self.pending_inbound_invites.insert(
            call_id.to_string(),
            TrackedInvite { cancel, since: now },
        );
    }

    /// Count of entries that keep the agent from being idle
    pub fn outstanding(&self) -> usize {
        self.pending_requests.len() + self.pending_sip_transactions.len() + self.pending_ack_or_prack.len()
    }
}

/// State for one connection to a drachtio server
pub(crate) struct PeerSession {
    pub id: ConnectionId,
    pub role: ConnectionRole,
    pub peer: SocketAddr,
    writer: mpsc::UnboundedSender<String>,
    tables: Mutex<CorrelationTables>,
    shutdown: CancellationToken,
    log_wire: bool,
}

impl PeerSession {
    pub fn new(
        id: ConnectionId,
        role: ConnectionRole,
        peer: SocketAddr,
        writer: mpsc::UnboundedSender<String>,
        shutdown: CancellationToken,
        log_wire: bool,
    ) -> Self {
        Self {
            id,
            role,
            peer,
            writer,
            tables: Mutex::new(CorrelationTables::default()),
            shutdown,
            log_wire,
        }
    }

    pub fn tables(&self) -> MutexGuard<'_, CorrelationTables> {
        self.tables.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.tables.lock().ready
    }

    pub fn is_authenticated(&self) -> bool {
        self.tables.lock().authenticated
    }

    /// Encode and queue a command, returning its message id
    ///
    /// The continuation is registered before the frame is queued, so the
    /// reply can never arrive ahead of its entry.
    pub fn send(&self, command: Command, continuation: Option<Continuation>) -> AgentResult<String> {
        let message_id = new_message_id();
        let body = command.encode(&message_id);

        if let Some(continuation) = continuation {
            self.tables
                .lock()
                .pending_requests
                .insert(message_id.clone(), continuation);
        }

        if self.log_wire {
            trace!(target: WIRE_TARGET, connection = %self.id, "===>\r\n{}#{}", body.len(), body);
        }
        debug!(connection = %self.id, "sending {} command {}", command.name(), message_id);

        if self.writer.send(body).is_err() {
            self.tables.lock().pending_requests.remove(&message_id);
            return Err(AgentError::ConnectionClosed);
        }
        Ok(message_id)
    }

    pub fn log_received(&self, body: &str) {
        if self.log_wire {
            trace!(target: WIRE_TARGET, connection = %self.id, "<===\r\n{}#{}", body.len(), body);
        }
    }

    /// Ask the connection to close; it will not reconnect
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Drop every pending entry; waiters observe a closed channel
    pub fn teardown(&self) -> usize {
        let tables = std::mem::take(&mut *self.tables.lock());
        tables.outstanding() + tables.pending_inbound_invites.len()
    }
}
