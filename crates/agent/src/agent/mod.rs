//! The drachtio agent
//!
//! An [`Agent`] owns every connection to drachtio servers and the state that
//! correlates wire traffic with SIP transactions. It can dial servers
//! ([`Agent::connect`]), accept connections from them ([`Agent::listen`]), or
//! both.
//!
//! # Key Components
//!
//! - [`Agent`] - cheap to clone handle; all clones drive the same connections
//! - [`request::OutboundRequest`] - a request this agent originated
//! - [`request::InboundRequest`] / [`response::ServerResponse`] - a request from the network and its answer
//! - [`outbound::ProxyOptions`] - parameters for letting the server proxy a request
//!
//! # Example
//!
//! ```rust,no_run
//! use drachtio_agent::{Agent, AgentConfig, ConnectConfig, Disposition, ResponseOptions, handler_fn};
//!
//! # async fn run() -> drachtio_agent::AgentResult<()> {
//! let agent = Agent::new(AgentConfig::new("cymru"))?;
//! agent.set_handler(handler_fn(|_req, res| async move {
//!     res.send(200, ResponseOptions::default()).await?;
//!     Ok::<_, anyhow::Error>(Disposition::Handled)
//! }));
//! agent.register_verb("options")?;
//!
//! let mut events = agent.subscribe();
//! let _connector = agent.connect(ConnectConfig::new("127.0.0.1", 9022));
//! let (connection, hostport) = drachtio_agent::wait_for_connect(&mut events).await?;
//! println!("{} connected to {}", connection, hostport);
//! # Ok(())
//! # }
//! ```

pub(crate) mod inbound;
pub mod outbound;
pub mod request;
pub mod response;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use drachtio_wire::{CdrEvent, CdrFrame, Command, WireMessage, WireReply};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cdr::{CdrHandler, CdrRecord};
use crate::config::{AgentConfig, ConnectConfig, ListenConfig};
use crate::connection::client::{spawn_connector, ConnectorHandle};
use crate::connection::server::{bind_listener, ListenerHandle};
use crate::dispatch::RequestHandler;
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, ConnectOutcome, ConnectionId, ConnectionRole};
use crate::session::{Continuation, PeerSession};

pub(crate) struct AgentInner {
    config: AgentConfig,
    sessions: DashMap<ConnectionId, Arc<PeerSession>>,
    /// Add-only, in registration order
    verbs: Mutex<Vec<String>>,
    cdr_handlers: DashMap<CdrEvent, Arc<dyn CdrHandler>>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    params: DashMap<String, String>,
    events: broadcast::Sender<AgentEvent>,
}

/// Transports brought up by [`Agent::start`]
#[derive(Debug, Default)]
pub struct AgentHandles {
    pub connector: Option<ConnectorHandle>,
    pub listener: Option<ListenerHandle>,
}

/// Control-plane client for drachtio servers
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("label", &self.inner.config.label)
            .field("connections", &self.inner.sessions.len())
            .field("verbs", &*self.inner.verbs.lock())
            .finish()
    }
}

impl Agent {
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                sessions: DashMap::new(),
                verbs: Mutex::new(Vec::new()),
                cdr_handlers: DashMap::new(),
                handler: RwLock::new(None),
                params: DashMap::new(),
                events,
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Replace the handler for inbound requests
    pub fn set_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    pub fn set_param(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.params.insert(name.into(), value.into());
    }

    pub fn get_param(&self, name: &str) -> Option<String> {
        self.inner.params.get(name).map(|v| v.value().clone())
    }

    /// Dial a drachtio server, reconnecting when the connection drops
    pub fn connect(&self, config: ConnectConfig) -> ConnectorHandle {
        spawn_connector(self.clone(), config)
    }

    /// Accept connections from drachtio servers
    pub async fn listen(&self, config: ListenConfig) -> AgentResult<ListenerHandle> {
        bind_listener(self.clone(), config).await
    }

    /// Dial and listen as `[connect]` and `[listen]` in the configuration say
    pub async fn start(&self) -> AgentResult<AgentHandles> {
        let config = &self.inner.config;
        if config.connect.is_none() && config.listen.is_none() {
            return Err(AgentError::config("neither connect nor listen is configured"));
        }
        let listener = match config.listen.clone() {
            Some(listen) => Some(self.listen(listen).await?),
            None => None,
        };
        let connector = config.connect.clone().map(|connect| self.connect(connect));
        Ok(AgentHandles { connector, listener })
    }

    /// Ask the server to route requests with this method (or `cdr:*` event) to us
    pub fn register_verb(&self, verb: impl Into<String>) -> AgentResult<()> {
        let verb = verb.into();
        {
            let mut verbs = self.inner.verbs.lock();
            if verbs.iter().any(|v| v.eq_ignore_ascii_case(&verb)) {
                return Err(AgentError::DuplicateVerb { verb });
            }
            verbs.push(verb.clone());
        }

        for session in self.sessions() {
            if session.is_authenticated() {
                send_route(&session, &verb);
            }
        }
        Ok(())
    }

    pub fn verbs(&self) -> Vec<String> {
        self.inner.verbs.lock().clone()
    }

    /// Receive call detail records for one event type
    pub fn on_cdr(&self, event: CdrEvent, handler: impl CdrHandler + 'static) -> AgentResult<()> {
        self.inner.cdr_handlers.insert(event, Arc::new(handler));
        match self.register_verb(event.route_verb()) {
            // a replaced handler keeps the existing route
            Err(AgentError::DuplicateVerb { .. }) => Ok(()),
            other => other,
        }
    }

    /// Open connections, oldest first
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn is_ready(&self, connection: ConnectionId) -> bool {
        self.inner
            .sessions
            .get(&connection)
            .map(|s| s.is_ready())
            .unwrap_or(false)
    }

    /// The `host:port` the server reported when we authenticated
    pub fn hostport(&self, connection: ConnectionId) -> Option<String> {
        self.inner
            .sessions
            .get(&connection)
            .and_then(|s| s.tables().hostport.clone())
    }

    /// True when no connection has work outstanding
    pub fn is_idle(&self) -> bool {
        let mut outstanding = 0;
        for session in self.sessions() {
            let tables = session.tables();
            let count = tables.outstanding();
            if count > 0 {
                debug!(
                    connection = %session.id,
                    requests = ?tables.pending_requests.keys().collect::<Vec<_>>(),
                    transactions = ?tables.pending_sip_transactions.keys().collect::<Vec<_>>(),
                    acks = ?tables.pending_ack_or_prack.keys().collect::<Vec<_>>(),
                    "{} items pending",
                    count
                );
            }
            outstanding += count;
        }
        debug!("idle check: {}", outstanding);
        outstanding == 0
    }

    /// Close one connection; it is not reconnected
    pub fn disconnect(&self, connection: ConnectionId) -> AgentResult<()> {
        self.session(connection)?.close();
        Ok(())
    }

    pub(crate) fn session(&self, connection: ConnectionId) -> AgentResult<Arc<PeerSession>> {
        self.inner
            .sessions
            .get(&connection)
            .map(|s| s.value().clone())
            .ok_or(AgentError::ConnectionClosed)
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<PeerSession>> {
        let mut sessions: Vec<Arc<PeerSession>> = self.inner.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.inner.handler.read().clone()
    }

    /// Register a freshly opened connection and start authenticating
    pub(crate) fn open_session(&self, session: Arc<PeerSession>) {
        self.inner.sessions.insert(session.id, session.clone());
        info!(connection = %session.id, peer = %session.peer, role = ?session.role, "connection open");
        self.emit(AgentEvent::TransportOpen {
            connection: session.id,
            role: session.role,
            peer: session.peer,
        });

        let command = Command::Authenticate {
            secret: self.inner.config.secret.clone(),
            label: self.inner.config.label.clone(),
        };
        if let Err(e) = session.send(command, Some(Continuation::Authenticate)) {
            warn!(connection = %session.id, "failed to send authenticate: {}", e);
        }
    }

    /// Forget a closed connection and drop everything waiting on it
    pub(crate) fn close_session(&self, connection: ConnectionId) {
        if let Some((_, session)) = self.inner.sessions.remove(&connection) {
            let dropped = session.teardown();
            if dropped > 0 {
                debug!(connection = %connection, "dropped {} pending items", dropped);
            }
        }
        info!(connection = %connection, "connection closed");
        self.emit(AgentEvent::Closed { connection });
    }

    /// Process one frame body, in receive order
    pub(crate) fn handle_frame(&self, session: &Arc<PeerSession>, body: &str) {
        session.log_received(body);
        let message = match WireMessage::decode(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %session.id, "discarding frame: {}", e);
                self.emit(AgentEvent::Error {
                    connection: Some(session.id),
                    message: e.to_string(),
                });
                return;
            }
        };

        match message {
            WireMessage::Sip(frame) => inbound::handle_sip(self, session, frame),
            WireMessage::Response(reply) => self.handle_reply(session, reply),
            WireMessage::Cdr(frame) => self.handle_cdr(session, frame),
        }
    }

    fn handle_reply(&self, session: &Arc<PeerSession>, reply: WireReply) {
        let continuation = {
            let mut tables = session.tables();
            if reply.more_to_come {
                match tables.pending_requests.get(&reply.reply_to) {
                    Some(Continuation::Proxy { outcomes }) => Some(Continuation::Proxy {
                        outcomes: outcomes.clone(),
                    }),
                    _ => tables.pending_requests.remove(&reply.reply_to),
                }
            } else {
                tables.pending_requests.remove(&reply.reply_to)
            }
        };

        let Some(continuation) = continuation else {
            debug!(connection = %session.id, "no pending request for reply {}", reply.reply_to);
            return;
        };
        debug!(connection = %session.id, "{} reply for {} {}", continuation.kind(), reply.reply_to, if reply.is_ok() { "OK" } else { "failed" });
        if let Some(e) = &reply.payload_error {
            warn!(connection = %session.id, "reply {} carries an invalid SIP payload: {}", reply.reply_to, e);
            self.emit(AgentEvent::Error {
                connection: Some(session.id),
                message: e.to_string(),
            });
        }

        match continuation {
            Continuation::Authenticate => self.on_authenticate_reply(session, reply),
            Continuation::Request(pending) => outbound::complete_request(session, pending, reply),
            Continuation::Response(pending) => outbound::complete_response(session, pending, reply),
            Continuation::Ack { reply: waiter } => {
                let result = match outbound::reply_error(&reply) {
                    Some(error) => Err(error),
                    None => reply
                        .message
                        .ok_or_else(|| AgentError::request_failed("server did not echo the message")),
                };
                let _ = waiter.send(result);
            }
            Continuation::Proxy { outcomes } => {
                let _ = outcomes.send(outbound::ProxyOutcome::from(reply));
            }
        }
    }

    fn on_authenticate_reply(&self, session: &Arc<PeerSession>, reply: WireReply) {
        if !reply.is_ok() {
            let reason = reply.failure_reason();
            warn!(connection = %session.id, "failed to authenticate to server: {}", reason);
            self.emit(AgentEvent::Connect {
                connection: session.id,
                outcome: ConnectOutcome::Rejected { reason },
            });
            return;
        }

        let hostport = reply.hostport().unwrap_or_default().to_string();
        {
            let mut tables = session.tables();
            tables.authenticated = true;
            tables.ready = true;
            tables.hostport = Some(hostport.clone());
        }
        info!(connection = %session.id, "authenticated, hostport is {}", hostport);

        if session.role == ConnectionRole::OutboundClient {
            for verb in self.verbs() {
                send_route(session, &verb);
            }
        }

        // let the route commands reach the server before announcing the connection
        let agent = self.clone();
        let connection = session.id;
        let grace = self.inner.config.connect_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !agent.inner.sessions.contains_key(&connection) {
                debug!(connection = %connection, "closed during the connect grace period");
                return;
            }
            agent.emit(AgentEvent::Connect {
                connection,
                outcome: ConnectOutcome::Authenticated { hostport },
            });
        });
    }

    fn handle_cdr(&self, session: &Arc<PeerSession>, frame: CdrFrame) {
        let handler = self.inner.cdr_handlers.get(&frame.event).map(|h| h.value().clone());
        let Some(handler) = handler else {
            debug!(connection = %session.id, "no handler for cdr:{}", frame.event);
            return;
        };
        let record = CdrRecord::from_frame(session.id, frame);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.on_cdr(record)));
        if result.is_err() {
            warn!(connection = %session.id, "cdr handler panicked");
        }
    }
}

// fire-and-forget: the server's acknowledgement is not awaited
fn send_route(session: &PeerSession, verb: &str) {
    let command = Command::Route {
        verb: verb.to_string(),
    };
    if let Err(e) = session.send(command, None) {
        warn!(connection = %session.id, "failed to route {}: {}", verb, e);
    }
}
