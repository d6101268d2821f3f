//! Agent lifecycle events
//!
//! Connection level happenings are published on a `tokio::sync::broadcast`
//! channel; subscribe with [`crate::Agent::subscribe`]. Request scoped
//! outcomes travel on the request's own channel instead (see
//! [`crate::RequestEvent`]).

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{AgentError, AgentResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one TCP connection to a drachtio server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// We dialed the server
    OutboundClient,
    /// The server dialed our listener
    InboundAccepted,
}

/// Result of the authentication handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Authenticated { hostport: String },
    Rejected { reason: String },
}

/// Events published by an [`crate::Agent`]
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A dial attempt is starting
    Connecting { host: String, port: u16 },

    /// A TCP connection is open and its session exists
    TransportOpen {
        connection: ConnectionId,
        role: ConnectionRole,
        peer: SocketAddr,
    },

    /// The authentication handshake completed
    Connect {
        connection: ConnectionId,
        outcome: ConnectOutcome,
    },

    /// A listener is accepting connections
    Listening { local_addr: SocketAddr },

    /// A connection closed and its session was torn down
    Closed { connection: ConnectionId },

    /// A transport or protocol error
    Error {
        connection: Option<ConnectionId>,
        message: String,
    },

    /// A reconnect is scheduled after `delay`
    Reconnecting { delay: Duration, attempt: u32 },

    /// The connector gave up reconnecting
    ReconnectAbandoned { attempts: u32, waited: Duration },
}

/// Wait for the next `Connect` event on a subscription
///
/// Returns the connection and the server's host:port when authentication
/// succeeds, or `AuthenticationFailed` when the server rejects the secret.
pub async fn wait_for_connect(
    events: &mut broadcast::Receiver<AgentEvent>,
) -> AgentResult<(ConnectionId, String)> {
    loop {
        match events.recv().await {
            Ok(AgentEvent::Connect { connection, outcome }) => {
                return match outcome {
                    ConnectOutcome::Authenticated { hostport } => Ok((connection, hostport)),
                    ConnectOutcome::Rejected { reason } => Err(AgentError::AuthenticationFailed { reason }),
                };
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(AgentError::ConnectionClosed),
        }
    }
}
