//! Control-plane client for drachtio SIP servers
//!
//! A drachtio server owns the SIP stack; applications steer it over a TCP
//! connection carrying length-prefixed text frames. This crate is the
//! application side of that connection. It authenticates, asks the server to
//! route SIP methods to it, originates requests, answers inbound requests and
//! correlates every server reply with the operation waiting on it.
//!
//! # Key Components
//!
//! - [`Agent`] - owns connections and dispatches traffic
//! - [`AgentConfig`] - secret, label and connection policy, loadable from TOML
//! - [`RequestHandler`] - application logic for inbound requests
//! - [`OutboundRequest`] - a request this agent originated and its responses
//! - [`DigestAuth`] - credentials for answering 401/407 challenges once
//! - [`AgentEvent`] - connection lifecycle notifications
//!
//! # Example
//!
//! ```rust,no_run
//! use drachtio_agent::{
//!     Agent, AgentConfig, ConnectConfig, Method, RequestOptions, setup_logging, LoggingConfig,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! setup_logging(LoggingConfig::default())?;
//!
//! let agent = Agent::new(AgentConfig::new("cymru"))?;
//! let mut events = agent.subscribe();
//! let _connector = agent.connect(ConnectConfig::new("127.0.0.1", 9022));
//! drachtio_agent::wait_for_connect(&mut events).await?;
//!
//! let mut request = agent
//!     .send_request(None, RequestOptions::new(Method::Options, "sip:alice@example.com"))
//!     .await?;
//! let (response, _) = request.final_response().await?;
//! println!("OPTIONS answered with {}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cdr;
pub mod config;
pub mod connection;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
mod session;

// Re-export commonly used types
pub use agent::outbound::{ProxyOptions, ProxyOutcome};
pub use agent::request::{
    AckKind, AckOptions, Acknowledger, InboundRequest, OutboundRequest, ReceivedResponse, RequestEvent,
    RequestOptions, SentRequest,
};
pub use agent::response::{AckReceiver, ResponseOptions, ServerResponse};
pub use agent::{Agent, AgentHandles};
pub use cdr::{CdrHandler, CdrRecord};
pub use config::{AgentConfig, ConnectConfig, DefaultConnection, ListenConfig, ReconnectConfig, DEFAULT_PORT};
pub use connection::client::ConnectorHandle;
pub use connection::server::ListenerHandle;
pub use connection::CloseReason;
pub use digest::{CredentialResolver, Credentials, DigestAuth, DigestChallenge, DigestState};
pub use dispatch::{handler_fn, Disposition, RequestHandler};
pub use error::{AgentError, AgentResult};
pub use events::{wait_for_connect, AgentEvent, ConnectOutcome, ConnectionId, ConnectionRole};
pub use logging::{setup_logging, LoggingConfig};

pub use drachtio_sip_message::{Method, SipMessage};
pub use drachtio_wire::{CdrEvent, Forking, MessageMeta};
