//! TCP connections to drachtio servers
//!
//! Both roles share [`run_connection`]: one task writes queued frames, the
//! calling task reads frames and hands each body to the agent in receive
//! order. The roles differ only in who opens the socket.
//!
//! # Key Components
//!
//! - [`client`] - dials a server and reconnects with backoff
//! - [`server`] - accepts connections from servers
//! - [`reconnect`] - backoff bookkeeping for the client role

pub mod client;
pub mod reconnect;
pub mod server;

use std::sync::Arc;

use drachtio_wire::FrameCodec;
use futures::{SinkExt, StreamExt};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::events::{AgentEvent, ConnectionId, ConnectionRole};
use crate::session::PeerSession;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// We closed it
    Local,
    /// The server closed it
    Remote,
    /// The socket failed or the server broke framing
    Error,
}

/// Drive one connection until it closes
///
/// The session is registered with the agent for the whole lifetime of the
/// connection and torn down before this returns. Cancelling `shutdown` or
/// closing the session ends the connection locally.
pub(crate) async fn run_connection(
    agent: Agent,
    stream: TcpStream,
    role: ConnectionRole,
    shutdown: CancellationToken,
) -> CloseReason {
    let id = ConnectionId::next();
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            warn!(connection = %id, "connection lost before it was registered: {}", e);
            agent.emit(AgentEvent::Error {
                connection: None,
                message: e.to_string(),
            });
            return CloseReason::Error;
        }
    };

    if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
        warn!(connection = %id, "failed to enable keepalive: {}", e);
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!(connection = %id, "failed to set nodelay: {}", e);
    }

    let (read_half, write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
    let token = shutdown.child_token();
    let write_failed = CancellationToken::new();

    let writer_token = token.clone();
    let writer_failed = write_failed.clone();
    let writer_agent = agent.clone();
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, FrameCodec::new());
        loop {
            tokio::select! {
                _ = writer_token.cancelled() => break,
                body = writer_rx.recv() => match body {
                    Some(body) => {
                        if let Err(e) = sink.send(body).await {
                            warn!(connection = %id, "write failed: {}", e);
                            writer_agent.emit(AgentEvent::Error {
                                connection: Some(id),
                                message: e.to_string(),
                            });
                            writer_failed.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        // flushes and shuts down the write half
        let _ = sink.close().await;
    });

    let session = Arc::new(PeerSession::new(
        id,
        role,
        peer,
        writer_tx,
        token.clone(),
        agent.config().log_wire,
    ));
    agent.open_session(session.clone());

    let mut frames = FramedRead::new(read_half, FrameCodec::with_max_frame_length(agent.config().max_frame_length));
    let reason = loop {
        tokio::select! {
            _ = token.cancelled() => break CloseReason::Local,
            _ = write_failed.cancelled() => break CloseReason::Error,
            frame = frames.next() => match frame {
                Some(Ok(body)) => agent.handle_frame(&session, &body),
                Some(Err(e)) => {
                    warn!(connection = %id, "closing connection: {}", e);
                    agent.emit(AgentEvent::Error {
                        connection: Some(id),
                        message: e.to_string(),
                    });
                    break CloseReason::Error;
                }
                None => {
                    info!(connection = %id, "server closed the connection");
                    break CloseReason::Remote;
                }
            },
        }
    };

    token.cancel();
    if writer.await.is_err() {
        warn!(connection = %id, "writer task panicked");
    }
    agent.close_session(id);
    reason
}
