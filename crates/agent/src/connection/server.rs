//! Inbound role: accept connections opened by drachtio servers

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::ListenConfig;
use crate::connection::run_connection;
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, ConnectionRole};

const LISTEN_BACKLOG: i32 = 128;

/// Handle to a running listener
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every connection accepted so far
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub async fn join(self) -> AgentResult<()> {
        self.task
            .await
            .map_err(|e| AgentError::transport(format!("listener task failed: {}", e)))
    }
}

pub(crate) async fn bind_listener(agent: Agent, config: ListenConfig) -> AgentResult<ListenerHandle> {
    let address = tokio::net::lookup_host(config.address())
        .await?
        .next()
        .ok_or_else(|| AgentError::config(format!("cannot resolve listen address {}", config.address())))?;
    let listener = bind(address)?;
    let local_addr = listener.local_addr()?;

    info!("listening for drachtio servers on {}", local_addr);
    agent.emit(AgentEvent::Listening { local_addr });

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(accept_loop(agent, listener, shutdown.clone()));
    Ok(ListenerHandle {
        local_addr,
        shutdown,
        task,
    })
}

fn bind(address: SocketAddr) -> AgentResult<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener)?)
}

async fn accept_loop(agent: Agent, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to accept connection: {}", e);
                continue;
            }
        };

        debug!("accepted connection from {}", remote_addr);
        let agent = agent.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            let reason = run_connection(agent, stream, ConnectionRole::InboundAccepted, token).await;
            debug!("connection from {} ended: {:?}", remote_addr, reason);
        });
    }
    info!("listener stopped");
}
