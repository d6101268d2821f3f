//! Outbound role: dial a server and keep the connection up

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::ConnectConfig;
use crate::connection::reconnect::ReconnectState;
use crate::connection::{run_connection, CloseReason};
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, ConnectionRole};

/// Handle to a running connector
///
/// Dropping the handle leaves the connector running.
#[derive(Debug)]
pub struct ConnectorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectorHandle {
    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    /// True once the connector stopped for good
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the connector to stop
    pub async fn join(self) -> AgentResult<()> {
        self.task
            .await
            .map_err(|e| AgentError::transport(format!("connector task failed: {}", e)))
    }
}

pub(crate) fn spawn_connector(agent: Agent, config: ConnectConfig) -> ConnectorHandle {
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_connector(agent, config, shutdown.clone()));
    ConnectorHandle { shutdown, task }
}

async fn run_connector(agent: Agent, config: ConnectConfig, shutdown: CancellationToken) {
    let mut backoff = ReconnectState::new(config.reconnect.clone());
    let address = config.address();

    loop {
        debug!("connecting to {}", address);
        agent.emit(AgentEvent::Connecting {
            host: config.host.clone(),
            port: config.port,
        });

        let dialed = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = TcpStream::connect(&address) => result,
        };

        match dialed {
            Ok(stream) => {
                backoff.reset();
                let reason =
                    run_connection(agent.clone(), stream, ConnectionRole::OutboundClient, shutdown.clone()).await;
                if reason == CloseReason::Local || shutdown.is_cancelled() {
                    info!("connection to {} closed locally, not reconnecting", address);
                    return;
                }
            }
            Err(e) => {
                warn!("failed to connect to {}: {}", address, e);
                agent.emit(AgentEvent::Error {
                    connection: None,
                    message: format!("failed to connect to {}: {}", address, e),
                });
            }
        }

        let Some((delay, attempt)) = backoff.next_delay() else {
            abandon(&agent, &address, &backoff);
            return;
        };
        info!("reconnecting to {} in {:?} (attempt {})", address, delay, attempt);
        agent.emit(AgentEvent::Reconnecting { delay, attempt });

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !backoff.record_wait(delay) {
            abandon(&agent, &address, &backoff);
            return;
        }
    }
}

fn abandon(agent: &Agent, address: &str, backoff: &ReconnectState) {
    let waited: Duration = backoff.total_waited();
    warn!(
        "giving up on {} after {} attempts and {:?}",
        address,
        backoff.attempts(),
        waited
    );
    agent.emit(AgentEvent::ReconnectAbandoned {
        attempts: backoff.attempts(),
        waited,
    });
}
