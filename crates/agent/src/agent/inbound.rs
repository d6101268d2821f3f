//! Classification of `sip|` frames

use std::sync::Arc;

use drachtio_sip_message::Method;
use drachtio_wire::SipFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::request::{Acknowledger, InboundRequest, ReceivedResponse, RequestEvent};
use crate::agent::response::ServerResponse;
use crate::agent::Agent;
use crate::digest;
use crate::dispatch;
use crate::session::PeerSession;

pub(crate) fn handle_sip(agent: &Agent, session: &Arc<PeerSession>, frame: SipFrame) {
    let SipFrame { message, meta, .. } = frame;
    if !meta.is_network() {
        debug!(connection = %session.id, "ignoring sip message with source {}", meta.source);
        return;
    }

    if message.is_response() {
        handle_response(agent, session, ReceivedResponse { message, meta });
        return;
    }

    let method = message.method().cloned().unwrap_or(Method::Other(String::new()));
    let call_id = message.call_id().unwrap_or_default().to_string();
    let cancelled = CancellationToken::new();

    {
        let mut tables = session.tables();
        match method {
            Method::Cancel => {
                if let Some(invite) = tables.pending_inbound_invites.remove(&call_id) {
                    invite.cancel.cancel();
                    info!(
                        connection = %session.id,
                        "INVITE with call-id {} cancelled, {} invites still in progress",
                        call_id,
                        tables.pending_inbound_invites.len()
                    );
                    return;
                }
            }
            Method::Invite => {
                tables.track_invite(&call_id, cancelled.clone(), agent.config().inbound_invite_ttl());
                debug!(
                    connection = %session.id,
                    "tracking INVITE with call-id {}, {} invites in progress",
                    call_id,
                    tables.pending_inbound_invites.len()
                );
            }
            Method::Ack | Method::Prack => {
                if let Some(notifier) = tables.pending_ack_or_prack.remove(&meta.dialog_id) {
                    let _ = notifier.send(message.clone());
                    if method == Method::Ack {
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    let response = ServerResponse::new(
        agent.clone(),
        session.id,
        method,
        call_id,
        meta.transaction_id.clone(),
    );
    let request = InboundRequest {
        message,
        meta,
        connection: session.id,
        cancelled,
    };
    dispatch::dispatch(agent.handler(), request, response);
}

fn handle_response(agent: &Agent, session: &Arc<PeerSession>, response: ReceivedResponse) {
    let transaction_id = response.meta.transaction_id.clone();
    let status = response.status();
    let call_id = response.message.call_id().unwrap_or_default().to_string();

    let mut tables = session.tables();
    let pending = if response.is_final() {
        tables.pending_sip_transactions.remove(&transaction_id)
    } else {
        tables.pending_sip_transactions.get(&transaction_id).cloned()
    };
    let Some(pending) = pending else {
        debug!(connection = %session.id, "response {} for unknown transaction {}", status, transaction_id);
        return;
    };

    let ack = Acknowledger::for_response(
        agent,
        session.id,
        &pending.request.message,
        &response.message,
        &response.meta.dialog_id,
    );

    if tables.pending_sip_auth_retries.remove(&call_id) {
        debug!("response {} follows a digest retry for call-id {}", status, call_id);
    } else if (status == 401 || status == 407) && pending.options.auth.is_some() {
        tables.pending_sip_auth_retries.insert(call_id);
        drop(tables);
        tokio::spawn(digest::retry(agent.clone(), session.id, pending, response, ack));
        return;
    }
    drop(tables);

    let _ = pending.events.send(RequestEvent::Response { response, ack });
}
