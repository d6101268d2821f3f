//! Call detail records
//!
//! The server only pushes CDR frames for events a client routed
//! (`route|cdr:start` etc.), so registering a handler also routes the verb.

use drachtio_sip_message::SipMessage;
use drachtio_wire::{CdrEvent, CdrFrame};

use crate::events::ConnectionId;

/// One call detail record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdrRecord {
    pub connection: ConnectionId,
    pub event: CdrEvent,
    pub source: String,
    pub time: String,
    /// Leg role on `start` and `stop`
    pub role: Option<String>,
    pub message: SipMessage,
}

impl CdrRecord {
    pub(crate) fn from_frame(connection: ConnectionId, frame: CdrFrame) -> Self {
        Self {
            connection,
            event: frame.event,
            source: frame.source,
            time: frame.time,
            role: frame.role,
            message: frame.message,
        }
    }
}

/// Receives call detail records
///
/// Called on the connection's reader, so implementations should hand
/// slow work off to a task.
pub trait CdrHandler: Send + Sync {
    fn on_cdr(&self, record: CdrRecord);
}

impl<F> CdrHandler for F
where
    F: Fn(CdrRecord) + Send + Sync,
{
    fn on_cdr(&self, record: CdrRecord) {
        self(record)
    }
}
