//! Handing inbound requests to the application
//!
//! The application supplies one [`RequestHandler`]. Each request runs in its
//! own task; if the handler declines it, errors or panics, the request still
//! gets an answer:
//!
//! | Outcome | Response |
//! |---|---|
//! | `Disposition::Unhandled` or no handler | PRACK: 200, ACK: none, anything else: 404 |
//! | error or panic, no final response sent | 500 |

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use drachtio_sip_message::Method;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::agent::request::InboundRequest;
use crate::agent::response::{ResponseOptions, ServerResponse};

/// Whether a handler took care of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Let the agent apply its default response
    Unhandled,
}

/// Application logic for inbound requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: InboundRequest, response: ServerResponse) -> anyhow::Result<Disposition>;
}

/// Adapter turning an async closure into a [`RequestHandler`]
pub struct HandlerFn<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F, Fut>
where
    F: Fn(InboundRequest, ServerResponse) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Disposition>> + Send + 'static,
{
    async fn handle(&self, request: InboundRequest, response: ServerResponse) -> anyhow::Result<Disposition> {
        (self.f)(request, response).await
    }
}

/// Build a handler from an async closure
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(InboundRequest, ServerResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Disposition>> + Send + 'static,
{
    Arc::new(HandlerFn {
        f,
        _future: PhantomData,
    })
}

/// Status the agent sends for a request nobody handled
pub fn implicit_status(method: Option<&Method>) -> Option<u16> {
    match method {
        Some(Method::Ack) => None,
        Some(Method::Prack) => Some(200),
        _ => Some(404),
    }
}

/// Run the handler for one request in a new task
pub(crate) fn dispatch(handler: Option<Arc<dyn RequestHandler>>, request: InboundRequest, response: ServerResponse) {
    tokio::spawn(async move {
        let method = request.method().cloned();
        let outcome = match handler {
            Some(handler) => {
                AssertUnwindSafe(handler.handle(request, response.clone()))
                    .catch_unwind()
                    .await
            }
            None => Ok(Ok(Disposition::Unhandled)),
        };

        let status = match outcome {
            Ok(Ok(Disposition::Handled)) => None,
            Ok(Ok(Disposition::Unhandled)) => {
                if response.final_response_sent() {
                    None
                } else {
                    implicit_status(method.as_ref())
                }
            }
            Ok(Err(e)) => {
                warn!("request handler failed: {:#}", e);
                (!response.final_response_sent()).then_some(500)
            }
            Err(_) => {
                error!("request handler panicked");
                (!response.final_response_sent()).then_some(500)
            }
        };

        if let Some(status) = status {
            debug!("sending implicit {} for unhandled {:?}", status, method);
            if let Err(e) = response.send(status, ResponseOptions::default()).await {
                warn!("failed to send implicit {} response: {}", status, e);
            }
        }
    });
}
