//! Digest authentication for challenged requests
//!
//! When a request that carries credentials is answered with 401 or 407, the
//! agent answers the challenge once: it computes an MD5 digest, adds
//! `Authorization` or `Proxy-Authorization`, keeps the Call-ID and From of
//! the original request, bumps the CSeq and sends the request again. Events
//! of the new transaction flow into the original request's event channel.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use drachtio_sip_message::SipMessage;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::agent::request::{Acknowledger, ReceivedResponse, RequestEvent};
use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::events::ConnectionId;
use crate::session::PendingTransaction;

/// Username and password for one challenge
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Looks up credentials when a challenge arrives
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// `None` declines the challenge
    async fn resolve(&self, request: &SipMessage, challenge: &SipMessage) -> Option<Credentials>;
}

/// Credentials attached to an outbound request
#[derive(Clone)]
pub enum DigestAuth {
    Static { username: String, password: String },
    Resolver(Arc<dyn CredentialResolver>),
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        DigestAuth::Static {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn resolver(resolver: impl CredentialResolver + 'static) -> Self {
        DigestAuth::Resolver(Arc::new(resolver))
    }

    async fn credentials(&self, request: &SipMessage, challenge: &SipMessage) -> Option<Credentials> {
        match self {
            DigestAuth::Static { username, password } => Some(Credentials::new(username.as_str(), password.as_str())),
            DigestAuth::Resolver(resolver) => resolver.resolve(request, challenge).await,
        }
    }
}

impl fmt::Debug for DigestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAuth::Static { username, .. } => f
                .debug_struct("Static")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            DigestAuth::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Progress of one challenge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestState {
    #[default]
    Idle,
    ChallengeReceived,
    Retrying,
    Completed,
    Failed,
}

/// Digest progress shared by a request and the transactions sent for it
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedDigestState(Arc<Mutex<DigestState>>);

impl SharedDigestState {
    pub(crate) fn get(&self) -> DigestState {
        *self.0.lock()
    }

    pub(crate) fn set(&self, state: DigestState) {
        *self.0.lock() = state;
    }
}

/// Parameters of a `WWW-Authenticate` or `Proxy-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header_value: &str) -> Option<Self> {
        let trimmed = header_value.trim();
        match trimmed.get(..7) {
            Some(scheme) if scheme.eq_ignore_ascii_case("digest ") => {}
            _ => return None,
        }

        let mut realm = None;
        let mut nonce = None;
        let mut algorithm = None;
        let mut qop = None;
        let mut opaque = None;
        for part in split_params(&trimmed[7..]) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "algorithm" => algorithm = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            algorithm,
            qop,
            opaque,
        })
    }

    /// Build the credentials header value
    ///
    /// `cnonce` is generated when `None` and the challenge offers `qop=auth`.
    pub fn authorization(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        cnonce: Option<&str>,
    ) -> AgentResult<String> {
        if let Some(algorithm) = self.algorithm.as_deref() {
            if !algorithm.eq_ignore_ascii_case("MD5") {
                return Err(AgentError::digest(format!("unsupported algorithm {}", algorithm)));
            }
        }

        let ha1 = md5_hex(&format!("{}:{}:{}", credentials.username, self.realm, credentials.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let mut params = vec![
            format!("username=\"{}\"", credentials.username),
            format!("realm=\"{}\"", self.realm),
            format!("nonce=\"{}\"", self.nonce),
            format!("uri=\"{}\"", uri),
        ];

        match self.qop.as_deref().and_then(select_qop) {
            Some(qop) => {
                let cnonce = cnonce
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:x}", rand::thread_rng().gen::<u64>()));
                let nc = format!("{:08x}", 1);
                let response = md5_hex(&format!(
                    "{}:{}:{}:{}:{}:{}",
                    ha1, self.nonce, nc, cnonce, qop, ha2
                ));
                params.push(format!("response=\"{}\"", response));
                params.push(format!("qop={}", qop));
                params.push(format!("nc={}", nc));
                params.push(format!("cnonce=\"{}\"", cnonce));
            }
            None => {
                let response = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2));
                params.push(format!("response=\"{}\"", response));
            }
        }

        if let Some(opaque) = &self.opaque {
            params.push(format!("opaque=\"{}\"", opaque));
        }
        if let Some(algorithm) = &self.algorithm {
            params.push(format!("algorithm={}", algorithm));
        }
        Ok(format!("Digest {}", params.join(", ")))
    }
}

fn select_qop(raw: &str) -> Option<&'static str> {
    raw.split(',')
        .map(str::trim)
        .find(|token| token.eq_ignore_ascii_case("auth"))
        .map(|_| "auth")
}

fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < input.len() {
        parts.push(input[start..].trim());
    }
    parts
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Header names for a challenge status: (challenge header, credentials header)
fn header_names(status: u16) -> (&'static str, &'static str) {
    if status == 407 {
        ("Proxy-Authenticate", "Proxy-Authorization")
    } else {
        ("WWW-Authenticate", "Authorization")
    }
}

/// Answer a challenge for `pending` and send the request again
///
/// The call-id must already be marked in `pending_sip_auth_retries`. The
/// state reaches `Completed` once the server confirms the resent request. On
/// failure the mark is cleared again and the original request sees
/// `AuthenticationFailed` followed by the challenge itself.
pub(crate) async fn retry(
    agent: Agent,
    connection: ConnectionId,
    pending: PendingTransaction,
    challenge: ReceivedResponse,
    ack: Option<Acknowledger>,
) {
    pending.digest.set(DigestState::ChallengeReceived);
    debug!(call_id = ?challenge.message.call_id(), "digest challenge {}", challenge.status());

    let options = match build_retry(&pending, &challenge).await {
        Ok(options) => options,
        Err(e) => {
            warn!("cannot answer digest challenge: {}", e);
            fail(&agent, connection, &pending, e.to_string(), challenge, ack);
            return;
        }
    };

    pending.digest.set(DigestState::Retrying);
    debug!("resending request with digest credentials");
    match agent
        .send_auth_retry(
            connection,
            options,
            pending.events.clone(),
            pending.digest.clone(),
            challenge.clone(),
            ack.clone(),
        )
        .await
    {
        Ok(()) => info!("resent request with digest credentials"),
        Err(e) => {
            warn!("failed to resend request with credentials: {}", e);
            fail(&agent, connection, &pending, e.to_string(), challenge, ack);
        }
    }
}

fn fail(
    agent: &Agent,
    connection: ConnectionId,
    pending: &PendingTransaction,
    reason: String,
    challenge: ReceivedResponse,
    ack: Option<Acknowledger>,
) {
    pending.digest.set(DigestState::Failed);
    // a later challenge on the same call-id, such as a REGISTER refresh, gets its own retry
    if let (Ok(session), Some(call_id)) = (agent.session(connection), challenge.message.call_id()) {
        session.tables().pending_sip_auth_retries.remove(call_id);
    }
    let _ = pending.events.send(RequestEvent::AuthenticationFailed { reason });
    let _ = pending.events.send(RequestEvent::Response {
        response: challenge,
        ack,
    });
}

async fn build_retry(
    pending: &PendingTransaction,
    challenge: &ReceivedResponse,
) -> AgentResult<crate::agent::request::RequestOptions> {
    let auth = pending
        .options
        .auth
        .as_ref()
        .ok_or_else(|| AgentError::digest("request has no credentials"))?;
    let request = &pending.request.message;
    let status = challenge.status();
    let (challenge_header, credentials_header) = header_names(status);

    let parsed = challenge
        .message
        .get(challenge_header)
        .and_then(DigestChallenge::parse)
        .ok_or_else(|| AgentError::digest(format!("missing or invalid {} header", challenge_header)))?;
    let credentials = auth
        .credentials(request, &challenge.message)
        .await
        .ok_or_else(|| AgentError::digest("no credentials for challenge"))?;

    let method = request
        .method()
        .cloned()
        .unwrap_or_else(|| pending.options.method.clone());
    let uri = request
        .uri()
        .map(str::to_string)
        .or_else(|| pending.options.uri.clone())
        .ok_or_else(|| AgentError::digest("request has no uri"))?;
    let authorization = parsed.authorization(&credentials, method.as_str(), &uri, None)?;

    let mut options = pending.options.clone();
    options.auth = None;
    options.uri = Some(uri);
    if let Some(call_id) = request.call_id() {
        options.headers.push(("Call-ID".to_string(), call_id.to_string()));
    }
    if let Some(from) = request.get("From") {
        options.headers.push(("From".to_string(), from.to_string()));
    }
    if let Some(cseq) = request.cseq() {
        options
            .headers
            .push(("CSeq".to_string(), format!("{} {}", cseq.seq + 1, cseq.method)));
    }
    options
        .headers
        .push((credentials_header.to_string(), authorization));
    Ok(options)
}
