//! Outbound commands
//!
//! Every command is sent as `<messageId>|<command>`, where the message id is
//! a fresh UUID v4 that the server echoes in its `response|` frame.

use drachtio_sip_message::SipMessage;
use uuid::Uuid;

use crate::CRLF;

/// Generate a fresh wire message id
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// How a proxied request fans out to its destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Forking {
    #[default]
    Serial,
    Simultaneous,
}

impl Forking {
    pub fn as_str(&self) -> &'static str {
        match self {
            Forking::Serial => "serial",
            Forking::Simultaneous => "simultaneous",
        }
    }
}

/// Parameters of a `proxy|` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCommand {
    pub transaction_id: String,
    pub remain_in_dialog: bool,
    pub full_response: bool,
    pub follow_redirects: bool,
    pub forking: Forking,
    /// e.g. `2s`; empty for the server default
    pub provisional_timeout: String,
    pub final_timeout: String,
    pub destinations: Vec<String>,
    pub message: SipMessage,
}

/// A command sent from a client to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Authenticate { secret: String, label: String },
    Route { verb: String },
    Sip {
        transaction_id: Option<String>,
        dialog_id: Option<String>,
        message: SipMessage,
    },
    Proxy(ProxyCommand),
}

fn flag(set: bool, name: &str) -> &str {
    if set {
        name
    } else {
        ""
    }
}

impl Command {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Authenticate { .. } => "authenticate",
            Command::Route { .. } => "route",
            Command::Sip { .. } => "sip",
            Command::Proxy(_) => "proxy",
        }
    }

    /// Encode the frame body for this command under the given message id
    pub fn encode(&self, message_id: &str) -> String {
        match self {
            Command::Authenticate { secret, label } => {
                format!("{}|authenticate|{}|{}", message_id, secret, label)
            }
            Command::Route { verb } => format!("{}|route|{}", message_id, verb),
            Command::Sip {
                transaction_id,
                dialog_id,
                message,
            } => format!(
                "{}|sip|{}|{}{}{}",
                message_id,
                transaction_id.as_deref().unwrap_or(""),
                dialog_id.as_deref().unwrap_or(""),
                CRLF,
                message
            ),
            Command::Proxy(proxy) => format!(
                "{}|proxy|{}|{}|{}|{}|{}|{}|{}|{}{}{}",
                message_id,
                proxy.transaction_id,
                flag(proxy.remain_in_dialog, "remainInDialog"),
                flag(proxy.full_response, "fullResponse"),
                flag(proxy.follow_redirects, "followRedirects"),
                proxy.forking.as_str(),
                proxy.provisional_timeout,
                proxy.final_timeout,
                proxy.destinations.join("|"),
                CRLF,
                proxy.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drachtio_sip_message::Method;

    #[test]
    fn test_message_ids_are_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_encode_authenticate_and_route() {
        let auth = Command::Authenticate {
            secret: "s3cr3t".into(),
            label: "default".into(),
        };
        assert_eq!(auth.encode("id1"), "id1|authenticate|s3cr3t|default");

        let route = Command::Route { verb: "invite".into() };
        assert_eq!(route.encode("id2"), "id2|route|invite");
    }

    #[test]
    fn test_encode_sip_with_empty_ids() {
        let message = SipMessage::request(Method::Options, "sip:x@y");
        let cmd = Command::Sip {
            transaction_id: None,
            dialog_id: Some("dlg".into()),
            message: message.clone(),
        };
        let body = cmd.encode("id3");
        assert_eq!(body, format!("id3|sip||dlg\r\n{}", message));
    }

    #[test]
    fn test_encode_proxy() {
        let message = SipMessage::request(Method::Invite, "sip:a@1.1.1.1");
        let cmd = Command::Proxy(ProxyCommand {
            transaction_id: "txn".into(),
            remain_in_dialog: true,
            full_response: false,
            follow_redirects: true,
            forking: Forking::Simultaneous,
            provisional_timeout: "2s".into(),
            final_timeout: String::new(),
            destinations: vec!["sip:a@1.1.1.1".into(), "sip:b@2.2.2.2".into()],
            message,
        });
        let body = cmd.encode("id4");
        let leader = body.split(CRLF).next().unwrap();
        assert_eq!(
            leader,
            "id4|proxy|txn|remainInDialog||followRedirects|simultaneous|2s||sip:a@1.1.1.1|sip:b@2.2.2.2"
        );
        assert_eq!(cmd.name(), "proxy");
    }
}
