//! A scripted drachtio server for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use drachtio_agent::{AgentConfig, AgentEvent};
use drachtio_wire::FrameCodec;

pub const SECRET: &str = "s3cr3t";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn config() -> AgentConfig {
    AgentConfig::new(SECRET).with_connect_grace(Duration::from_millis(10))
}

pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("no connection from the agent")
            .unwrap();
        Peer::new(stream)
    }
}

/// A command received from the agent
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: String,
    pub tag: String,
    pub fields: Vec<String>,
    pub payload: Option<String>,
}

impl Frame {
    pub fn parse(body: &str) -> Self {
        let (leader, payload) = match body.split_once("\r\n") {
            Some((leader, payload)) => (leader, Some(payload.to_string())),
            None => (body, None),
        };
        let mut tokens = leader.split('|').map(str::to_string);
        Self {
            id: tokens.next().unwrap(),
            tag: tokens.next().unwrap_or_default(),
            fields: tokens.collect(),
            payload,
        }
    }

    pub fn payload(&self) -> &str {
        self.payload.as_deref().expect("frame without payload")
    }
}

/// One connection, seen from the server side
pub struct Peer {
    framed: Framed<TcpStream, FrameCodec>,
    next_id: u32,
}

impl Peer {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            next_id: 0,
        }
    }

    pub async fn connect(addr: SocketAddr) -> Self {
        Self::new(TcpStream::connect(addr).await.unwrap())
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }

    pub async fn recv(&mut self) -> Frame {
        let body = tokio::time::timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        Frame::parse(&body)
    }

    /// Next frame, or `None` once the agent closed the connection
    pub async fn try_recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for the connection")
            .map(|body| Frame::parse(&body.unwrap()))
    }

    pub async fn expect(&mut self, tag: &str) -> Frame {
        let frame = self.recv().await;
        assert_eq!(frame.tag, tag, "unexpected frame {:?}", frame);
        frame
    }

    /// Assert nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(body)) = tokio::time::timeout(Duration::from_millis(200), self.framed.next()).await {
            panic!("unexpected frame {:?}", body);
        }
    }

    pub async fn send(&mut self, body: String) {
        self.framed.send(body).await.unwrap();
    }

    pub async fn reply_ok(&mut self, to: &Frame, fields: &str) {
        let id = self.id();
        self.send(format!("{}|response|{}|OK|{}", id, to.id, fields)).await;
    }

    pub async fn reply_failed(&mut self, to: &Frame, reason: &str) {
        let id = self.id();
        self.send(format!("{}|response|{}|NOK|{}", id, to.id, reason)).await;
    }

    /// Reply to a `sip|` command, echoing the message it carried
    pub async fn reply_sent(&mut self, to: &Frame, txn: &str, dialog: &str) {
        let id = self.id();
        let message = to.payload().to_string();
        self.send(format!(
            "{}|response|{}|OK|application|{}|udp|127.0.0.1|5060|12:00:00.000|{}|{}\r\n{}",
            id,
            to.id,
            message.len(),
            txn,
            dialog,
            message
        ))
        .await;
    }

    /// Push a SIP message that arrived from the network
    pub async fn push_sip(&mut self, txn: &str, dialog: &str, message: &str) {
        let id = self.id();
        self.send(format!(
            "{}|sip|network|{}|udp|10.0.0.1|5060|12:00:00.000|{}|{}\r\n{}",
            id,
            message.len(),
            txn,
            dialog,
            message
        ))
        .await;
    }

    /// Answer the authenticate command
    pub async fn handshake(&mut self, hostport: &str) -> Frame {
        let frame = self.expect("authenticate").await;
        assert_eq!(frame.fields, vec![SECRET.to_string(), "default".to_string()]);
        self.reply_ok(&frame, hostport).await;
        frame
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(events: &mut broadcast::Receiver<AgentEvent>, mut pred: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}

pub fn invite(call_id: &str) -> String {
    format!(
        "INVITE sip:bob@example.com SIP/2.0\r\n\
         Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK-{call_id}\r\n\
         From: <sip:alice@example.com>;tag=a1\r\n\
         To: <sip:bob@example.com>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 INVITE\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

pub fn request(method: &str, call_id: &str) -> String {
    format!(
        "{method} sip:bob@example.com SIP/2.0\r\n\
         From: <sip:alice@example.com>;tag=a1\r\n\
         To: <sip:bob@example.com>;tag=b1\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 2 {method}\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

pub fn response(status: u16, reason: &str, call_id: &str, cseq: &str, extra: &str) -> String {
    format!(
        "SIP/2.0 {status} {reason}\r\n\
         From: <sip:alice@example.com>;tag=a1\r\n\
         To: <sip:bob@example.com>;tag=b1\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: {cseq}\r\n\
         {extra}\
         Content-Length: 0\r\n\r\n"
    )
}
