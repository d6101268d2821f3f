//! Originating requests through a scripted server

mod common;

use std::time::Duration;

use drachtio_agent::{
    wait_for_connect, AckOptions, Agent, AgentError, AgentEvent, ConnectConfig, ConnectionId, DefaultConnection,
    DigestAuth, DigestState, Method, OutboundRequest, RequestEvent, RequestOptions, SipMessage,
};

use common::{config, response, wait_for, FakeServer, Peer};

async fn connected(agent: &Agent) -> (Peer, ConnectionId) {
    let server = FakeServer::bind().await;
    let mut events = agent.subscribe();
    let _connector = agent.connect(ConnectConfig::new("127.0.0.1", server.port()));
    let mut peer = server.accept().await;
    peer.handshake("host:5060").await;
    let (connection, _) = wait_for_connect(&mut events).await.unwrap();
    (peer, connection)
}

fn invite_options() -> RequestOptions {
    RequestOptions::new(Method::Invite, "sip:bob@example.com")
        .with_header("Call-ID", "call-1")
        .with_header("From", "<sip:alice@example.com>;tag=a1")
        .with_header("CSeq", "1 INVITE")
}

#[tokio::test]
async fn test_request_and_final_response() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, connection) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .send_request(
                    None,
                    RequestOptions::new(Method::Options, "sip:bob@example.com").with_header("Call-ID", "opt-1"),
                )
                .await
        }
    });

    let frame = peer.expect("sip").await;
    assert_eq!(frame.fields, vec![String::new(), String::new()]);
    let sent = SipMessage::parse(frame.payload()).unwrap();
    assert_eq!(sent.method(), Some(&Method::Options));
    assert_eq!(sent.uri(), Some("sip:bob@example.com"));
    peer.reply_sent(&frame, "txn-1", "").await;

    let mut request = sending.await.unwrap().unwrap();
    assert_eq!(request.connection(), connection);
    assert_eq!(request.request().transaction_id(), "txn-1");
    assert!(!agent.is_idle());

    peer.push_sip("txn-1", "", &response(100, "Trying", "opt-1", "1 OPTIONS", ""))
        .await;
    peer.push_sip("txn-1", "", &response(200, "OK", "opt-1", "1 OPTIONS", ""))
        .await;

    match request.next_event().await {
        Some(RequestEvent::Response { response, ack }) => {
            assert_eq!(response.status(), 100);
            assert!(ack.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
    let (response, ack) = request.final_response().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(ack.is_none());
    assert!(agent.is_idle());
}

#[tokio::test]
async fn test_server_refuses_request() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .send_request(None, RequestOptions::new(Method::Message, "sip:nobody@invalid"))
                .await
        }
    });
    let frame = peer.expect("sip").await;
    peer.reply_failed(&frame, "no route to destination").await;

    match sending.await.unwrap() {
        Err(AgentError::RequestFailed { reason }) => assert_eq!(reason, "no route to destination"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(agent.is_idle());
}

#[tokio::test]
async fn test_unreadable_echo_fails_the_request() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, connection) = connected(&agent).await;
    let mut events = agent.subscribe();

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .send_request(None, RequestOptions::new(Method::Options, "sip:bob@example.com"))
                .await
        }
    });
    let frame = peer.expect("sip").await;
    peer.send(format!(
        "x9|response|{}|OK|application|7|udp|127.0.0.1|5060|now|txn-1|\r\ngarbage\r\n\r\n",
        frame.id
    ))
    .await;

    let result = tokio::time::timeout(Duration::from_secs(2), sending)
        .await
        .expect("request never resolved")
        .unwrap();
    assert!(matches!(result, Err(AgentError::Sip(_))));
    assert!(agent.is_idle());
    match wait_for(&mut events, |e| matches!(e, AgentEvent::Error { .. })).await {
        AgentEvent::Error { connection: id, .. } => assert_eq!(id, Some(connection)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(agent.is_ready(connection));
}

#[tokio::test]
async fn test_connection_selection() {
    let agent = Agent::new(config()).unwrap();
    let result = agent
        .send_request(None, RequestOptions::new(Method::Options, "sip:bob@example.com"))
        .await;
    assert!(matches!(result, Err(AgentError::NoConnection { .. })));

    let (_first, _) = connected(&agent).await;
    let (_second, _) = connected(&agent).await;
    let result = agent
        .send_request(None, RequestOptions::new(Method::Options, "sip:bob@example.com"))
        .await;
    assert!(matches!(result, Err(AgentError::AmbiguousConnection { count: 2 })));

    let disabled = Agent::new(config().with_default_connection(DefaultConnection::Disabled)).unwrap();
    let (_peer, _) = connected(&disabled).await;
    let result = disabled
        .send_request(None, RequestOptions::new(Method::Options, "sip:bob@example.com"))
        .await;
    assert!(matches!(result, Err(AgentError::NoConnection { .. })));
}

#[tokio::test]
async fn test_digest_challenge_is_answered_once() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .send_request(None, invite_options().with_auth(DigestAuth::new("alice", "wonderland")))
                .await
        }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, "txn-1", "").await;
    let mut request = sending.await.unwrap().unwrap();

    let challenge = r#"WWW-Authenticate: Digest realm="example.com", nonce="n0nce", qop="auth"
"#
    .replace('\n', "\r\n");
    peer.push_sip("txn-1", "", &response(401, "Unauthorized", "call-1", "1 INVITE", &challenge))
        .await;

    let retry = peer.expect("sip").await;
    let resent = SipMessage::parse(retry.payload()).unwrap();
    assert_eq!(resent.call_id(), Some("call-1"));
    assert_eq!(resent.get("From"), Some("<sip:alice@example.com>;tag=a1"));
    let cseq = resent.cseq().unwrap();
    assert_eq!(cseq.seq, 2);
    let authorization = resent.get("Authorization").unwrap();
    assert!(authorization.starts_with("Digest username=\"alice\""));
    assert!(authorization.contains("realm=\"example.com\""));
    assert!(authorization.contains("nc=00000001"));
    peer.reply_sent(&retry, "txn-2", "").await;

    match request.next_event().await {
        Some(RequestEvent::Authenticate { request }) => assert_eq!(request.transaction_id(), "txn-2"),
        other => panic!("unexpected {:?}", other),
    }

    // a second challenge is delivered, not answered
    peer.push_sip("txn-2", "", &response(401, "Unauthorized", "call-1", "2 INVITE", &challenge))
        .await;
    let (response, _) = request.final_response().await.unwrap();
    assert_eq!(response.status(), 401);
    peer.expect_silence().await;
    assert!(agent.is_idle());
}

fn register_options(cseq: u32) -> RequestOptions {
    RequestOptions::new(Method::Register, "sip:example.com")
        .with_header("Call-ID", "reg-1")
        .with_header("From", "<sip:alice@example.com>;tag=r1")
        .with_header("CSeq", format!("{} REGISTER", cseq))
        .with_auth(DigestAuth::new("alice", "wonderland"))
}

async fn send_register(agent: &Agent, peer: &mut Peer, cseq: u32, txn: &str) -> OutboundRequest {
    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, register_options(cseq)).await }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, txn, "").await;
    sending.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_failed_digest_retry_does_not_block_refresh() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let mut first = send_register(&agent, &mut peer, 1, "txn-1").await;
    assert_eq!(first.digest_state(), DigestState::Idle);
    let unsupported = "WWW-Authenticate: Digest realm=\"r\", nonce=\"n\", algorithm=SHA-256\r\n";
    peer.push_sip("txn-1", "", &response(401, "Unauthorized", "reg-1", "1 REGISTER", unsupported))
        .await;

    match first.next_event().await {
        Some(RequestEvent::AuthenticationFailed { reason }) => assert!(reason.contains("SHA-256")),
        other => panic!("unexpected {:?}", other),
    }
    let (response_1, _) = first.final_response().await.unwrap();
    assert_eq!(response_1.status(), 401);
    assert_eq!(first.digest_state(), DigestState::Failed);
    peer.expect_silence().await;

    // the refresh reuses the Call-ID and must still be answered
    let mut refresh = send_register(&agent, &mut peer, 2, "txn-2").await;
    let challenge = "WWW-Authenticate: Digest realm=\"r\", nonce=\"n\"\r\n";
    peer.push_sip("txn-2", "", &response(401, "Unauthorized", "reg-1", "2 REGISTER", challenge))
        .await;

    let retry = peer.expect("sip").await;
    let resent = SipMessage::parse(retry.payload()).unwrap();
    assert_eq!(resent.call_id(), Some("reg-1"));
    assert_eq!(resent.cseq().unwrap().seq, 3);
    assert!(resent.get("Authorization").unwrap().contains("realm=\"r\""));
    peer.reply_sent(&retry, "txn-3", "").await;

    match refresh.next_event().await {
        Some(RequestEvent::Authenticate { request }) => assert_eq!(request.transaction_id(), "txn-3"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(refresh.digest_state(), DigestState::Completed);

    peer.push_sip("txn-3", "", &response(200, "OK", "reg-1", "3 REGISTER", ""))
        .await;
    let (response_2, _) = refresh.final_response().await.unwrap();
    assert_eq!(response_2.status(), 200);
    assert!(agent.is_idle());
}

#[tokio::test]
async fn test_challenge_without_credentials_is_delivered() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, invite_options()).await }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, "txn-1", "").await;
    let mut request = sending.await.unwrap().unwrap();

    peer.push_sip(
        "txn-1",
        "",
        &response(407, "Proxy Authentication Required", "call-1", "1 INVITE", ""),
    )
    .await;
    let (response, _) = request.final_response().await.unwrap();
    assert_eq!(response.status(), 407);
    peer.expect_silence().await;
}

#[tokio::test]
async fn test_ack_for_200_to_invite() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, invite_options()).await }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, "txn-1", "").await;
    let mut request = sending.await.unwrap().unwrap();

    peer.push_sip("txn-1", "dlg-1", &response(200, "OK", "call-1", "1 INVITE", ""))
        .await;
    let (response, ack) = request.final_response().await.unwrap();
    assert_eq!(response.status(), 200);
    let ack = ack.expect("200 to INVITE needs an ACK");
    assert_eq!(ack.method(), Method::Ack);
    assert_eq!(ack.dialog_id(), "dlg-1");

    let acking = tokio::spawn(async move { ack.send(AckOptions::default()).await });
    let frame = peer.expect("sip").await;
    assert_eq!(frame.fields, vec![String::new(), "dlg-1".to_string()]);
    let message = SipMessage::parse(frame.payload()).unwrap();
    assert_eq!(message.method(), Some(&Method::Ack));
    assert_eq!(message.uri(), Some("sip:bob@example.com"));
    peer.reply_sent(&frame, "", "dlg-1").await;

    let echoed = acking.await.unwrap().unwrap();
    assert_eq!(echoed.method(), Some(&Method::Ack));
    assert!(agent.is_idle());
}

#[tokio::test]
async fn test_prack_for_reliable_provisional() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, invite_options()).await }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, "txn-1", "").await;
    let mut request = sending.await.unwrap().unwrap();

    peer.push_sip(
        "txn-1",
        "dlg-1",
        &response(183, "Session Progress", "call-1", "1 INVITE", "RSeq: 7\r\n"),
    )
    .await;
    let ack = match request.next_event().await {
        Some(RequestEvent::Response { response, ack }) => {
            assert_eq!(response.status(), 183);
            ack.expect("reliable provisional needs a PRACK")
        }
        other => panic!("unexpected {:?}", other),
    };

    let acking = tokio::spawn(async move { ack.send(AckOptions::default()).await });
    let frame = peer.expect("sip").await;
    let message = SipMessage::parse(frame.payload()).unwrap();
    assert_eq!(message.method(), Some(&Method::Prack));
    assert_eq!(message.get("RAck"), Some("7 1 INVITE"));
    peer.reply_sent(&frame, "txn-2", "dlg-1").await;
    acking.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_pending_invite() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, invite_options()).await }
    });
    let frame = peer.expect("sip").await;
    peer.reply_sent(&frame, "txn-1", "").await;
    let request = sending.await.unwrap().unwrap();

    let cancelling = tokio::spawn(async move {
        let cancel = request.cancel().await;
        (request, cancel)
    });
    let frame = peer.expect("sip").await;
    assert_eq!(frame.fields[0], "txn-1");
    let message = SipMessage::parse(frame.payload()).unwrap();
    assert_eq!(message.method(), Some(&Method::Cancel));
    peer.reply_sent(&frame, "txn-1-cancel", "").await;

    let (mut request, cancel) = cancelling.await.unwrap();
    cancel.unwrap();

    peer.push_sip(
        "txn-1",
        "",
        &response(487, "Request Terminated", "call-1", "1 INVITE", ""),
    )
    .await;
    let (response, ack) = request.final_response().await.unwrap();
    assert_eq!(response.status(), 487);
    assert_eq!(ack.map(|ack| ack.method()), Some(Method::Ack));
    // CANCEL transactions are not tracked
    assert!(agent.is_idle());
}

#[tokio::test]
async fn test_pending_request_fails_when_connection_drops() {
    let agent = Agent::new(config()).unwrap();
    let (mut peer, _) = connected(&agent).await;

    let sending = tokio::spawn({
        let agent = agent.clone();
        async move { agent.send_request(None, invite_options()).await }
    });
    peer.expect("sip").await;
    drop(peer);

    assert!(matches!(
        sending.await.unwrap(),
        Err(AgentError::ConnectionClosed)
    ));
}
