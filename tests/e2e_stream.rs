//! End-to-end lifecycle and negotiation tests.
//!
//! Streams run against in-memory connectors; every test drives the public
//! API and checks the posted events.

mod common;

use common::{
    assert_quiet, cpim_remote, direct_config, eventually, next_event, remote_media, Behavior, Harness, MockSession,
};
use msrp_chat::chat::{ChatMessage, MediaStream};
use msrp_chat::config::{ConnectionModel, RelayConfig};
use msrp_chat::error::ChatError;
use msrp_chat::negotiation::{Direction, MediaDescription, MismatchPhase, NegotiationError};
use msrp_chat::stream::{FailureContext, StreamEvent, StreamState};
use msrp_chat::transport::{ConnectorSpec, Role, TransportError, TransportKind};

fn relay_config() -> msrp_chat::Config {
    let mut config = direct_config();
    config.account.connection_model = ConnectionModel::Relay;
    config.account.relay = Some(RelayConfig {
        host: "relay.example.com".to_string(),
        port: 2855,
        transport: TransportKind::Tcp,
    });
    config
}

#[tokio::test]
async fn test_lifecycle_start_and_end() {
    let mut h = Harness::started(cpim_remote()).await;
    assert_eq!(h.stream.state(), StreamState::Started);

    let local = h.stream.local_media().unwrap();
    assert_eq!(local.transport, "TCP/MSRP");
    assert_eq!(local.first("setup"), Some("actpass"));
    assert_eq!(local.first("path"), Some("msrp://192.0.2.1:40000/local1;tcp"));
    assert_eq!(h.factory.log.lock().created, vec![ConnectorSpec::DirectAcceptor]);
    assert_eq!(h.factory.log.lock().completed.len(), 1);

    h.stream.end().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::WillEnd);
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidEnd { error: None });
    assert_eq!(h.stream.state(), StreamState::Ended);
    assert_eq!(h.channel().shutdowns.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!h.channel().lost.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let mut h = Harness::started(cpim_remote()).await;

    let first = h.stream.end();
    let second = h.stream.end();
    first.await.unwrap();
    second.await.unwrap();
    h.stream.end().await.unwrap();

    assert_eq!(next_event(&mut h.events).await, StreamEvent::WillEnd);
    assert!(matches!(next_event(&mut h.events).await, StreamEvent::DidEnd { .. }));
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_end_interrupts_initialize() {
    let mut h = Harness::new(direct_config(), Behavior::HangPrepare, None);
    let queued = h.stream.send_message(ChatMessage::text("never sent"));
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();
    eventually(|| h.factory.log.lock().prepared.len() == 1).await;

    h.stream.end().await.unwrap();
    assert_eq!(
        next_event(&mut h.events).await,
        StreamEvent::DidNotInitialize {
            reason: "Interrupted".to_string(),
            transport: TransportKind::Tcp,
            credentials: None,
        }
    );
    assert_eq!(next_event(&mut h.events).await, StreamEvent::not_delivered(queued, "Stream was closed"));
    assert_eq!(h.factory.log.lock().cleanups, 1);
    assert_eq!(h.stream.state(), StreamState::FailedInit);

    h.stream.end().await.unwrap();
    assert_quiet(&mut h.events).await;
}

#[tokio::test]
async fn test_failed_initialize_resolves_queue() {
    let mut h = Harness::new(direct_config(), Behavior::FailPrepare, None);
    let queued = h.stream.send_message(ChatMessage::text("queued"));
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();

    match next_event(&mut h.events).await {
        StreamEvent::DidNotInitialize { reason, .. } => assert!(reason.contains("no route to relay")),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(next_event(&mut h.events).await, StreamEvent::not_delivered(queued, "Stream was closed"));

    // the queue is closed from now on
    let late = h.stream.send_message(ChatMessage::text("late"));
    assert_eq!(next_event(&mut h.events).await, StreamEvent::not_delivered(late, "Stream ended"));

    h.stream.end().await.unwrap();
    assert_quiet(&mut h.events).await;
    assert_eq!(h.stream.state(), StreamState::FailedInit);
}

#[tokio::test]
async fn test_start_after_failed_initialize_is_rejected() {
    let mut h = Harness::new(direct_config(), Behavior::FailPrepare, None);
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();
    // may land while initialize is still running or after it failed
    let _ = h.stream.start(cpim_remote());

    assert!(matches!(next_event(&mut h.events).await, StreamEvent::DidNotInitialize { .. }));
    assert_quiet(&mut h.events).await;

    assert!(matches!(h.stream.start(cpim_remote()), Err(ChatError::InvalidState(_))));
    assert_quiet(&mut h.events).await;
    assert!(h.factory.log.lock().completed.is_empty());
}

#[tokio::test]
async fn test_end_before_initialize_resolves_queue() {
    let mut h = Harness::new(direct_config(), Behavior::Normal, None);
    let queued = h.stream.send_message(ChatMessage::text("queued"));

    h.stream.end().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::not_delivered(queued, "Stream ended"));
    assert!(h.stream.initialize(MockSession::new(), Direction::Outgoing).is_err());
}

#[tokio::test]
async fn test_start_waits_for_initialize() {
    let mut h = Harness::new(direct_config(), Behavior::Normal, None);
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();
    h.stream.start(cpim_remote()).unwrap();

    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidInitialize);
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidStart);
}

#[tokio::test]
async fn test_incoming_passive_offer_uses_direct_connector() {
    let mut h = Harness::new(relay_config(), Behavior::Normal, None);
    let remote = remote_media("message/cpim text/plain", Some("text/*"), "passive");
    h.stream.validate_remote_media(&remote).unwrap();
    h.stream.initialize(MockSession::new(), Direction::Incoming).unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidInitialize);

    assert_eq!(h.factory.log.lock().created, vec![ConnectorSpec::DirectConnector]);
    assert_eq!(h.stream.local_media().unwrap().first("setup"), Some("active"));

    h.stream.start(remote).unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidStart);
}

#[tokio::test]
async fn test_incoming_active_offer_uses_relay() {
    let mut h = Harness::new(relay_config(), Behavior::Normal, None);
    let remote = remote_media("message/cpim text/plain", Some("text/*"), "active");
    h.stream.validate_remote_media(&remote).unwrap();
    h.stream.initialize(MockSession::new(), Direction::Incoming).unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidInitialize);

    let created = h.factory.log.lock().created.clone();
    assert!(matches!(&created[..], [ConnectorSpec::Relay { mode: Role::Passive, .. }]));
    assert_eq!(h.stream.local_media().unwrap().first("setup"), Some("passive"));
}

#[tokio::test]
async fn test_passive_answer_switches_direct_endpoint() {
    let h = Harness::started(remote_media("message/cpim text/plain", Some("text/*"), "passive")).await;

    let log = h.factory.log.lock();
    assert_eq!(log.created, vec![ConnectorSpec::DirectAcceptor, ConnectorSpec::DirectConnector]);
    assert_eq!(log.cleanups, 1);
    // the replacement reuses the allocated local URI
    assert_eq!(log.prepared[1].uri.port, Some(40000));
    assert_eq!(log.prepared[1].uri.session_id, "local1");
}

#[tokio::test]
async fn test_passive_answer_switches_relay_mode() {
    let h = Harness::started_with(
        relay_config(),
        MockSession::new(),
        remote_media("message/cpim text/plain", Some("text/*"), "passive"),
        None,
    )
    .await;

    let log = h.factory.log.lock();
    assert_eq!(log.created.len(), 1);
    assert!(log.created[0].is_relay());
    assert_eq!(log.modes, vec![Role::Active]);
}

#[tokio::test]
async fn test_start_rejects_transport_mismatch() {
    let mut h = Harness::new(direct_config(), Behavior::Normal, None);
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidInitialize);

    let remote = MediaDescription::parse(
        "m=message 2856 TCP/MSRP *\r\n\
         a=path:msrps://198.51.100.7:2856/remote1;tcp\r\n\
         a=accept-types:text/plain\r\n",
    )
    .unwrap();
    h.stream.start(remote).unwrap();

    let reason = match next_event(&mut h.events).await {
        StreamEvent::DidFail { context, reason, .. } => {
            assert_eq!(context, FailureContext::SdpNegotiation);
            reason
        },
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(reason, "remote transport ('tls') different from local transport ('tcp')");
    assert_eq!(h.stream.state(), StreamState::Failed);

    h.stream.end().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::WillEnd);
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidEnd { error: Some(reason) });
}

#[tokio::test]
async fn test_complete_failure_fails_start() {
    let mut h = Harness::new(direct_config(), Behavior::FailComplete, None);
    h.stream.initialize(MockSession::new(), Direction::Outgoing).unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidInitialize);
    h.stream.start(cpim_remote()).unwrap();

    match next_event(&mut h.events).await {
        StreamEvent::DidFail { context, reason, .. } => {
            assert_eq!(context, FailureContext::Start);
            assert!(reason.contains("connection refused"));
        },
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_read_error_fails_stream() {
    let mut h = Harness::started(cpim_remote()).await;
    h.peer.send(Err(TransportError::ConnectionLost("reset".to_string()))).unwrap();

    assert_eq!(
        next_event(&mut h.events).await,
        StreamEvent::DidFail {
            context: FailureContext::Reading,
            reason: "Connection lost: reset".to_string(),
            transport: TransportKind::Tcp,
            credentials: None,
        }
    );
    assert_eq!(h.stream.state(), StreamState::Failed);

    h.stream.end().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::WillEnd);
    assert_eq!(
        next_event(&mut h.events).await,
        StreamEvent::DidEnd {
            error: Some("Connection lost: reset".to_string())
        }
    );
    assert!(h.channel().lost.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_clean_close_after_deactivate_is_not_a_failure() {
    let mut h = Harness::started(cpim_remote()).await;
    h.stream.deactivate();
    h.peer.send(Err(TransportError::ConnectionDone)).unwrap();
    assert_quiet(&mut h.events).await;

    h.stream.end().await.unwrap();
    assert_eq!(next_event(&mut h.events).await, StreamEvent::WillEnd);
    assert_eq!(next_event(&mut h.events).await, StreamEvent::DidEnd { error: None });
}

#[tokio::test]
async fn test_clean_close_while_active_fails_stream() {
    let mut h = Harness::started(cpim_remote()).await;
    h.peer.send(Err(TransportError::ConnectionDone)).unwrap();

    match next_event(&mut h.events).await {
        StreamEvent::DidFail { context, .. } => assert_eq!(context, FailureContext::Reading),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_validate_remote_media() {
    let h = Harness::new(direct_config(), Behavior::Normal, None);

    assert!(h.stream.validate_remote_media(&cpim_remote()).is_ok());

    let audio = MediaDescription::parse("m=audio 5004 RTP/AVP 0\r\n").unwrap();
    assert!(matches!(
        h.stream.validate_remote_media(&audio),
        Err(ChatError::UnknownStream(_))
    ));

    let tls = MediaDescription::parse("m=message 2856 TCP/TLS/MSRP *\r\na=accept-types:text/plain\r\n").unwrap();
    assert!(matches!(
        h.stream.validate_remote_media(&tls),
        Err(ChatError::Negotiation(NegotiationError::TransportMismatch {
            phase: MismatchPhase::Negotiation,
            ..
        }))
    ));

    let formats = MediaDescription::parse("m=message 2856 TCP/MSRP 0\r\na=accept-types:text/plain\r\n").unwrap();
    assert!(matches!(
        h.stream.validate_remote_media(&formats),
        Err(ChatError::InvalidStream(_))
    ));

    let sendonly =
        MediaDescription::parse("m=message 2856 TCP/MSRP *\r\na=sendonly\r\na=accept-types:text/plain\r\n").unwrap();
    assert!(matches!(
        h.stream.validate_remote_media(&sendonly),
        Err(ChatError::InvalidStream(_))
    ));

    let no_types = MediaDescription::parse("m=message 2856 TCP/MSRP *\r\n").unwrap();
    match h.stream.validate_remote_media(&no_types) {
        Err(ChatError::InvalidStream(reason)) => assert!(reason.contains("accept-types")),
        other => panic!("unexpected result {:?}", other),
    }

    let incompatible =
        MediaDescription::parse("m=message 2856 TCP/MSRP *\r\na=accept-types:application/pdf\r\n").unwrap();
    match h.stream.validate_remote_media(&incompatible) {
        Err(ChatError::InvalidStream(reason)) => assert_eq!(reason, "no compatible media types found"),
        other => panic!("unexpected result {:?}", other),
    }
}
