//! Integration tests for IDSCP2 connections running against each other.

use std::time::Duration;

use bytes::Bytes;
use idscp_core::harness::{run_handshake_flow, spawn_pair};
use idscp_core::{
    AttestationConfig, CloseInitiator, FsmState, Idscp2Configuration, Idscp2Connection,
    Idscp2Error,
};
use idscp_proto::CloseCause;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_handshake_flow() {
    let (left, right) = run_handshake_flow(Idscp2Configuration::default())
        .await
        .expect("handshake flow should succeed");

    assert_eq!(left.state(), FsmState::Established);
    assert_eq!(right.state(), FsmState::Established);
}

#[tokio::test]
async fn test_data_exchange() {
    let (left, right) = run_handshake_flow(Idscp2Configuration::default())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    right.add_message_listener(move |_c: &Idscp2Connection, data: &Bytes| {
        let _ = tx.send(data.clone());
    });

    for i in 0..5u8 {
        left.send(vec![i; 16]).unwrap();
    }
    for i in 0..5u8 {
        let data = rx.recv().await.unwrap();
        assert_eq!(data, Bytes::from(vec![i; 16]));
    }
}

#[tokio::test]
async fn test_echo_from_listener() {
    let (left, right) = run_handshake_flow(Idscp2Configuration::default())
        .await
        .unwrap();

    // Listeners run outside the connection lock and may send.
    right.add_message_listener(|c: &Idscp2Connection, data: &Bytes| {
        let _ = c.send(data.clone());
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    left.add_message_listener(move |_c: &Idscp2Connection, data: &Bytes| {
        let _ = tx.send(data.clone());
    });

    left.send(&b"ping"[..]).unwrap();
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"ping"));
}

#[tokio::test]
async fn test_close_notifies_peer() {
    let (left, right) = run_handshake_flow(Idscp2Configuration::default())
        .await
        .unwrap();

    left.close();

    let local = left.closed().await;
    assert_eq!(local.initiator, CloseInitiator::Local);
    assert_eq!(local.cause, CloseCause::UserShutdown);

    let remote = right.closed().await;
    assert_eq!(remote.initiator, CloseInitiator::Peer);
    assert_eq!(remote.cause, CloseCause::UserShutdown);

    assert!(matches!(left.send(&b"late"[..]), Err(Idscp2Error::Closed)));
    assert!(matches!(right.send(&b"late"[..]), Err(Idscp2Error::Closed)));
}

#[tokio::test]
async fn test_dropping_handles_closes_peer() {
    let (left, right) = run_handshake_flow(Idscp2Configuration::default())
        .await
        .unwrap();

    drop(left);

    let reason = right.closed().await;
    assert_eq!(reason.initiator, CloseInitiator::Peer);
    assert_eq!(reason.cause, CloseCause::UserShutdown);
}

#[tokio::test]
async fn test_no_common_mechanism_fails_handshake() {
    let config = Idscp2Configuration {
        attestation: AttestationConfig {
            expected_rat_suite: vec!["TPM2d".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };

    let (left, right) = spawn_pair(config).unwrap();
    assert!(left.established().await.is_err());
    assert!(right.established().await.is_err());

    // Each side sees the other's hello before its close notice.
    let reason = left.closed().await;
    assert_eq!(reason.initiator, CloseInitiator::Local);
    assert_eq!(reason.cause, CloseCause::NoRatMechanismMatchProver);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_re_attestation_keeps_connection() {
    let config = Idscp2Configuration {
        attestation: AttestationConfig {
            rat_timeout_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let (left, right) = run_handshake_flow(config).await.unwrap();

    // Several re-attestation rounds on both sides.
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    assert_eq!(left.state(), FsmState::Established);
    assert_eq!(right.state(), FsmState::Established);

    let (tx, mut rx) = mpsc::unbounded_channel();
    right.add_message_listener(move |_c: &Idscp2Connection, data: &Bytes| {
        let _ = tx.send(data.clone());
    });
    left.send(&b"after re-rat"[..]).unwrap();
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"after re-rat"));
}
