use duet_protocol::{IceCandidate, SessionDescription, SignalEnvelope};
use duet_room::NegotiationState;
use duet_room::test_utils::{ScriptedPeer, TEST_TIMEOUT, TestRoom};
use duet_signaling::transport::mock::MockHub;
use duet_webrtc::mock::{MockTransportHandle, TransportOp};
use pretty_assertions::assert_eq;
use std::time::Duration;
use test_log::test;

fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

async fn wait_for_candidates(transport: &MockTransportHandle, count: usize) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while transport.remote_candidates().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Room "1" offering to scripted peer "2".
async fn offering_room(hub: &MockHub) -> (TestRoom, ScriptedPeer) {
    let mut remote = ScriptedPeer::join(hub, "2").unwrap();
    let local = TestRoom::join(hub, "1").unwrap();
    local.room.on_join("2");
    remote
        .expect(|envelope| matches!(envelope, SignalEnvelope::Offer { .. }))
        .await
        .unwrap();
    (local, remote)
}

#[test(tokio::test)]
async fn early_candidates_are_applied_after_answer_in_order() {
    let hub = MockHub::new();
    let (local, remote) = offering_room(&hub).await;

    for n in 1..=3 {
        remote
            .send("1", SignalEnvelope::Candidate { candidate: candidate(n) })
            .await
            .unwrap();
    }
    let status = local
        .wait_for_status("2", |status| status.pending_remote_candidates == 3)
        .await
        .unwrap();
    assert!(!status.remote_description_applied);
    assert!(local.transport("2").unwrap().remote_candidates().is_empty());

    let answer = SessionDescription::answer("answer-from-2");
    remote
        .send("1", SignalEnvelope::Answer { answer: answer.clone() })
        .await
        .unwrap();
    let status = local
        .wait_for_status("2", |status| status.state == NegotiationState::Stable)
        .await
        .unwrap();
    assert_eq!(status.pending_remote_candidates, 0);

    let ops = local.transport("2").unwrap().ops();
    let tail = &ops[ops.len() - 4..];
    assert_eq!(
        tail,
        &[
            TransportOp::RemoteDescription(answer),
            TransportOp::RemoteCandidate(candidate(1)),
            TransportOp::RemoteCandidate(candidate(2)),
            TransportOp::RemoteCandidate(candidate(3)),
        ]
    );
}

#[test(tokio::test)]
async fn late_candidates_are_applied_immediately() {
    let hub = MockHub::new();
    let (local, remote) = offering_room(&hub).await;

    remote
        .send(
            "1",
            SignalEnvelope::Answer {
                answer: SessionDescription::answer("answer-from-2"),
            },
        )
        .await
        .unwrap();
    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(7) })
        .await
        .unwrap();

    let transport = local.transport("2").unwrap();
    wait_for_candidates(&transport, 1).await;
    assert_eq!(transport.remote_candidates(), vec![candidate(7)]);
}

#[test(tokio::test)]
async fn duplicate_candidates_are_applied_once() {
    let hub = MockHub::new();
    let (local, remote) = offering_room(&hub).await;

    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(1) })
        .await
        .unwrap();
    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(1) })
        .await
        .unwrap();
    remote
        .send(
            "1",
            SignalEnvelope::Answer {
                answer: SessionDescription::answer("answer-from-2"),
            },
        )
        .await
        .unwrap();
    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(1) })
        .await
        .unwrap();
    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(2) })
        .await
        .unwrap();

    let transport = local.transport("2").unwrap();
    wait_for_candidates(&transport, 2).await;
    assert_eq!(transport.remote_candidates(), vec![candidate(1), candidate(2)]);
}

#[test(tokio::test)]
async fn candidates_without_session_are_discarded() {
    let hub = MockHub::new();
    let remote = ScriptedPeer::join(&hub, "2").unwrap();
    let local = TestRoom::join(&hub, "1").unwrap();

    remote
        .send("1", SignalEnvelope::Candidate { candidate: candidate(1) })
        .await
        .unwrap();
    // An offer after the stray candidate still negotiates from scratch.
    remote
        .send(
            "1",
            SignalEnvelope::Offer {
                offer: SessionDescription::offer("offer-from-2"),
            },
        )
        .await
        .unwrap();

    let status = local
        .wait_for_status("2", |status| status.state == NegotiationState::Stable)
        .await
        .unwrap();
    assert_eq!(status.pending_remote_candidates, 0);
    assert!(local.transport("2").unwrap().remote_candidates().is_empty());
}
