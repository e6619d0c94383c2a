use duet_protocol::{EnvelopeKind, ParticipantId, SessionDescription, SignalEnvelope};
use duet_room::test_utils::{ScriptedPeer, TestRoom};
use duet_room::{FailureReason, NegotiationState, Role, Room, RoomConfig, RoomError, RoomEvent};
use duet_signaling::SignalChannel;
use duet_signaling::transport::mock::MockHub;
use duet_webrtc::LocalMedia;
use duet_webrtc::mock::MockTransportFactory;
use pretty_assertions::assert_eq;
use test_log::test;
use tokio_util::sync::CancellationToken;

#[test(tokio::test)]
async fn failed_offer_is_reported_and_retried() {
    let hub = MockHub::new();
    let mut remote = ScriptedPeer::join(&hub, "2").unwrap();
    let mut local = TestRoom::join(&hub, "1").unwrap();
    hub.set_unreachable(&"2".into(), true);

    local.room.on_join("2");
    let event = local
        .wait_for_event(|event| matches!(event, RoomEvent::DeliveryFailed { .. }))
        .await
        .unwrap();
    let RoomEvent::DeliveryFailed { participant, kind, .. } = event else {
        unreachable!()
    };
    assert_eq!(participant, ParticipantId::from("2"));
    assert_eq!(kind, EnvelopeKind::Offer);

    let status = local.room.session_status(&"2".into()).unwrap();
    assert_eq!(status.state, NegotiationState::Idle);
    assert_eq!(status.role, Some(Role::Caller));

    hub.set_unreachable(&"2".into(), false);
    local.room.retry(&"2".into()).unwrap();
    let (_, offer) = remote
        .expect(|envelope| matches!(envelope, SignalEnvelope::Offer { .. }))
        .await
        .unwrap();
    local
        .wait_for_status("2", |status| status.state == NegotiationState::OfferSent)
        .await
        .unwrap();

    // The retried offer is the one generated the first time.
    let SignalEnvelope::Offer { offer } = offer else {
        unreachable!()
    };
    assert_eq!(
        local.transport("2").unwrap().local_descriptions(),
        vec![offer]
    );
    assert_eq!(local.factory.created_count(), 1);
}

#[test(tokio::test)]
async fn failed_answer_is_retried() {
    let hub = MockHub::new();
    let mut remote = ScriptedPeer::join(&hub, "1").unwrap();
    let mut local = TestRoom::join(&hub, "2").unwrap();
    hub.set_unreachable(&"1".into(), true);

    remote
        .send(
            "2",
            SignalEnvelope::Offer {
                offer: SessionDescription::offer("offer-from-1"),
            },
        )
        .await
        .unwrap();
    local
        .wait_for_event(|event| {
            matches!(event, RoomEvent::DeliveryFailed { kind: EnvelopeKind::Answer, .. })
        })
        .await
        .unwrap();
    let status = local.room.session_status(&"1".into()).unwrap();
    assert_eq!(status.state, NegotiationState::OfferReceived);
    assert_eq!(status.role, Some(Role::Callee));

    hub.set_unreachable(&"1".into(), false);
    local.room.retry(&"1".into()).unwrap();
    remote
        .expect(|envelope| matches!(envelope, SignalEnvelope::Answer { .. }))
        .await
        .unwrap();
    local
        .wait_for_status("1", |status| status.state == NegotiationState::Stable)
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn retry_needs_a_session() {
    let hub = MockHub::new();
    let local = TestRoom::join(&hub, "1").unwrap();

    assert!(matches!(
        local.room.retry(&"2".into()),
        Err(RoomError::UnknownParticipant(id)) if id == ParticipantId::from("2")
    ));
}

#[test(tokio::test)]
async fn media_bind_failure_ends_only_that_session() {
    let hub = MockHub::new();
    let mut remote = ScriptedPeer::join(&hub, "2").unwrap();
    let factory = MockTransportFactory::new();
    factory.fail_add_track(true);
    let mut local = TestRoom::join_with(&hub, "1", factory).unwrap();

    local.room.on_join("2");
    let event = local
        .wait_for_event(|event| matches!(event, RoomEvent::SessionFailed { .. }))
        .await
        .unwrap();
    let RoomEvent::SessionFailed { reason, .. } = event else {
        unreachable!()
    };
    assert!(matches!(reason, FailureReason::MediaBind(_)));

    local.wait_for_no_session("2").await.unwrap();
    assert!(local.transport("2").unwrap().is_closed());
    assert!(
        remote
            .expect_silence(std::time::Duration::from_millis(50))
            .await
    );

    // Other participants are unaffected once media works again.
    local.factory.fail_add_track(false);
    let _third = ScriptedPeer::join(&hub, "3").unwrap();
    local.room.on_join("3");
    local
        .wait_for_status("3", |status| status.state == NegotiationState::OfferSent)
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn transport_creation_failure_fails_the_session() {
    let hub = MockHub::new();
    let _remote = ScriptedPeer::join(&hub, "2").unwrap();
    let factory = MockTransportFactory::new();
    factory.fail_create(true);
    let mut local = TestRoom::join_with(&hub, "1", factory).unwrap();

    local.room.on_join("2");
    let event = local
        .wait_for_event(|event| matches!(event, RoomEvent::SessionFailed { .. }))
        .await
        .unwrap();
    assert!(matches!(
        event,
        RoomEvent::SessionFailed {
            reason: FailureReason::Negotiation(_),
            ..
        }
    ));
    local.wait_for_no_session("2").await.unwrap();
}

#[test(tokio::test)]
async fn joining_without_media_fails() {
    let hub = MockHub::new();
    let (sender, receiver) = hub.join("1");

    let result = Room::join(
        RoomConfig::new("1"),
        SignalChannel::new(sender),
        receiver,
        MockTransportFactory::new(),
        LocalMedia::new(Vec::new()),
        CancellationToken::new(),
    );
    assert!(matches!(result, Err(RoomError::NoLocalMedia)));
}
