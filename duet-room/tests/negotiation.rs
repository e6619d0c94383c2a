use duet_protocol::{IceCandidate, ParticipantId, SdpType};
use duet_room::test_utils::TestRoom;
use duet_room::{NegotiationState, Role, RoomEvent};
use duet_signaling::transport::mock::MockHub;
use duet_webrtc::mock::TransportOp;
use duet_webrtc::{PeerConnectionState, TrackKind};
use pretty_assertions::assert_eq;
use test_log::test;

async fn connected_pair(hub: &MockHub) -> (TestRoom, TestRoom) {
    let first = TestRoom::join(hub, "1").unwrap();
    let second = TestRoom::join(hub, "2").unwrap();

    first
        .wait_for_status("2", |status| status.state == NegotiationState::Stable)
        .await
        .unwrap();
    second
        .wait_for_status("1", |status| status.state == NegotiationState::Stable)
        .await
        .unwrap();
    (first, second)
}

#[test(tokio::test)]
async fn existing_member_offers_to_newcomer() {
    let hub = MockHub::new();
    let (first, second) = connected_pair(&hub).await;

    let caller = first.room.session_status(&"2".into()).unwrap();
    assert_eq!(caller.role, Some(Role::Caller));
    assert!(caller.remote_description_applied);
    assert!(caller.local_tracks_attached);

    let callee = second.room.session_status(&"1".into()).unwrap();
    assert_eq!(callee.role, Some(Role::Callee));
    assert!(callee.remote_description_applied);

    let caller_ops = first.transport("2").unwrap().ops();
    assert_eq!(caller_ops.len(), 4);
    assert_eq!(caller_ops[0], TransportOp::AddTrack("mic".to_string()));
    assert_eq!(caller_ops[1], TransportOp::AddTrack("camera".to_string()));
    assert!(matches!(&caller_ops[2], TransportOp::LocalDescription(d) if d.kind == SdpType::Offer));
    assert!(matches!(
        &caller_ops[3],
        TransportOp::RemoteDescription(d) if d.kind == SdpType::Answer
    ));

    let callee_transport = second.transport("1").unwrap();
    assert_eq!(
        callee_transport.remote_descriptions(),
        first.transport("2").unwrap().local_descriptions()
    );
    assert_eq!(
        callee_transport.local_descriptions(),
        first.transport("2").unwrap().remote_descriptions()
    );

    assert_eq!(first.room.participants(), vec![ParticipantId::from("2")]);
    assert_eq!(second.room.participants(), vec![ParticipantId::from("1")]);
    assert_eq!(first.factory.created_count(), 1);
    assert_eq!(second.factory.created_count(), 1);
}

#[test(tokio::test)]
async fn remote_stream_is_announced_before_tracks() {
    let hub = MockHub::new();
    let (_first, mut second) = connected_pair(&hub).await;

    let event = second
        .wait_for_event(|event| matches!(event, RoomEvent::RemoteStreamAdded { .. }))
        .await
        .unwrap();
    let RoomEvent::RemoteStreamAdded { participant, stream } = event else {
        unreachable!()
    };
    assert_eq!(participant, ParticipantId::from("1"));
    assert!(stream.is_empty());

    let transport = second.transport("1").unwrap();
    transport.emit_remote_track(TrackKind::Video, "remote-camera");
    transport.emit_remote_track(TrackKind::Audio, "remote-mic");

    second
        .wait_for_event(|event| {
            matches!(event, RoomEvent::RemoteTrackAdded { kind: Some(TrackKind::Audio), .. })
        })
        .await
        .unwrap();
    assert_eq!(
        stream.track_ids(),
        vec!["remote-camera".to_string(), "remote-mic".to_string()]
    );
    assert_eq!(
        second.room.remote_stream(&"1".into()).unwrap().track_ids(),
        stream.track_ids()
    );
}

#[test(tokio::test)]
async fn local_candidates_are_trickled() {
    let hub = MockHub::new();
    let (first, second) = connected_pair(&hub).await;

    let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host");
    first
        .transport("2")
        .unwrap()
        .emit_local_candidate(candidate.clone());

    let callee_transport = second.transport("1").unwrap();
    tokio::time::timeout(duet_room::test_utils::TEST_TIMEOUT, async {
        while callee_transport.remote_candidates().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(callee_transport.remote_candidates(), vec![candidate]);
}

#[test(tokio::test)]
async fn connected_transport_is_reported() {
    let hub = MockHub::new();
    let (mut first, _second) = connected_pair(&hub).await;

    first
        .transport("2")
        .unwrap()
        .emit_state(PeerConnectionState::Connected);

    let event = first
        .wait_for_event(|event| matches!(event, RoomEvent::SessionConnected { .. }))
        .await
        .unwrap();
    assert_eq!(event.participant(), Some(&ParticipantId::from("2")));
}

#[test(tokio::test)]
async fn three_participants_form_a_mesh() {
    let hub = MockHub::new();
    let first = TestRoom::join(&hub, "1").unwrap();
    let second = TestRoom::join(&hub, "2").unwrap();
    let third = TestRoom::join(&hub, "3").unwrap();

    for (room, remote) in [
        (&first, "2"),
        (&first, "3"),
        (&second, "1"),
        (&second, "3"),
        (&third, "1"),
        (&third, "2"),
    ] {
        room.wait_for_status(remote, |status| status.state == NegotiationState::Stable)
            .await
            .unwrap();
    }

    // The newest member never offers.
    assert_eq!(
        third.room.session_status(&"1".into()).unwrap().role,
        Some(Role::Callee)
    );
    assert_eq!(
        third.room.session_status(&"2".into()).unwrap().role,
        Some(Role::Callee)
    );
    assert_eq!(
        second.room.session_status(&"3".into()).unwrap().role,
        Some(Role::Caller)
    );
    assert_eq!(
        first.room.participants(),
        vec![ParticipantId::from("2"), ParticipantId::from("3")]
    );
}
