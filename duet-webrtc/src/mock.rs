//! Scriptable [`PeerTransport`] for exercising negotiation logic without a network.
//!
//! Every transport records the operations applied to it and exposes a
//! [`MockTransportHandle`] through which tests inject local candidates, remote tracks
//! and connection-state changes.

use crate::error::WebrtcError;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::transport::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
use anyhow::anyhow;
use async_trait::async_trait;
use duet_protocol::{IceCandidate, ParticipantId, SessionDescription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    AddTrack(String),
    LocalDescription(SessionDescription),
    RemoteDescription(SessionDescription),
    RemoteCandidate(IceCandidate),
    Close,
}

struct MockTransportShared {
    remote: ParticipantId,
    serial: usize,
    ops: Mutex<Vec<TransportOp>>,
    has_remote_description: AtomicBool,
    closed: AtomicBool,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct FactoryBehaviour {
    fail_create: bool,
    fail_add_track: bool,
    description_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

/// [`TransportFactory`] handing out [`MockPeerTransport`]s.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    created: Arc<Mutex<Vec<MockTransportHandle>>>,
    behaviour: Arc<Mutex<FactoryBehaviour>>,
    serial: Arc<AtomicUsize>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.behaviour.lock().fail_create = fail;
    }

    pub fn fail_add_track(&self, fail: bool) {
        self.behaviour.lock().fail_add_track = fail;
    }

    /// Delays every offer/answer generation of transports created from now on.
    pub fn set_description_delay(&self, delay: Option<Duration>) {
        self.behaviour.lock().description_delay = delay;
    }

    /// Delays `close` of transports created from now on before they report closed.
    pub fn set_close_delay(&self, delay: Option<Duration>) {
        self.behaviour.lock().close_delay = delay;
    }

    /// All transports created for `remote`, oldest first.
    pub fn transports(&self, remote: &ParticipantId) -> Vec<MockTransportHandle> {
        self.created
            .lock()
            .iter()
            .filter(|handle| &handle.shared.remote == remote)
            .cloned()
            .collect()
    }

    pub fn latest(&self, remote: &ParticipantId) -> Option<MockTransportHandle> {
        self.transports(remote).pop()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    type Transport = MockPeerTransport;

    async fn create(
        &self,
        remote: &ParticipantId,
    ) -> Result<(Self::Transport, mpsc::UnboundedReceiver<TransportEvent>), WebrtcError> {
        let (fail_create, fail_add_track, description_delay, close_delay) = {
            let behaviour = self.behaviour.lock();
            (
                behaviour.fail_create,
                behaviour.fail_add_track,
                behaviour.description_delay,
                behaviour.close_delay,
            )
        };
        if fail_create {
            return Err(anyhow!("mock transport creation failed").into());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MockTransportShared {
            remote: remote.clone(),
            serial: self.serial.fetch_add(1, Ordering::Relaxed),
            ops: Mutex::new(Vec::new()),
            has_remote_description: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events_tx,
        });
        self.created.lock().push(MockTransportHandle {
            shared: shared.clone(),
        });

        Ok((
            MockPeerTransport {
                shared,
                fail_add_track,
                description_delay,
                close_delay,
            },
            events_rx,
        ))
    }
}

pub struct MockPeerTransport {
    shared: Arc<MockTransportShared>,
    fail_add_track: bool,
    description_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

impl MockPeerTransport {
    fn ensure_open(&self) -> Result<(), WebrtcError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(WebrtcError::Closed);
        }
        Ok(())
    }

    async fn describe(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, WebrtcError> {
        if let Some(delay) = self.description_delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        self.shared
            .ops
            .lock()
            .push(TransportOp::LocalDescription(description.clone()));
        Ok(description)
    }
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), WebrtcError> {
        self.ensure_open()?;
        if self.fail_add_track {
            return Err(anyhow!("mock track attach failed").into());
        }
        self.shared
            .ops
            .lock()
            .push(TransportOp::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError> {
        let sdp = format!("offer-{}-{}", self.shared.remote, self.shared.serial);
        self.describe(SessionDescription::offer(sdp)).await
    }

    async fn create_answer(&self) -> Result<SessionDescription, WebrtcError> {
        if !self.shared.has_remote_description.load(Ordering::Acquire) {
            return Err(anyhow!("cannot answer without a remote offer").into());
        }
        let sdp = format!("answer-{}-{}", self.shared.remote, self.shared.serial);
        self.describe(SessionDescription::answer(sdp)).await
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), WebrtcError> {
        self.ensure_open()?;
        self.shared
            .ops
            .lock()
            .push(TransportOp::RemoteDescription(description));
        self.shared
            .has_remote_description
            .store(true, Ordering::Release);
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError> {
        self.ensure_open()?;
        if !self.shared.has_remote_description.load(Ordering::Acquire) {
            return Err(anyhow!("remote description not set").into());
        }
        self.shared
            .ops
            .lock()
            .push(TransportOp::RemoteCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), WebrtcError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.ops.lock().push(TransportOp::Close);
        }
        Ok(())
    }
}

/// Test-side view of a [`MockPeerTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    shared: Arc<MockTransportShared>,
}

impl MockTransportHandle {
    pub fn ops(&self) -> Vec<TransportOp> {
        self.shared.ops.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::RemoteDescription(description) => Some(description),
                _ => None,
            })
            .collect()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::RemoteCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::LocalDescription(description) => Some(description),
                _ => None,
            })
            .collect()
    }

    pub fn emit_state(&self, state: PeerConnectionState) {
        let _ = self.shared.events_tx.send(TransportEvent::ConnectionState(state));
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let _ = self
            .shared
            .events_tx
            .send(TransportEvent::IceCandidate(candidate));
    }

    pub fn emit_remote_track(&self, kind: TrackKind, id: impl Into<String>) {
        let track = MockRemoteTrack {
            id: id.into(),
            stream_id: format!("stream-{}", self.shared.remote),
            kind,
        };
        let _ = self
            .shared
            .events_tx
            .send(TransportEvent::Track(Arc::new(track)));
    }
}

#[derive(Debug, Clone)]
pub struct MockRemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn kind(&self) -> Option<TrackKind> {
        Some(self.kind)
    }
}
