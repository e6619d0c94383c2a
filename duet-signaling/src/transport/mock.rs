//! In-memory room relay for tests.
//!
//! Every participant connected to a [`MockHub`] gets a [`MockSender`]/[`MockReceiver`] pair.
//! The hub announces joins and leaves to the other members, routes unicast payloads and
//! can hold back or drop deliveries to simulate a lossy or slow relay.

use crate::error::SignalingError;
use crate::transport::{ChannelEvent, SignalingReceiver, SignalingSender, SignalingTransport};
use async_trait::async_trait;
use duet_protocol::ParticipantId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const SENT_CHANNEL_CAPACITY: usize = 256;

/// A payload routed through the hub, as observed by tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub sender: ParticipantId,
    pub recipient: ParticipantId,
    pub payload: String,
}

#[derive(Default)]
struct HubState {
    members: HashMap<ParticipantId, mpsc::UnboundedSender<ChannelEvent>>,
    held: HashMap<ParticipantId, Vec<ChannelEvent>>,
    unreachable: HashSet<ParticipantId>,
}

#[derive(Clone)]
pub struct MockHub {
    state: Arc<Mutex<HubState>>,
    sent_tx: broadcast::Sender<SentMessage>,
}

impl Default for MockHub {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            sent_tx: broadcast::channel(SENT_CHANNEL_CAPACITY).0,
        }
    }
}

impl MockHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects `id` to the hub and announces it to every member already present.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn join(
        &self,
        id: impl Into<ParticipantId> + std::fmt::Debug,
    ) -> (MockSender, MockReceiver) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock();
        for (member, member_tx) in state.members.iter() {
            if member != &id {
                let _ = member_tx.send(ChannelEvent::MemberJoined(id.clone()));
            }
        }
        state.members.insert(id.clone(), tx);
        drop(state);

        (
            MockSender {
                id,
                hub: self.clone(),
            },
            MockReceiver { rx },
        )
    }

    /// Disconnects `id` and announces the departure to the remaining members.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn leave(&self, id: &ParticipantId) {
        let mut state = self.state.lock();
        state.members.remove(id);
        state.held.remove(id);
        for member_tx in state.members.values() {
            let _ = member_tx.send(ChannelEvent::MemberLeft(id.clone()));
        }
    }

    /// While held, deliveries to `id` are queued instead of handed out.
    pub fn hold(&self, id: &ParticipantId) {
        self.state.lock().held.entry(id.clone()).or_default();
    }

    /// Stops holding `id` and delivers everything queued in the meantime, in order.
    pub fn release(&self, id: &ParticipantId) {
        let mut state = self.state.lock();
        let queued = state.held.remove(id).unwrap_or_default();
        if let Some(member_tx) = state.members.get(id) {
            for event in queued {
                let _ = member_tx.send(event);
            }
        }
    }

    /// Discards everything currently queued for a held participant.
    pub fn drop_held(&self, id: &ParticipantId) -> usize {
        self.state
            .lock()
            .held
            .get_mut(id)
            .map(|queued| queued.drain(..).count())
            .unwrap_or(0)
    }

    /// Makes sends to `id` fail with [`SignalingError::Delivery`].
    pub fn set_unreachable(&self, id: &ParticipantId, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(id.clone());
        } else {
            state.unreachable.remove(id);
        }
    }

    /// Injects a raw payload as if `sender` had unicast it to `recipient`.
    pub fn inject(&self, sender: &ParticipantId, recipient: &ParticipantId, payload: String) {
        let state = self.state.lock();
        if let Some(member_tx) = state.members.get(recipient) {
            let _ = member_tx.send(ChannelEvent::Message {
                sender: sender.clone(),
                payload,
            });
        }
    }

    /// Subscribes to every payload successfully routed through the hub.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<SentMessage> {
        self.sent_tx.subscribe()
    }

    fn route(
        &self,
        sender: &ParticipantId,
        recipient: &ParticipantId,
        payload: String,
    ) -> Result<(), SignalingError> {
        let mut state = self.state.lock();
        if state.unreachable.contains(recipient) {
            return Err(SignalingError::Delivery {
                recipient: recipient.clone(),
                reason: "recipient unreachable".to_string(),
            });
        }
        let Some(member_tx) = state.members.get(recipient).cloned() else {
            return Err(SignalingError::Delivery {
                recipient: recipient.clone(),
                reason: "recipient not in room".to_string(),
            });
        };

        let event = ChannelEvent::Message {
            sender: sender.clone(),
            payload: payload.clone(),
        };
        if let Some(queued) = state.held.get_mut(recipient) {
            queued.push(event);
        } else if member_tx.send(event).is_err() {
            return Err(SignalingError::Delivery {
                recipient: recipient.clone(),
                reason: "recipient disconnected".to_string(),
            });
        }
        drop(state);

        let _ = self.sent_tx.send(SentMessage {
            sender: sender.clone(),
            recipient: recipient.clone(),
            payload,
        });
        Ok(())
    }
}

/// [`SignalingTransport`] joining a [`MockHub`] on connect.
#[derive(Clone)]
pub struct MockTransport {
    hub: MockHub,
    id: ParticipantId,
}

impl MockTransport {
    pub fn new(hub: &MockHub, id: impl Into<ParticipantId>) -> Self {
        Self {
            hub: hub.clone(),
            id: id.into(),
        }
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    type Sender = MockSender;
    type Receiver = MockReceiver;

    async fn connect(&self) -> Result<(Self::Sender, Self::Receiver), SignalingError> {
        Ok(self.hub.join(self.id.clone()))
    }
}

pub struct MockSender {
    id: ParticipantId,
    hub: MockHub,
}

pub struct MockReceiver {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
impl SignalingSender for MockSender {
    #[tracing::instrument(level = "debug", skip(self, payload), fields(sender = %self.id))]
    async fn send(
        &self,
        recipient: &ParticipantId,
        payload: String,
    ) -> Result<(), SignalingError> {
        self.hub.route(&self.id, recipient, payload).inspect_err(|err| {
            tracing::warn!(?err, "Failed to route message");
        })
    }

    async fn close(&self) -> Result<(), SignalingError> {
        tracing::debug!("Closing MockSender");
        self.hub.leave(&self.id);
        Ok(())
    }
}

#[async_trait]
impl SignalingReceiver for MockReceiver {
    async fn recv(&mut self) -> Result<ChannelEvent, SignalingError> {
        match self.rx.recv().await {
            Some(event) => {
                tracing::debug!(?event, "Received event");
                Ok(event)
            }
            None => {
                tracing::warn!("Channel closed");
                Err(SignalingError::Disconnected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test(tokio::test)]
    async fn join_announces_to_existing_members() {
        let hub = MockHub::new();
        let (_a_tx, mut a_rx) = hub.join("1");
        let (_b_tx, _b_rx) = hub.join("2");

        assert_eq!(
            a_rx.recv().await.unwrap(),
            ChannelEvent::MemberJoined("2".into())
        );
    }

    #[test(tokio::test)]
    async fn unicast_reaches_only_recipient() {
        let hub = MockHub::new();
        let (a_tx, _a_rx) = hub.join("1");
        let (_b_tx, mut b_rx) = hub.join("2");
        let (_c_tx, mut c_rx) = hub.join("3");

        a_tx.send(&"3".into(), "hello".to_string()).await.unwrap();

        assert_eq!(
            c_rx.recv().await.unwrap(),
            ChannelEvent::Message {
                sender: "1".into(),
                payload: "hello".to_string()
            }
        );
        // b only saw the join of 3.
        assert_eq!(
            b_rx.recv().await.unwrap(),
            ChannelEvent::MemberJoined("3".into())
        );
        assert!(b_rx.rx.try_recv().is_err());
    }

    #[test(tokio::test)]
    async fn send_to_unknown_recipient_fails() {
        let hub = MockHub::new();
        let (a_tx, _a_rx) = hub.join("1");

        let result = a_tx.send(&"9".into(), "hello".to_string()).await;
        assert!(matches!(result, Err(SignalingError::Delivery { .. })));
    }

    #[test(tokio::test)]
    async fn held_messages_are_released_in_order() {
        let hub = MockHub::new();
        let (a_tx, _a_rx) = hub.join("1");
        let (_b_tx, mut b_rx) = hub.join("2");
        let b: ParticipantId = "2".into();

        hub.hold(&b);
        a_tx.send(&b, "first".to_string()).await.unwrap();
        a_tx.send(&b, "second".to_string()).await.unwrap();
        assert!(b_rx.rx.try_recv().is_err());

        hub.release(&b);
        for expected in ["first", "second"] {
            assert_eq!(
                b_rx.recv().await.unwrap(),
                ChannelEvent::Message {
                    sender: "1".into(),
                    payload: expected.to_string()
                }
            );
        }
    }

    #[test(tokio::test)]
    async fn leave_announces_departure() {
        let hub = MockHub::new();
        let (_a_tx, mut a_rx) = hub.join("1");
        let (b_tx, _b_rx) = hub.join("2");

        b_tx.close().await.unwrap();

        assert_eq!(
            a_rx.recv().await.unwrap(),
            ChannelEvent::MemberJoined("2".into())
        );
        assert_eq!(
            a_rx.recv().await.unwrap(),
            ChannelEvent::MemberLeft("2".into())
        );
    }
}
