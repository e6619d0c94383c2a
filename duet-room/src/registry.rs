use crate::session::SessionStatus;
use duet_protocol::{ParticipantId, SignalEnvelope};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Work queued for a session actor, processed strictly in order.
#[derive(Debug, Clone)]
pub(crate) enum SessionCommand {
    /// The participant joined after us: start negotiating as caller.
    Connect,
    Signal(SignalEnvelope),
    /// Re-send the last undelivered offer or answer.
    Retry,
}

/// Cheap handle onto a running session.
#[derive(Clone)]
pub struct SessionHandle {
    remote_id: ParticipantId,
    generation: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    finished: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub(crate) fn new(
        remote_id: ParticipantId,
        generation: u64,
        commands: mpsc::UnboundedSender<SessionCommand>,
        cancel: CancellationToken,
        finished: CancellationToken,
        status: watch::Receiver<SessionStatus>,
    ) -> Self {
        Self {
            remote_id,
            generation,
            commands,
            cancel,
            finished,
            status,
        }
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    /// Distinguishes this session from earlier ones for the same participant.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub(crate) fn send(&self, command: SessionCommand) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(participant = %self.remote_id, command = ?err.0, "Session no longer accepts commands");
                false
            }
        }
    }

    /// Requests teardown. In-flight work of the session is abandoned.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session released its transport and stream.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("remote_id", &self.remote_id)
            .field("generation", &self.generation)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Default)]
struct Sessions {
    live: HashMap<ParticipantId, SessionHandle>,
    /// Removed sessions still releasing their resources, keyed by generation.
    retiring: HashMap<u64, (ParticipantId, CancellationToken)>,
}

/// The single source of truth for which sessions exist: at most one live session
/// per remote participant.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<Sessions>,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live session for `id`, creating it with `create` if there is none.
    ///
    /// `create` runs under the registry lock and receives the new generation and, if
    /// an earlier session for `id` is still tearing down, a token that fires once it
    /// finished. The boolean is `true` if the session was created by this call.
    pub(crate) fn get_or_create(
        &self,
        id: &ParticipantId,
        create: impl FnOnce(u64, Option<CancellationToken>) -> SessionHandle,
    ) -> (SessionHandle, bool) {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.live.get(id) {
            return (handle.clone(), false);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let predecessor = sessions
            .retiring
            .iter()
            .filter(|(_, (retiring, _))| retiring == id)
            .max_by_key(|(generation, _)| **generation)
            .map(|(_, (_, finished))| finished.clone());
        let handle = create(generation, predecessor);
        tracing::trace!(participant = %id, generation, "Registered session");
        sessions.live.insert(id.clone(), handle.clone());
        (handle, true)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<SessionHandle> {
        self.sessions.lock().live.get(id).cloned()
    }

    /// Removes and tears down the session for `id`. Returns `None` for unknown participants.
    pub fn remove(&self, id: &ParticipantId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        let handle = sessions.live.remove(id)?;
        Self::retire_handle(&mut sessions, &handle);
        drop(sessions);

        handle.teardown();
        tracing::trace!(participant = %id, generation = handle.generation, "Removed session");
        Some(handle)
    }

    /// Like [`Self::remove`], but only if `generation` is still the live session for `id`.
    pub(crate) fn remove_if_current(&self, id: &ParticipantId, generation: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(handle) = sessions
            .live
            .get(id)
            .filter(|handle| handle.generation == generation)
            .cloned()
        else {
            return false;
        };
        sessions.live.remove(id);
        Self::retire_handle(&mut sessions, &handle);
        true
    }

    /// Whether `generation` is the live session for `id`.
    pub fn is_live(&self, id: &ParticipantId, generation: u64) -> bool {
        self.sessions
            .lock()
            .live
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
    }

    /// Forgets a session that finished its teardown.
    pub(crate) fn retire(&self, id: &ParticipantId, generation: u64) {
        let mut sessions = self.sessions.lock();
        if sessions
            .retiring
            .get(&generation)
            .is_some_and(|(retiring, _)| retiring == id)
        {
            sessions.retiring.remove(&generation);
        }
    }

    /// Tokens of every removed session that has not finished its teardown yet.
    pub(crate) fn retiring(&self) -> Vec<CancellationToken> {
        self.sessions
            .lock()
            .retiring
            .values()
            .map(|(_, finished)| finished.clone())
            .collect()
    }

    /// Removes every session and returns their handles, already torn down.
    pub(crate) fn drain(&self) -> Vec<SessionHandle> {
        let mut sessions = self.sessions.lock();
        let handles: Vec<SessionHandle> = sessions.live.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            Self::retire_handle(&mut sessions, handle);
            handle.teardown();
        }
        handles
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.sessions.lock().live.keys().cloned().collect();
        ids.sort_by(|a, b| a.rank_cmp(b));
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retire_handle(sessions: &mut Sessions, handle: &SessionHandle) {
        if !handle.is_finished() {
            sessions.retiring.insert(
                handle.generation,
                (handle.remote_id.clone(), handle.finished.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PeerSession;
    use duet_webrtc::mock::MockPeerTransport;
    use pretty_assertions::assert_eq;

    struct Detached {
        handle: SessionHandle,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    }

    fn detached(id: &ParticipantId, generation: u64) -> Detached {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let status = PeerSession::<MockPeerTransport>::new(id.clone(), generation).status();
        let handle = SessionHandle::new(
            id.clone(),
            generation,
            commands_tx,
            CancellationToken::new(),
            CancellationToken::new(),
            watch::channel(status).1,
        );
        Detached { handle, commands }
    }

    #[test]
    fn at_most_one_session_per_participant() {
        let registry = ConnectionRegistry::new();
        let id = ParticipantId::from("2");

        let (first, created) = registry.get_or_create(&id, |generation, predecessor| {
            assert!(predecessor.is_none());
            detached(&id, generation).handle
        });
        assert!(created);

        let (second, created) =
            registry.get_or_create(&id, |_, _| unreachable!("session already exists"));
        assert!(!created);
        assert_eq!(first.generation(), second.generation());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_tears_down_and_hands_predecessor_to_successor() {
        let registry = ConnectionRegistry::new();
        let id = ParticipantId::from("2");
        let (first, _) =
            registry.get_or_create(&id, |generation, _| detached(&id, generation).handle);

        let removed = registry.remove(&id).unwrap();
        assert!(removed.cancel.is_cancelled());
        assert!(!registry.is_live(&id, first.generation()));
        assert!(registry.remove(&id).is_none());

        let (second, created) = registry.get_or_create(&id, |generation, predecessor| {
            let predecessor = predecessor.expect("first session still retiring");
            assert!(!predecessor.is_cancelled());
            detached(&id, generation).handle
        });
        assert!(created);
        assert_ne!(first.generation(), second.generation());
        assert!(registry.is_live(&id, second.generation()));

        registry.retire(&id, first.generation());
        let (_, created) = registry.get_or_create(&id, |_, _| unreachable!());
        assert!(!created);
    }

    #[test]
    fn remove_if_current_ignores_older_generations() {
        let registry = ConnectionRegistry::new();
        let id = ParticipantId::from("2");
        let (first, _) =
            registry.get_or_create(&id, |generation, _| detached(&id, generation).handle);
        registry.remove(&id);
        let (second, _) =
            registry.get_or_create(&id, |generation, _| detached(&id, generation).handle);

        assert!(!registry.remove_if_current(&id, first.generation()));
        assert!(registry.is_live(&id, second.generation()));
        assert!(registry.remove_if_current(&id, second.generation()));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_tears_down_everything() {
        let registry = ConnectionRegistry::new();
        let ids: Vec<ParticipantId> = vec!["10".into(), "9".into(), "abc".into()];
        for id in &ids {
            registry.get_or_create(id, |generation, _| detached(id, generation).handle);
        }
        assert_eq!(
            registry.participants(),
            vec![
                ParticipantId::from("9"),
                ParticipantId::from("10"),
                ParticipantId::from("abc")
            ]
        );

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|handle| handle.cancel.is_cancelled()));
        assert!(registry.is_empty());
    }

    #[test]
    fn retiring_tracks_every_unfinished_generation() {
        let registry = ConnectionRegistry::new();
        let id = ParticipantId::from("2");
        let (first, _) =
            registry.get_or_create(&id, |generation, _| detached(&id, generation).handle);
        registry.remove(&id);
        let (second, _) =
            registry.get_or_create(&id, |generation, _| detached(&id, generation).handle);
        registry.remove(&id);

        assert_eq!(registry.retiring().len(), 2);
        registry.get_or_create(&id, |generation, predecessor| {
            let predecessor = predecessor.expect("second session still retiring");
            assert!(!predecessor.is_cancelled());
            detached(&id, generation).handle
        });

        registry.retire(&id, first.generation());
        assert_eq!(registry.retiring().len(), 1);
        registry.retire(&id, second.generation());
        assert!(registry.retiring().is_empty());
    }

    #[test]
    fn commands_reach_the_session_in_order() {
        let id = ParticipantId::from("2");
        let mut session = detached(&id, 0);

        assert!(session.handle.send(SessionCommand::Connect));
        assert!(session.handle.send(SessionCommand::Retry));
        assert!(matches!(
            session.commands.try_recv(),
            Ok(SessionCommand::Connect)
        ));
        assert!(matches!(session.commands.try_recv(), Ok(SessionCommand::Retry)));

        drop(session.commands);
        assert!(!session.handle.send(SessionCommand::Connect));
    }
}
