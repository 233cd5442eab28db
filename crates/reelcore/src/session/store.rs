//! In-memory session registry.
//!
//! Only `create`, `get`, `update` and the `evict` calls are exposed, all by session
//! id. Closures run under the shard lock of a single entry, so they must be
//! short and must not block or await.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::session::{Phase, Session, SessionId};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A pipeline run already owns this session id.
    #[error("Session is busy ({phase})")]
    Busy { phase: Phase },
}

#[derive(Debug)]
pub enum Created {
    Fresh,
    /// An idle session for the same id was replaced and handed back.
    Replaced(Box<Session>),
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` unless a pipeline is running for its id.
    ///
    /// Sessions that are still waiting for a selection (or already
    /// finished) are replaced.
    pub fn create(&self, session: Session) -> Result<Created, StoreError> {
        match self.sessions.entry(session.id) {
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(Created::Fresh)
            }
            Entry::Occupied(mut slot) => {
                let phase = slot.get().phase;
                if phase.is_in_flight() {
                    return Err(StoreError::Busy { phase });
                }
                Ok(Created::Replaced(Box::new(slot.insert(session))))
            }
        }
    }

    /// Reads from a session.
    pub fn get<R>(&self, id: SessionId, read: impl FnOnce(&Session) -> R) -> Option<R> {
        self.sessions.get(&id).map(|entry| read(entry.value()))
    }

    /// Mutates a session in place.
    pub fn update<R>(&self, id: SessionId, change: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(&id).map(|mut entry| change(entry.value_mut()))
    }

    pub fn phase(&self, id: SessionId) -> Option<Phase> {
        self.get(id, |s| s.phase)
    }

    pub fn evict(&self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Evicts the session only while `owned` holds for it.
    pub fn evict_if(&self, id: SessionId, owned: impl FnOnce(&Session) -> bool) -> Option<Session> {
        self.sessions.remove_if(&id, |_, session| owned(session)).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatId;
    use crate::download::catalog::Catalog;

    fn session(chat: i64) -> Session {
        let catalog = Catalog {
            title: None,
            formats: Vec::new(),
            preferred_audio: None,
        };
        Session::awaiting_selection(SessionId::for_chat(ChatId(chat)), catalog)
    }

    #[test]
    fn test_create_get_evict() {
        let store = SessionStore::new();
        let id = SessionId::for_chat(ChatId(1));

        assert!(matches!(store.create(session(1)), Ok(Created::Fresh)));
        assert_eq!(store.phase(id), Some(Phase::AwaitingSelection));
        assert!(store.evict(id).is_some());
        assert!(store.is_empty());
        assert!(store.evict(id).is_none());
    }

    #[test]
    fn test_awaiting_session_is_replaced() {
        let store = SessionStore::new();
        store.create(session(1)).unwrap();
        let old_nonce = store.get(SessionId::for_chat(ChatId(1)), |s| s.nonce.clone()).unwrap();

        match store.create(session(1)) {
            Ok(Created::Replaced(old)) => assert_eq!(old.nonce, old_nonce),
            other => panic!("expected replacement, got {:?}", other),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_in_flight_session_is_not_replaced() {
        let store = SessionStore::new();
        let id = SessionId::for_chat(ChatId(1));
        store.create(session(1)).unwrap();
        store.update(id, |s| s.phase = Phase::Transcoding);

        assert_eq!(
            store.create(session(1)).unwrap_err(),
            StoreError::Busy {
                phase: Phase::Transcoding
            }
        );
        assert_eq!(store.phase(id), Some(Phase::Transcoding));
    }

    #[test]
    fn test_evict_if_spares_a_replacement() {
        let store = SessionStore::new();
        let id = SessionId::for_chat(ChatId(1));
        store.create(session(1)).unwrap();
        let first = store.get(id, |s| s.nonce.clone()).unwrap();
        store.update(id, |s| s.phase = Phase::Done);
        store.create(session(1)).unwrap();

        assert!(store.evict_if(id, |s| s.nonce == first).is_none());
        assert_eq!(store.phase(id), Some(Phase::AwaitingSelection));

        let second = store.get(id, |s| s.nonce.clone()).unwrap();
        assert!(store.evict_if(id, |s| s.nonce == second).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_missing_session() {
        let store = SessionStore::new();
        assert!(store.update(SessionId::for_chat(ChatId(9)), |s| s.phase = Phase::Done).is_none());
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        store.create(session(1)).unwrap();
        store.create(session(2)).unwrap();
        store.update(SessionId::for_chat(ChatId(1)), |s| s.phase = Phase::Downloading);

        assert_eq!(store.phase(SessionId::for_chat(ChatId(2))), Some(Phase::AwaitingSelection));
    }
}
