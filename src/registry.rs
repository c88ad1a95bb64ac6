//! Game session registry
//!
//! Maps (chat, game kind) to at most one live session. Acquire is atomic
//! through the concurrent map's entry API: of two racing "start game"
//! requests exactly one wins the slot and the other observes
//! `SessionAlreadyActive`. Stale sessions are enumerated for the
//! coordinator's abandonment sweep rather than reclaimed here, so this
//! module never touches the ledger.

use crate::errors::{EngineError, EngineResult};
use crate::games::GameKind;
use crate::session::Session;
use crate::ChatId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Registry key: one slot per chat and game family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat: ChatId,
    pub kind: GameKind,
}

impl SessionKey {
    pub fn new(chat: ChatId, kind: GameKind) -> Self {
        Self { chat, kind }
    }
}

/// Concurrent map of live sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Claim the slot for a new session; fails if one is already live
    pub fn acquire(&self, key: SessionKey, session: Session) -> EngineResult<Arc<Mutex<Session>>> {
        match self.sessions.entry(key) {
            Entry::Occupied(_) => Err(EngineError::SessionAlreadyActive(key.kind.to_string())),
            Entry::Vacant(slot) => {
                debug!(chat = %key.chat, kind = %key.kind, "session slot acquired");
                let session = Arc::new(Mutex::new(session));
                slot.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Free the slot; returns false if it was already free
    pub fn release(&self, key: &SessionKey) -> bool {
        let released = self.sessions.remove(key).is_some();
        if released {
            debug!(chat = %key.chat, kind = %key.kind, "session slot released");
        }
        released
    }

    /// Keys of sessions with no accepted action for longer than `timeout`.
    ///
    /// Session locks are taken only after iteration finishes so the sweep
    /// never holds a map shard and a session lock at the same time.
    pub fn stale_keys(&self, timeout: Duration) -> Vec<SessionKey> {
        let candidates: Vec<(SessionKey, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        candidates
            .into_iter()
            .filter(|(_, session)| {
                session.lock().unwrap().last_active.elapsed() >= timeout
            })
            .map(|(key, _)| key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live sessions, for snapshotting escrow
    pub fn live_sessions(&self) -> Vec<Arc<Mutex<Session>>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
