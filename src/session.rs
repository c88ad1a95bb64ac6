//! Session records and read models
//!
//! A session is the unit of isolation: one game in one chat. All mutation
//! goes through the coordinator, which holds the session's lock for the
//! duration of a single transition; the types here are plain data.

use crate::currency::CurrencyId;
use crate::games::{GameKind, GameState};
use crate::registry::SessionKey;
use crate::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Live state of one (chat, game) session
#[derive(Debug)]
pub struct Session {
    pub key: SessionKey,
    pub id: String,
    /// Stake held per (user, currency), backed by successful ledger debits
    pub escrow: HashMap<(UserId, CurrencyId), u64>,
    pub created_at: DateTime<Utc>,
    pub last_active: Instant,
    /// Bumped on every accepted action; stale submissions are rejected
    pub revision: u64,
    pub state: GameState,
}

impl Session {
    pub fn new(key: SessionKey, state: GameState) -> Self {
        Self {
            key,
            id: Uuid::new_v4().to_string(),
            escrow: HashMap::new(),
            created_at: Utc::now(),
            last_active: Instant::now(),
            revision: 0,
            state,
        }
    }

    /// Record activity for the abandonment sweep
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Total stake currently escrowed across all participants
    pub fn escrow_total(&self) -> u64 {
        self.escrow.values().sum()
    }

    /// Read model handed back to the transport layer
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            chat: self.key.chat,
            game: self.key.kind,
            revision: self.revision,
            phase: self.state.phase().to_string(),
            terminal: self.state.is_terminal(),
            participants: self.state.participants(),
            escrow_total: self.escrow_total(),
            created_at: self.created_at,
            detail: self.state.detail(),
        }
    }
}

/// Snapshot of a session for the transport layer; never aliases live state
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub chat: crate::ChatId,
    pub game: GameKind,
    pub revision: u64,
    pub phase: String,
    pub terminal: bool,
    pub participants: Vec<UserId>,
    pub escrow_total: u64,
    pub created_at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{CasinoGame, CasinoRound};
    use crate::ChatId;

    #[test]
    fn test_new_session_starts_at_revision_zero() {
        let key = SessionKey::new(ChatId(1), GameKind::Casino);
        let session = Session::new(key, GameState::Casino(CasinoRound::new(CasinoGame::Dice)));
        assert_eq!(session.revision, 0);
        assert_eq!(session.escrow_total(), 0);
        assert!(!session.state.is_terminal());
    }

    #[test]
    fn test_view_reflects_state() {
        let key = SessionKey::new(ChatId(1), GameKind::Casino);
        let mut session =
            Session::new(key, GameState::Casino(CasinoRound::new(CasinoGame::Slots)));
        session.escrow.insert(
            (UserId(5), CurrencyId::new("voxcent")),
            75,
        );
        let view = session.view();
        assert_eq!(view.game, GameKind::Casino);
        assert_eq!(view.phase, "awaiting_bet");
        assert_eq!(view.escrow_total, 75);
        assert!(!view.terminal);
        assert_eq!(view.detail["table"], "slots");
    }
}
