//! Voxbank - concurrent session & ledger engine for chat games
//!
//! Tracks multi-currency balances per user and runs concurrent multi-party
//! mini-games (casino rounds, UNO matches, nonsense stories) across many chat
//! rooms, one engine instance shared by every chat the bot serves. The chat
//! transport and the persistence store are external collaborators: the
//! transport calls [`coordinator::SessionCoordinator`], the store implements
//! [`snapshot::SnapshotSink`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod coordinator;
pub mod currency;
pub mod errors;
pub mod games;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use config::{ConfigLoader, EngineConfig};
pub use coordinator::SessionCoordinator;
pub use currency::{CurrencyId, CurrencyPolicy, CurrencySpec};
pub use errors::{EngineError, EngineResult};
pub use games::{GameKind, PlayerAction, StartGame};
pub use ledger::LedgerStore;
pub use registry::SessionRegistry;
pub use session::SessionView;
pub use snapshot::{EngineSnapshot, SnapshotSink};

/// Transport-assigned user identity
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned chat room identity
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied token used to deduplicate retried ledger mutations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpToken(Uuid);

impl OpToken {
    /// Mint a fresh token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OpToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(UserId(42).to_string(), "42");
        assert_eq!(ChatId(-1001).to_string(), "-1001");
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(OpToken::new(), OpToken::new());
    }
}
