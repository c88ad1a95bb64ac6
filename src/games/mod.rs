//! Game state machine family
//!
//! Every game variant sits behind the tagged [`GameState`] enum and the one
//! shared `apply` contract: state plus action in, new state plus ledger
//! effects out. Transitions are pure; nothing in this module touches the
//! ledger or mutates shared state, which keeps every game rule testable in
//! isolation. The coordinator owns applying effects and committing states.

pub mod casino;
pub mod nonsense;
pub mod uno;

use crate::config::EngineConfig;
use crate::currency::CurrencyId;
use crate::errors::{EngineError, EngineResult};
use crate::UserId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use casino::{BetCall, CasinoGame, CasinoRound};
pub use nonsense::NonsenseStory;
pub use uno::{Card, CardColor, UnoMatch};

/// The game families; at most one session per (chat, kind) is live at a time
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Casino,
    Uno,
    Nonsense,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Casino => write!(f, "casino"),
            GameKind::Uno => write!(f, "uno"),
            GameKind::Nonsense => write!(f, "nonsense"),
        }
    }
}

/// Session-opening request, carried by `PlayerAction::Start`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum StartGame {
    Casino { variant: CasinoGame },
    Uno,
    Nonsense,
}

impl StartGame {
    pub fn kind(&self) -> GameKind {
        match self {
            StartGame::Casino { .. } => GameKind::Casino,
            StartGame::Uno => GameKind::Uno,
            StartGame::Nonsense => GameKind::Nonsense,
        }
    }
}

/// An instantaneous player input event
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerAction {
    /// Open a session for the given game
    Start(StartGame),
    /// Enter a lobby (UNO) or an open story (nonsense)
    Join,
    /// Close the lobby and deal (UNO)
    Begin,
    /// Stake a casino bet
    Bet { amount: u64, call: BetCall },
    /// Stop accepting casino bets
    LockBets,
    /// Sample the casino outcome and resolve
    Spin,
    /// Play a card (UNO)
    Play {
        card: Card,
        #[serde(skip_serializing_if = "Option::is_none")]
        chosen_color: Option<CardColor>,
    },
    /// Draw a card and skip the turn (UNO)
    Draw,
    /// Append a story line (nonsense)
    Contribute { text: String },
    /// Close the story (nonsense, admin only)
    Close,
}

/// A ledger mutation requested by a game transition, applied only by the
/// coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Debit a stake from a player and hold it against the session
    Escrow {
        user: UserId,
        currency: CurrencyId,
        amount: u64,
    },
    /// Credit a resolution payout
    Payout {
        user: UserId,
        currency: CurrencyId,
        amount: u64,
    },
    /// Return previously escrowed stake
    Refund {
        user: UserId,
        currency: CurrencyId,
        amount: u64,
    },
}

/// Everything a transition may consult besides its own state
pub struct ApplyCtx<'a> {
    pub actor: UserId,
    pub is_admin: bool,
    /// Policy-supplied random source; seedable for deterministic tests
    pub rng: &'a mut dyn RngCore,
    pub config: &'a EngineConfig,
}

/// Tagged union over the game variants
#[derive(Clone, Debug)]
pub enum GameState {
    Casino(CasinoRound),
    Uno(UnoMatch),
    Nonsense(NonsenseStory),
    /// Settlement for this session was aborted; no further actions accepted
    Failed { reason: String },
}

impl GameState {
    /// Initial state for a freshly started session
    pub fn create(start: &StartGame, ctx: &mut ApplyCtx<'_>) -> Self {
        match start {
            StartGame::Casino { variant } => GameState::Casino(CasinoRound::new(*variant)),
            StartGame::Uno => GameState::Uno(UnoMatch::new()),
            StartGame::Nonsense => GameState::Nonsense(NonsenseStory::new(ctx)),
        }
    }

    /// Advance the state machine by one action.
    ///
    /// Pure: `self` is never mutated; the successor state and the ledger
    /// effects to apply are returned to the caller.
    pub fn apply(
        &self,
        action: &PlayerAction,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(GameState, Vec<Effect>)> {
        match self {
            GameState::Casino(round) => {
                let (next, effects) = round.apply(action, ctx)?;
                Ok((GameState::Casino(next), effects))
            }
            GameState::Uno(game) => {
                let (next, effects) = game.apply(action, ctx)?;
                Ok((GameState::Uno(next), effects))
            }
            GameState::Nonsense(story) => {
                let (next, effects) = story.apply(action, ctx)?;
                Ok((GameState::Nonsense(next), effects))
            }
            GameState::Failed { .. } => Err(EngineError::InvalidAction(
                "session has failed and accepts no further actions".to_string(),
            )),
        }
    }

    /// Terminal states settle their effects and release the session slot
    pub fn is_terminal(&self) -> bool {
        match self {
            GameState::Casino(round) => round.is_resolved(),
            GameState::Uno(game) => game.is_finished(),
            GameState::Nonsense(story) => story.is_closed(),
            GameState::Failed { .. } => true,
        }
    }

    pub fn kind(&self) -> Option<GameKind> {
        match self {
            GameState::Casino(_) => Some(GameKind::Casino),
            GameState::Uno(_) => Some(GameKind::Uno),
            GameState::Nonsense(_) => Some(GameKind::Nonsense),
            GameState::Failed { .. } => None,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            GameState::Casino(round) => round.phase_name(),
            GameState::Uno(game) => game.phase_name(),
            GameState::Nonsense(story) => story.phase_name(),
            GameState::Failed { .. } => "failed",
        }
    }

    /// Participants in join order
    pub fn participants(&self) -> Vec<UserId> {
        match self {
            GameState::Casino(round) => round.participants(),
            GameState::Uno(game) => game.participants(),
            GameState::Nonsense(story) => story.participants(),
            GameState::Failed { .. } => vec![],
        }
    }

    /// Public per-game detail for session views
    pub fn detail(&self) -> serde_json::Value {
        match self {
            GameState::Casino(round) => round.detail(),
            GameState::Uno(game) => game.detail(),
            GameState::Nonsense(story) => story.detail(),
            GameState::Failed { reason } => serde_json::json!({ "reason": reason }),
        }
    }
}
