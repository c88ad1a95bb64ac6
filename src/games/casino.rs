//! Casino round state machine: roulette, slots and dice
//!
//! One round per session: players place bets (escrowed on acceptance),
//! betting is locked, the outcome is sampled from the injected random source
//! and the round resolves with the fixed paytable of its table. Always
//! terminal after one spin.

use crate::errors::{EngineError, EngineResult};
use crate::games::{ApplyCtx, Effect, PlayerAction};
use crate::UserId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Casino table variants
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CasinoGame {
    Roulette,
    Slots,
    Dice,
}

impl fmt::Display for CasinoGame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasinoGame::Roulette => write!(f, "roulette"),
            CasinoGame::Slots => write!(f, "slots"),
            CasinoGame::Dice => write!(f, "dice"),
        }
    }
}

/// What a bet is staked on
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum BetCall {
    /// Straight-up number bet, 0-36
    Roulette { number: u8 },
    Slots,
    Dice,
}

impl BetCall {
    fn game(&self) -> CasinoGame {
        match self {
            BetCall::Roulette { .. } => CasinoGame::Roulette,
            BetCall::Slots => CasinoGame::Slots,
            BetCall::Dice => CasinoGame::Dice,
        }
    }
}

/// Slot machine reel symbols
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SlotSymbol {
    Cherry,
    Lemon,
    Orange,
    Melon,
    Diamond,
    Crown,
}

impl SlotSymbol {
    /// Reel distribution: commons appear four times as often as rares
    const WEIGHTED: [SlotSymbol; 18] = [
        SlotSymbol::Cherry,
        SlotSymbol::Cherry,
        SlotSymbol::Cherry,
        SlotSymbol::Cherry,
        SlotSymbol::Lemon,
        SlotSymbol::Lemon,
        SlotSymbol::Lemon,
        SlotSymbol::Lemon,
        SlotSymbol::Orange,
        SlotSymbol::Orange,
        SlotSymbol::Orange,
        SlotSymbol::Orange,
        SlotSymbol::Melon,
        SlotSymbol::Melon,
        SlotSymbol::Melon,
        SlotSymbol::Melon,
        SlotSymbol::Diamond,
        SlotSymbol::Crown,
    ];

    fn is_rare(self) -> bool {
        matches!(self, SlotSymbol::Diamond | SlotSymbol::Crown)
    }

    fn triple_multiplier(self) -> u64 {
        if self.is_rare() {
            50
        } else {
            8
        }
    }

    fn pair_multiplier(self) -> u64 {
        if self.is_rare() {
            5
        } else {
            2
        }
    }
}

/// Round phases
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CasinoPhase {
    AwaitingBet,
    AwaitingOutcome,
    Resolved,
}

/// An accepted, escrowed bet
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PlacedBet {
    pub player: UserId,
    pub amount: u64,
    pub call: BetCall,
}

/// The sampled result; per-player entries parallel the bet order
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum CasinoOutcome {
    Roulette { pocket: u8 },
    Dice { rolls: Vec<u8> },
    Slots { reels: Vec<[SlotSymbol; 3]> },
}

/// A single betting round on one table
#[derive(Clone, Debug)]
pub struct CasinoRound {
    game: CasinoGame,
    phase: CasinoPhase,
    bets: Vec<PlacedBet>,
    outcome: Option<CasinoOutcome>,
}

impl CasinoRound {
    pub fn new(game: CasinoGame) -> Self {
        Self {
            game,
            phase: CasinoPhase::AwaitingBet,
            bets: vec![],
            outcome: None,
        }
    }

    pub fn game(&self) -> CasinoGame {
        self.game
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == CasinoPhase::Resolved
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            CasinoPhase::AwaitingBet => "awaiting_bet",
            CasinoPhase::AwaitingOutcome => "awaiting_outcome",
            CasinoPhase::Resolved => "resolved",
        }
    }

    pub fn participants(&self) -> Vec<UserId> {
        self.bets.iter().map(|bet| bet.player).collect()
    }

    pub fn outcome(&self) -> Option<&CasinoOutcome> {
        self.outcome.as_ref()
    }

    fn has_bet(&self, player: UserId) -> bool {
        self.bets.iter().any(|bet| bet.player == player)
    }

    pub fn apply(
        &self,
        action: &PlayerAction,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(CasinoRound, Vec<Effect>)> {
        match action {
            PlayerAction::Bet { amount, call } => self.place_bet(*amount, *call, ctx),
            PlayerAction::LockBets => self.lock_bets(ctx),
            PlayerAction::Spin => self.spin(ctx),
            _ => Err(EngineError::InvalidAction(
                "not a casino action".to_string(),
            )),
        }
    }

    fn place_bet(
        &self,
        amount: u64,
        call: BetCall,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(CasinoRound, Vec<Effect>)> {
        if self.phase != CasinoPhase::AwaitingBet {
            return Err(EngineError::InvalidAction(
                "betting is closed for this round".to_string(),
            ));
        }
        if call.game() != self.game {
            return Err(EngineError::InvalidAction(format!(
                "this is a {} table",
                self.game
            )));
        }
        if let BetCall::Roulette { number } = call {
            if number > 36 {
                return Err(EngineError::InvalidAction(
                    "roulette number must be 0-36".to_string(),
                ));
            }
        }
        let min_bet = ctx.config.casino.min_bet;
        if amount < min_bet {
            return Err(EngineError::InvalidAction(format!(
                "minimum bet is {}",
                min_bet
            )));
        }
        if self.has_bet(ctx.actor) {
            return Err(EngineError::InvalidAction(
                "you already placed a bet this round".to_string(),
            ));
        }

        let mut next = self.clone();
        next.bets.push(PlacedBet {
            player: ctx.actor,
            amount,
            call,
        });
        let effects = vec![Effect::Escrow {
            user: ctx.actor,
            currency: ctx.config.casino.stake_currency.clone(),
            amount,
        }];
        Ok((next, effects))
    }

    fn lock_bets(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(CasinoRound, Vec<Effect>)> {
        if self.phase != CasinoPhase::AwaitingBet {
            return Err(EngineError::InvalidAction(
                "betting is not open".to_string(),
            ));
        }
        if self.bets.is_empty() {
            return Err(EngineError::InvalidAction(
                "no bets have been placed".to_string(),
            ));
        }
        if !self.has_bet(ctx.actor) {
            return Err(EngineError::InvalidAction(
                "only a player with a bet may lock the round".to_string(),
            ));
        }
        let mut next = self.clone();
        next.phase = CasinoPhase::AwaitingOutcome;
        Ok((next, vec![]))
    }

    fn spin(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(CasinoRound, Vec<Effect>)> {
        if self.phase != CasinoPhase::AwaitingOutcome {
            return Err(EngineError::InvalidAction(
                "the round is not ready to spin".to_string(),
            ));
        }
        if !self.has_bet(ctx.actor) {
            return Err(EngineError::InvalidAction(
                "only a player with a bet may spin".to_string(),
            ));
        }

        let outcome = self.sample_outcome(ctx);
        let currency = ctx.config.casino.stake_currency.clone();
        let mut effects = vec![];
        for (slot, bet) in self.bets.iter().enumerate() {
            let multiplier = outcome_multiplier(&outcome, slot, &bet.call);
            if multiplier > 0 {
                effects.push(Effect::Payout {
                    user: bet.player,
                    currency: currency.clone(),
                    amount: bet.amount.saturating_mul(multiplier),
                });
            }
        }

        let mut next = self.clone();
        next.phase = CasinoPhase::Resolved;
        next.outcome = Some(outcome);
        Ok((next, effects))
    }

    fn sample_outcome(&self, ctx: &mut ApplyCtx<'_>) -> CasinoOutcome {
        match self.game {
            CasinoGame::Roulette => CasinoOutcome::Roulette {
                pocket: ctx.rng.gen_range(0..=36),
            },
            CasinoGame::Dice => CasinoOutcome::Dice {
                rolls: self.bets.iter().map(|_| ctx.rng.gen_range(1..=6)).collect(),
            },
            CasinoGame::Slots => CasinoOutcome::Slots {
                reels: self
                    .bets
                    .iter()
                    .map(|_| {
                        [
                            sample_symbol(ctx.rng),
                            sample_symbol(ctx.rng),
                            sample_symbol(ctx.rng),
                        ]
                    })
                    .collect(),
            },
        }
    }

    pub fn detail(&self) -> serde_json::Value {
        serde_json::json!({
            "table": self.game.to_string(),
            "phase": self.phase_name(),
            "bets": &self.bets,
            "outcome": &self.outcome,
        })
    }
}

fn sample_symbol(rng: &mut dyn rand::RngCore) -> SlotSymbol {
    SlotSymbol::WEIGHTED[rng.gen_range(0..SlotSymbol::WEIGHTED.len())]
}

/// Payout multiplier for one bet against the sampled outcome
fn outcome_multiplier(outcome: &CasinoOutcome, slot: usize, call: &BetCall) -> u64 {
    match (outcome, call) {
        (CasinoOutcome::Roulette { pocket }, BetCall::Roulette { number }) => {
            roulette_multiplier(*pocket, *number)
        }
        (CasinoOutcome::Dice { rolls }, BetCall::Dice) => dice_multiplier(rolls[slot]),
        (CasinoOutcome::Slots { reels }, BetCall::Slots) => slots_multiplier(&reels[slot]),
        _ => 0,
    }
}

/// Straight-up pays x35, matching parity pays x2
fn roulette_multiplier(pocket: u8, number: u8) -> u64 {
    if pocket == number {
        35
    } else if pocket % 2 == number % 2 {
        2
    } else {
        0
    }
}

/// 1 or 6 pays x3
fn dice_multiplier(roll: u8) -> u64 {
    if roll == 1 || roll == 6 {
        3
    } else {
        0
    }
}

/// Any pair or triple pays; rares pay more
fn slots_multiplier(reels: &[SlotSymbol; 3]) -> u64 {
    for symbol in reels {
        let count = reels.iter().filter(|r| *r == symbol).count();
        if count == 3 {
            return symbol.triple_multiplier();
        }
        if count == 2 {
            return symbol.pair_multiplier();
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx<'a>(actor: i64, rng: &'a mut StdRng, config: &'a EngineConfig) -> ApplyCtx<'a> {
        ApplyCtx {
            actor: UserId(actor),
            is_admin: false,
            rng,
            config,
        }
    }

    fn bet(amount: u64, call: BetCall) -> PlayerAction {
        PlayerAction::Bet { amount, call }
    }

    #[test]
    fn test_bet_escrows_stake() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Dice);
        let (next, effects) = round
            .apply(&bet(50, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Escrow {
                user: UserId(1),
                currency: config.casino.stake_currency.clone(),
                amount: 50,
            }]
        );
        assert_eq!(next.participants(), vec![UserId(1)]);
    }

    #[test]
    fn test_bet_below_minimum_rejected() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Dice);
        let err = round
            .apply(&bet(10, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_double_bet_rejected() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Dice);
        let (round, _) = round
            .apply(&bet(50, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap();
        let err = round
            .apply(&bet(50, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_bet_must_match_table() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Roulette);
        let err = round
            .apply(&bet(50, BetCall::Slots), &mut ctx(1, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_roulette_number_bounds() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Roulette);
        let err = round
            .apply(
                &bet(50, BetCall::Roulette { number: 37 }),
                &mut ctx(1, &mut rng, &config),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_spin_requires_locked_bets() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Dice);
        let (round, _) = round
            .apply(&bet(50, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap();
        let err = round
            .apply(&PlayerAction::Spin, &mut ctx(1, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_lock_without_bets_rejected() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let round = CasinoRound::new(CasinoGame::Dice);
        let err = round
            .apply(&PlayerAction::LockBets, &mut ctx(1, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    fn run_dice_round(seed: u64) -> (CasinoRound, Vec<Effect>) {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let round = CasinoRound::new(CasinoGame::Dice);
        let (round, _) = round
            .apply(&bet(50, BetCall::Dice), &mut ctx(1, &mut rng, &config))
            .unwrap();
        let (round, _) = round
            .apply(&bet(60, BetCall::Dice), &mut ctx(2, &mut rng, &config))
            .unwrap();
        let (round, _) = round
            .apply(&PlayerAction::LockBets, &mut ctx(1, &mut rng, &config))
            .unwrap();
        round
            .apply(&PlayerAction::Spin, &mut ctx(1, &mut rng, &config))
            .unwrap()
    }

    #[test]
    fn test_dice_payouts_follow_rolls() {
        let (round, effects) = run_dice_round(42);
        assert!(round.is_resolved());
        let rolls = match round.outcome().unwrap() {
            CasinoOutcome::Dice { rolls } => rolls.clone(),
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(rolls.len(), 2);
        assert!(rolls.iter().all(|r| (1..=6).contains(r)));

        let stakes = [50u64, 60u64];
        let players = [UserId(1), UserId(2)];
        let mut expected = vec![];
        for i in 0..2 {
            if rolls[i] == 1 || rolls[i] == 6 {
                expected.push(Effect::Payout {
                    user: players[i],
                    currency: crate::currency::CurrencyId::new("voxcent"),
                    amount: stakes[i] * 3,
                });
            }
        }
        assert_eq!(effects, expected);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let (a, _) = run_dice_round(7);
        let (b, _) = run_dice_round(7);
        assert_eq!(a.outcome(), b.outcome());
    }

    #[test]
    fn test_roulette_multiplier_table() {
        assert_eq!(roulette_multiplier(17, 17), 35);
        assert_eq!(roulette_multiplier(18, 22), 2);
        assert_eq!(roulette_multiplier(0, 22), 2);
        assert_eq!(roulette_multiplier(18, 21), 0);
    }

    #[test]
    fn test_slots_multiplier_table() {
        use SlotSymbol::*;
        assert_eq!(slots_multiplier(&[Cherry, Cherry, Cherry]), 8);
        assert_eq!(slots_multiplier(&[Crown, Crown, Crown]), 50);
        assert_eq!(slots_multiplier(&[Cherry, Cherry, Lemon]), 2);
        assert_eq!(slots_multiplier(&[Diamond, Lemon, Diamond]), 5);
        assert_eq!(slots_multiplier(&[Cherry, Lemon, Orange]), 0);
    }
}
