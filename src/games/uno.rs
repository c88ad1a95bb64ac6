//! UNO match state machine
//!
//! Lobby until at least two players joined and the match begins; the turn
//! rotation is fixed at begin time (no mid-match joins). Moves validate
//! against the top of the discard pile and the acting player's identity.
//! The match finishes when a hand empties; with a configured wager the
//! winner collects the pooled stakes, otherwise there is no ledger effect.

use crate::errors::{EngineError, EngineResult};
use crate::games::{ApplyCtx, Effect, PlayerAction};
use crate::UserId;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The four playable colors
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CardColor {
    Red,
    Green,
    Blue,
    Yellow,
}

impl CardColor {
    pub const ALL: [CardColor; 4] = [
        CardColor::Red,
        CardColor::Green,
        CardColor::Blue,
        CardColor::Yellow,
    ];
}

impl fmt::Display for CardColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardColor::Red => write!(f, "red"),
            CardColor::Green => write!(f, "green"),
            CardColor::Blue => write!(f, "blue"),
            CardColor::Yellow => write!(f, "yellow"),
        }
    }
}

/// A single UNO card
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "face", rename_all = "snake_case")]
pub enum Card {
    Number { color: CardColor, value: u8 },
    Skip { color: CardColor },
    Reverse { color: CardColor },
    DrawTwo { color: CardColor },
    Wild,
    WildDrawFour,
}

impl Card {
    pub fn color(&self) -> Option<CardColor> {
        match self {
            Card::Number { color, .. }
            | Card::Skip { color }
            | Card::Reverse { color }
            | Card::DrawTwo { color } => Some(*color),
            Card::Wild | Card::WildDrawFour => None,
        }
    }

    pub fn is_wild(&self) -> bool {
        matches!(self, Card::Wild | Card::WildDrawFour)
    }

    /// A card is playable if it is wild, shares the active color, or shares
    /// the top card's face
    fn is_playable(&self, active_color: CardColor, top: &Card) -> bool {
        if self.is_wild() {
            return true;
        }
        if self.color() == Some(active_color) {
            return true;
        }
        same_face(self, top)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Card::Number { color, value } => write!(f, "{} {}", color, value),
            Card::Skip { color } => write!(f, "{} skip", color),
            Card::Reverse { color } => write!(f, "{} reverse", color),
            Card::DrawTwo { color } => write!(f, "{} +2", color),
            Card::Wild => write!(f, "wild"),
            Card::WildDrawFour => write!(f, "wild +4"),
        }
    }
}

fn same_face(a: &Card, b: &Card) -> bool {
    match (a, b) {
        (Card::Number { value: va, .. }, Card::Number { value: vb, .. }) => va == vb,
        (Card::Skip { .. }, Card::Skip { .. })
        | (Card::Reverse { .. }, Card::Reverse { .. })
        | (Card::DrawTwo { .. }, Card::DrawTwo { .. }) => true,
        _ => false,
    }
}

/// Full 108-card deck: per color one 0, two of each 1-9, two of each
/// skip/reverse/+2; four wilds and four wild +4s
fn build_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(108);
    for color in CardColor::ALL {
        deck.push(Card::Number { color, value: 0 });
        for value in 1..=9 {
            deck.push(Card::Number { color, value });
            deck.push(Card::Number { color, value });
        }
        for _ in 0..2 {
            deck.push(Card::Skip { color });
            deck.push(Card::Reverse { color });
            deck.push(Card::DrawTwo { color });
        }
    }
    for _ in 0..4 {
        deck.push(Card::Wild);
        deck.push(Card::WildDrawFour);
    }
    deck
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnoPhase {
    Lobby,
    InProgress,
    Finished,
}

/// One UNO match
#[derive(Clone, Debug)]
pub struct UnoMatch {
    phase: UnoPhase,
    players: Vec<UserId>,
    hands: HashMap<UserId, Vec<Card>>,
    deck: Vec<Card>,
    pile: Vec<Card>,
    current: usize,
    /// 1 clockwise, -1 counter-clockwise
    direction: i8,
    active_color: Option<CardColor>,
    winner: Option<UserId>,
}

impl UnoMatch {
    pub fn new() -> Self {
        Self {
            phase: UnoPhase::Lobby,
            players: vec![],
            hands: HashMap::new(),
            deck: vec![],
            pile: vec![],
            current: 0,
            direction: 1,
            active_color: None,
            winner: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == UnoPhase::Finished
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            UnoPhase::Lobby => "lobby",
            UnoPhase::InProgress => "in_progress",
            UnoPhase::Finished => "finished",
        }
    }

    pub fn participants(&self) -> Vec<UserId> {
        self.players.clone()
    }

    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    /// A player's private hand, for the transport to deliver via DM
    pub fn hand(&self, player: UserId) -> Option<&[Card]> {
        self.hands.get(&player).map(|hand| hand.as_slice())
    }

    pub fn current_player(&self) -> Option<UserId> {
        if self.phase == UnoPhase::InProgress {
            self.players.get(self.current).copied()
        } else {
            None
        }
    }

    pub fn apply(
        &self,
        action: &PlayerAction,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(UnoMatch, Vec<Effect>)> {
        match action {
            PlayerAction::Join => self.join(ctx),
            PlayerAction::Begin => self.begin(ctx),
            PlayerAction::Play { card, chosen_color } => self.play(*card, *chosen_color, ctx),
            PlayerAction::Draw => self.draw_and_pass(ctx),
            _ => Err(EngineError::InvalidAction("not an uno action".to_string())),
        }
    }

    fn join(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(UnoMatch, Vec<Effect>)> {
        if self.phase != UnoPhase::Lobby {
            return Err(EngineError::InvalidAction(
                "the match has already started".to_string(),
            ));
        }
        if self.players.contains(&ctx.actor) {
            return Err(EngineError::InvalidAction(
                "you are already in the match".to_string(),
            ));
        }
        let mut next = self.clone();
        next.players.push(ctx.actor);

        let mut effects = vec![];
        if let Some(ref wager) = ctx.config.uno.wager {
            effects.push(Effect::Escrow {
                user: ctx.actor,
                currency: wager.currency.clone(),
                amount: wager.amount,
            });
        }
        Ok((next, effects))
    }

    fn begin(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(UnoMatch, Vec<Effect>)> {
        if self.phase != UnoPhase::Lobby {
            return Err(EngineError::InvalidAction(
                "the match has already started".to_string(),
            ));
        }
        if !self.players.contains(&ctx.actor) {
            return Err(EngineError::InvalidAction(
                "join the match before beginning it".to_string(),
            ));
        }
        if self.players.len() < 2 {
            return Err(EngineError::InvalidAction(
                "need at least 2 players".to_string(),
            ));
        }

        let mut next = self.clone();
        next.deck = build_deck();
        next.deck.shuffle(ctx.rng);
        let players = next.players.clone();
        for player in players {
            let mut hand = Vec::with_capacity(7);
            for _ in 0..7 {
                if let Some(card) = next.deck.pop() {
                    hand.push(card);
                }
            }
            next.hands.insert(player, hand);
        }
        let top = next.deck.pop().ok_or_else(|| {
            EngineError::InvalidAction("deck exhausted while dealing".to_string())
        })?;
        next.pile.push(top);
        next.active_color = Some(match top.color() {
            Some(color) => color,
            None => CardColor::ALL[ctx.rng.gen_range(0..CardColor::ALL.len())],
        });
        next.phase = UnoPhase::InProgress;
        next.current = 0;
        next.direction = 1;
        Ok((next, vec![]))
    }

    fn play(
        &self,
        card: Card,
        chosen_color: Option<CardColor>,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(UnoMatch, Vec<Effect>)> {
        self.ensure_turn(ctx.actor)?;
        let hand = self.hands.get(&ctx.actor).map(Vec::as_slice).unwrap_or(&[]);
        if !hand.contains(&card) {
            return Err(EngineError::InvalidAction(
                "that card is not in your hand".to_string(),
            ));
        }
        let new_color = if card.is_wild() {
            chosen_color.ok_or_else(|| {
                EngineError::InvalidAction("choose a color for the wild card".to_string())
            })?
        } else {
            let top = *self.pile.last().ok_or_else(|| {
                EngineError::InvalidAction("the discard pile is empty".to_string())
            })?;
            let active = self.active_color.ok_or_else(|| {
                EngineError::InvalidAction("no active color".to_string())
            })?;
            if !card.is_playable(active, &top) {
                return Err(EngineError::InvalidAction(
                    "card does not match color or value".to_string(),
                ));
            }
            // Card::color is Some for every non-wild card
            card.color().unwrap_or(active)
        };

        let mut next = self.clone();
        if let Some(hand) = next.hands.get_mut(&ctx.actor) {
            if let Some(pos) = hand.iter().position(|c| *c == card) {
                hand.remove(pos);
            }
        }
        next.pile.push(card);
        next.active_color = Some(new_color);

        match card {
            Card::Skip { .. } => {
                next.advance_turn();
                next.advance_turn();
            }
            Card::Reverse { .. } => {
                next.direction = -next.direction;
                if next.players.len() == 2 {
                    next.advance_turn();
                }
                next.advance_turn();
            }
            Card::DrawTwo { .. } => {
                next.advance_turn();
                next.deal_to_current(2, ctx.rng);
                next.advance_turn();
            }
            Card::WildDrawFour => {
                next.advance_turn();
                next.deal_to_current(4, ctx.rng);
                next.advance_turn();
            }
            _ => next.advance_turn(),
        }

        let mut effects = vec![];
        if next
            .hands
            .get(&ctx.actor)
            .map(|hand| hand.is_empty())
            .unwrap_or(false)
        {
            next.phase = UnoPhase::Finished;
            next.winner = Some(ctx.actor);
            if let Some(ref wager) = ctx.config.uno.wager {
                effects.push(Effect::Payout {
                    user: ctx.actor,
                    currency: wager.currency.clone(),
                    amount: wager.amount.saturating_mul(next.players.len() as u64),
                });
            }
        }
        Ok((next, effects))
    }

    fn draw_and_pass(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(UnoMatch, Vec<Effect>)> {
        self.ensure_turn(ctx.actor)?;
        let mut next = self.clone();
        next.deal_to_current(1, ctx.rng);
        next.advance_turn();
        Ok((next, vec![]))
    }

    fn ensure_turn(&self, actor: UserId) -> EngineResult<()> {
        if self.phase != UnoPhase::InProgress {
            return Err(EngineError::InvalidAction(
                "the match is not running".to_string(),
            ));
        }
        if self.players.get(self.current) != Some(&actor) {
            return Err(EngineError::NotYourTurn);
        }
        Ok(())
    }

    fn advance_turn(&mut self) {
        let len = self.players.len() as i64;
        self.current = (self.current as i64 + self.direction as i64).rem_euclid(len) as usize;
    }

    /// Deal cards to the player whose turn it currently is, reshuffling the
    /// discard pile under the top card when the deck runs dry
    fn deal_to_current(&mut self, count: usize, rng: &mut dyn RngCore) {
        for _ in 0..count {
            if self.deck.is_empty() {
                self.rebuild_deck_from_pile(rng);
            }
            let Some(card) = self.deck.pop() else {
                break;
            };
            if let Some(player) = self.players.get(self.current) {
                if let Some(hand) = self.hands.get_mut(player) {
                    hand.push(card);
                }
            }
        }
    }

    fn rebuild_deck_from_pile(&mut self, rng: &mut dyn RngCore) {
        if self.pile.len() <= 1 {
            return;
        }
        let top = self.pile.pop();
        self.deck.append(&mut self.pile);
        if let Some(top) = top {
            self.pile.push(top);
        }
        self.deck.shuffle(rng);
    }

    pub fn detail(&self) -> serde_json::Value {
        let hand_sizes: Vec<serde_json::Value> = self
            .players
            .iter()
            .map(|player| {
                serde_json::json!({
                    "player": player,
                    "cards": self.hands.get(player).map(Vec::len).unwrap_or(0),
                })
            })
            .collect();
        serde_json::json!({
            "phase": self.phase_name(),
            "players": &self.players,
            "current_player": self.current_player(),
            "direction": self.direction,
            "active_color": self.active_color.map(|c| c.to_string()),
            "top_card": self.pile.last().map(|c| c.to_string()),
            "hand_sizes": hand_sizes,
            "winner": self.winner,
        })
    }
}

impl Default for UnoMatch {
    fn default() -> Self {
        Self::new()
    }
}
