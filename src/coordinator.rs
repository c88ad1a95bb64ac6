//! Session coordinator
//!
//! The boundary the transport layer talks to. Routes player actions to the
//! right session, enforces optimistic revision checks, applies the effects
//! a transition emits as one atomic ledger batch before committing the new
//! state, settles and releases terminal sessions, and runs the abandonment
//! sweep and periodic snapshot in background tasks. A session's lock is held
//! for the duration of one transition and never across external I/O, so
//! unrelated sessions proceed fully in parallel.

use crate::config::EngineConfig;
use crate::currency::{CurrencyId, CurrencyPolicy};
use crate::errors::{EngineError, EngineResult};
use crate::games::{ApplyCtx, BetCall, Effect, GameKind, GameState, PlayerAction};
use crate::ledger::{AccountKey, LedgerOp, LedgerStore};
use crate::registry::{SessionKey, SessionRegistry};
use crate::session::{Session, SessionView};
use crate::snapshot::{EngineSnapshot, EscrowRecord, SnapshotSink};
use crate::{ChatId, OpToken, UserId};
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
struct QuotaCell {
    used: u32,
    window_start: Instant,
}

/// Orchestrates sessions, games and the ledger for every chat
pub struct SessionCoordinator {
    config: EngineConfig,
    policy: CurrencyPolicy,
    ledger: LedgerStore,
    registry: SessionRegistry,
    /// Policy-supplied random source shared by all casino/game sampling
    rng: Mutex<StdRng>,
    slot_quotas: DashMap<(ChatId, UserId), QuotaCell>,
}

impl SessionCoordinator {
    /// Build an engine from a validated configuration
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let policy = CurrencyPolicy::new(
            config.currencies.clone(),
            config.admins.clone(),
            config.earning.clone(),
        )?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let ledger = LedgerStore::new(config.ledger.dedup_window);
        Ok(Self {
            config,
            policy,
            ledger,
            registry: SessionRegistry::new(),
            rng: Mutex::new(rng),
            slot_quotas: DashMap::new(),
        })
    }

    /// Direct access to the ledger, for embedding and diagnostics
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit one player action against the session for (chat, kind).
    ///
    /// `known_revision` is the session revision the caller last observed
    /// (0 when starting); a mismatch is rejected with `StaleRevision` and the
    /// caller retries against the fresh view.
    pub fn submit_action(
        &self,
        chat: ChatId,
        kind: GameKind,
        actor: UserId,
        action: PlayerAction,
        known_revision: u64,
        token: OpToken,
    ) -> EngineResult<SessionView> {
        let key = SessionKey::new(chat, kind);
        match action {
            PlayerAction::Start(ref start) => {
                if start.kind() != kind {
                    return Err(EngineError::InvalidAction(format!(
                        "cannot start {} in a {} slot",
                        start.kind(),
                        kind
                    )));
                }
                if known_revision != 0 {
                    return Err(EngineError::StaleRevision {
                        submitted: known_revision,
                        current: 0,
                    });
                }
                let state = {
                    let mut rng = self.rng.lock().unwrap();
                    let mut ctx = ApplyCtx {
                        actor,
                        is_admin: self.policy.is_admin(actor),
                        rng: &mut *rng,
                        config: &self.config,
                    };
                    GameState::create(start, &mut ctx)
                };
                let mut session = Session::new(key, state);
                session.revision = 1;
                let view = session.view();
                self.registry.acquire(key, session)?;
                info!(chat = %chat, kind = %kind, actor = %actor, "session started");
                Ok(view)
            }
            _ => self.advance_session(key, actor, &action, known_revision, token),
        }
    }

    fn advance_session(
        &self,
        key: SessionKey,
        actor: UserId,
        action: &PlayerAction,
        known_revision: u64,
        token: OpToken,
    ) -> EngineResult<SessionView> {
        let arc = self
            .registry
            .get(&key)
            .ok_or_else(|| EngineError::SessionNotFound(key.kind.to_string()))?;
        let mut session = arc.lock().unwrap();
        // The slot may have been resolved or swept between lookup and lock
        if session.state.is_terminal() {
            return Err(EngineError::SessionNotFound(key.kind.to_string()));
        }
        if known_revision != session.revision {
            return Err(EngineError::StaleRevision {
                submitted: known_revision,
                current: session.revision,
            });
        }

        let is_slots_bet = matches!(
            action,
            PlayerAction::Bet {
                call: BetCall::Slots,
                ..
            }
        );
        if is_slots_bet {
            self.check_slot_quota(key.chat, actor)?;
        }

        let (new_state, effects) = {
            let mut rng = self.rng.lock().unwrap();
            let mut ctx = ApplyCtx {
                actor,
                is_admin: self.policy.is_admin(actor),
                rng: &mut *rng,
                config: &self.config,
            };
            session.state.apply(action, &mut ctx)?
        };

        let terminal = new_state.is_terminal();
        let ops = effects_to_ops(&effects);
        if !ops.is_empty() {
            if let Err(err) = self.ledger.apply_batch(&ops, token) {
                if !terminal {
                    // e.g. an escrow debit without funds: state untouched,
                    // the rejection goes straight back to the player
                    return Err(err);
                }
                // A terminal settlement must never partially pay. Refund the
                // held escrow, quarantine the session and free the slot.
                error!(
                    chat = %key.chat,
                    kind = %key.kind,
                    %err,
                    "terminal settlement aborted, failing session"
                );
                self.refund_escrow(&mut session, "settlement failure");
                session.state = GameState::Failed {
                    reason: err.to_string(),
                };
                drop(session);
                self.registry.release(&key);
                return Err(EngineError::SessionFailed(err.to_string()));
            }
        }

        for effect in &effects {
            match effect {
                Effect::Escrow {
                    user,
                    currency,
                    amount,
                } => {
                    *session.escrow.entry((*user, currency.clone())).or_insert(0) += amount;
                }
                Effect::Refund {
                    user,
                    currency,
                    amount,
                } => {
                    if let Some(held) = session.escrow.get_mut(&(*user, currency.clone())) {
                        *held = held.saturating_sub(*amount);
                        if *held == 0 {
                            session.escrow.remove(&(*user, currency.clone()));
                        }
                    }
                }
                Effect::Payout { .. } => {}
            }
        }

        session.state = new_state;
        session.revision += 1;
        session.touch();
        if is_slots_bet {
            self.record_slot_spin(key.chat, actor);
        }

        let view = session.view();
        if terminal {
            info!(chat = %key.chat, kind = %key.kind, "session resolved, releasing slot");
            drop(session);
            self.registry.release(&key);
        }
        Ok(view)
    }

    /// Balance lookup; 0 for accounts that were never credited
    pub fn get_balance(&self, user: UserId, currency: &CurrencyId) -> EngineResult<u64> {
        self.policy.spec(currency)?;
        Ok(self.ledger.balance(&AccountKey::new(user, currency.clone())))
    }

    /// Credit activity earnings for one qualifying inbound message
    pub fn credit_on_activity(
        &self,
        user: UserId,
        message_len: usize,
        token: OpToken,
    ) -> EngineResult<u64> {
        let amount = self.policy.earn_rate(message_len);
        let account = AccountKey::new(user, self.policy.earning_currency().clone());
        if amount == 0 {
            return Ok(self.ledger.balance(&account));
        }
        let balance = self.ledger.credit(&account, amount, token)?;
        debug!(user = %user, amount, balance, "activity credit");
        Ok(balance)
    }

    /// Grant currency to a user, gated by the currency policy
    pub fn admin_grant(
        &self,
        currency: &CurrencyId,
        actor: UserId,
        target: UserId,
        amount: u64,
        token: OpToken,
    ) -> EngineResult<u64> {
        if !self.policy.can_admin_grant(currency, actor)? {
            warn!(actor = %actor, currency = %currency, "grant denied");
            return Err(EngineError::GrantDenied(currency.clone()));
        }
        let balance = self
            .ledger
            .credit(&AccountKey::new(target, currency.clone()), amount, token)?;
        info!(actor = %actor, target = %target, currency = %currency, amount, "admin grant");
        Ok(balance)
    }

    /// User-to-user payment, gated by the currency policy
    pub fn transfer(
        &self,
        from: UserId,
        to: UserId,
        currency: &CurrencyId,
        amount: u64,
        token: OpToken,
    ) -> EngineResult<()> {
        if !self.policy.can_transfer(currency)? {
            return Err(EngineError::NotTransferable(currency.clone()));
        }
        self.ledger.transfer(from, to, currency, amount, token)?;
        info!(from = %from, to = %to, currency = %currency, amount, "transfer");
        Ok(())
    }

    /// Read-only view of a live session
    pub fn session_view(&self, chat: ChatId, kind: GameKind) -> EngineResult<SessionView> {
        let key = SessionKey::new(chat, kind);
        let arc = self
            .registry
            .get(&key)
            .ok_or_else(|| EngineError::SessionNotFound(kind.to_string()))?;
        let session = arc.lock().unwrap();
        Ok(session.view())
    }

    /// Reclaim sessions idle beyond the configured timeout: refund all
    /// escrow and release the slot. Returns the number reclaimed.
    pub fn sweep_abandoned(&self) -> usize {
        let timeout = self.config.session.timeout();
        let mut reclaimed = 0;
        for key in self.registry.stale_keys(timeout) {
            let Some(arc) = self.registry.get(&key) else {
                continue;
            };
            let mut session = arc.lock().unwrap();
            // Re-check under the lock: the session may have just seen activity
            if session.last_active.elapsed() < timeout || session.state.is_terminal() {
                continue;
            }
            info!(
                chat = %key.chat,
                kind = %key.kind,
                escrow = session.escrow_total(),
                "reclaiming abandoned session"
            );
            self.refund_escrow(&mut session, "abandoned");
            session.state = GameState::Failed {
                reason: "abandoned by timeout sweep".to_string(),
            };
            drop(session);
            self.registry.release(&key);
            reclaimed += 1;
        }
        if reclaimed > 0 {
            info!(reclaimed, "abandonment sweep complete");
        }
        reclaimed
    }

    /// Refund everything a session holds in escrow
    fn refund_escrow(&self, session: &mut Session, why: &str) {
        let ops: Vec<LedgerOp> = session
            .escrow
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|((user, currency), amount)| LedgerOp::Credit {
                account: AccountKey::new(*user, currency.clone()),
                amount: *amount,
            })
            .collect();
        if ops.is_empty() {
            return;
        }
        match self.ledger.apply_batch(&ops, OpToken::new()) {
            Ok(_) => session.escrow.clear(),
            Err(err) => warn!(%err, why, "escrow refund failed"),
        }
    }

    /// Point-in-time snapshot: balances plus the escrow of live sessions
    pub fn snapshot(&self) -> EngineSnapshot {
        let accounts = self.ledger.snapshot_accounts();
        let mut pending_refunds = vec![];
        for arc in self.registry.live_sessions() {
            let session = arc.lock().unwrap();
            for ((user, currency), amount) in &session.escrow {
                if *amount > 0 {
                    pending_refunds.push(EscrowRecord {
                        user: *user,
                        currency: currency.clone(),
                        amount: *amount,
                    });
                }
            }
        }
        EngineSnapshot {
            taken_at: Utc::now(),
            accounts,
            pending_refunds,
        }
    }

    /// Restore after a restart. In-flight sessions are not resumed: the
    /// escrow recorded in the snapshot is credited back and the registry
    /// starts empty.
    pub fn restore(config: EngineConfig, snapshot: &EngineSnapshot) -> EngineResult<Self> {
        let coordinator = Self::new(config)?;
        coordinator.ledger.restore_accounts(&snapshot.accounts);
        let refunds: Vec<LedgerOp> = snapshot
            .pending_refunds
            .iter()
            .map(|record| LedgerOp::Credit {
                account: AccountKey::new(record.user, record.currency.clone()),
                amount: record.amount,
            })
            .collect();
        if !refunds.is_empty() {
            coordinator.ledger.apply_batch(&refunds, OpToken::new())?;
            info!(
                refunds = refunds.len(),
                "refunded in-flight escrow from snapshot"
            );
        }
        Ok(coordinator)
    }

    /// Spawn the periodic abandonment sweep
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.session.sweep_interval());
            loop {
                ticker.tick().await;
                self.sweep_abandoned();
            }
        })
    }

    /// Spawn the periodic snapshot task writing to the given sink
    pub fn spawn_snapshotter(self: Arc<Self>, sink: Arc<dyn SnapshotSink>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.session.snapshot_interval());
            loop {
                ticker.tick().await;
                let snapshot = self.snapshot();
                if let Err(err) = sink.persist(&snapshot).await {
                    warn!(%err, "snapshot persist failed, will retry next tick");
                } else {
                    debug!(accounts = snapshot.accounts.len(), "snapshot persisted");
                }
            }
        })
    }

    fn check_slot_quota(&self, chat: ChatId, user: UserId) -> EngineResult<()> {
        let quota = &self.config.casino.slots_quota;
        if quota.max_spins == 0 {
            return Ok(());
        }
        let mut cell = self.slot_quotas.entry((chat, user)).or_insert(QuotaCell {
            used: 0,
            window_start: Instant::now(),
        });
        if cell.window_start.elapsed() >= quota.window() {
            cell.used = 0;
            cell.window_start = Instant::now();
        }
        if cell.used >= quota.max_spins {
            let elapsed = cell.window_start.elapsed().as_secs();
            return Err(EngineError::QuotaExhausted {
                retry_after_secs: quota.window_secs.saturating_sub(elapsed),
            });
        }
        Ok(())
    }

    fn record_slot_spin(&self, chat: ChatId, user: UserId) {
        if self.config.casino.slots_quota.max_spins == 0 {
            return;
        }
        if let Some(mut cell) = self.slot_quotas.get_mut(&(chat, user)) {
            cell.used += 1;
        }
    }
}

/// Translate game effects into ledger mutations
fn effects_to_ops(effects: &[Effect]) -> Vec<LedgerOp> {
    effects
        .iter()
        .map(|effect| match effect {
            Effect::Escrow {
                user,
                currency,
                amount,
            } => LedgerOp::Debit {
                account: AccountKey::new(*user, currency.clone()),
                amount: *amount,
            },
            Effect::Payout {
                user,
                currency,
                amount,
            }
            | Effect::Refund {
                user,
                currency,
                amount,
            } => LedgerOp::Credit {
                account: AccountKey::new(*user, currency.clone()),
                amount: *amount,
            },
        })
        .collect()
}
