//! Snapshot types and the persistence boundary
//!
//! Durability is "survives restart via periodic snapshot": the engine
//! produces [`EngineSnapshot`] values on a timer and hands them to a
//! [`SnapshotSink`] implemented by the storage collaborator. In-flight
//! sessions are not resumed after a restart; the escrow they held rides
//! along in the snapshot so `restore` can refund it.

use crate::currency::CurrencyId;
use crate::errors::EngineResult;
use crate::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted account balance
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRecord {
    pub user: UserId,
    pub currency: CurrencyId,
    pub balance: u64,
    pub version: u64,
}

/// Escrow held by a live session at snapshot time, refunded on restore
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowRecord {
    pub user: UserId,
    pub currency: CurrencyId,
    pub amount: u64,
}

/// Point-in-time copy of everything that survives a restart
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub accounts: Vec<AccountRecord>,
    pub pending_refunds: Vec<EscrowRecord>,
}

/// Persistence interface implemented by the external storage collaborator
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Persist a snapshot; the engine logs and retries on the next tick if
    /// this fails
    async fn persist(&self, snapshot: &EngineSnapshot) -> EngineResult<()>;
}
