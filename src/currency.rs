//! Currency definitions and policy
//!
//! The currency set is fixed for the lifetime of the process: it is loaded
//! from configuration once and never mutated. The policy is a set of pure
//! functions over that table; it holds no balances and no counters.

use crate::errors::{EngineError, EngineResult};
use crate::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Stable configured currency identifier
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct CurrencyId(String);

impl CurrencyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A configured currency and its handling rules
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrencySpec {
    pub id: CurrencyId,
    pub name: String,
    /// Auto-credited by chat activity
    pub earnable: bool,
    /// May be sent user-to-user
    pub transferable: bool,
    /// May be granted or revoked by an admin
    pub admin_grantable: bool,
}

impl CurrencySpec {
    /// The main chat currency, granted by admins and payable between users
    pub fn voxcoin() -> Self {
        Self {
            id: CurrencyId::new("voxcoin"),
            name: "Voxcoin".to_string(),
            earnable: false,
            transferable: true,
            admin_grantable: true,
        }
    }

    /// The casino currency, earned by chat activity
    pub fn voxcent() -> Self {
        Self {
            id: CurrencyId::new("voxcent"),
            name: "Voxcent".to_string(),
            earnable: true,
            transferable: false,
            admin_grantable: true,
        }
    }

    /// Admin-only event currency
    pub fn tvcoin() -> Self {
        Self {
            id: CurrencyId::new("tvcoin"),
            name: "TVcoin".to_string(),
            earnable: false,
            transferable: false,
            admin_grantable: true,
        }
    }

    /// The default currency table
    pub fn all_default() -> Vec<Self> {
        vec![Self::voxcoin(), Self::voxcent(), Self::tvcoin()]
    }
}

/// Activity earning rule: messages strictly longer than the threshold earn a
/// fixed amount of one earnable currency
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EarningRule {
    pub currency: CurrencyId,
    pub min_message_len: usize,
    pub amount: u64,
}

impl Default for EarningRule {
    fn default() -> Self {
        Self {
            currency: CurrencyId::new("voxcent"),
            min_message_len: 10,
            amount: 1,
        }
    }
}

/// Pure rules over the configured currency table
#[derive(Debug)]
pub struct CurrencyPolicy {
    specs: HashMap<CurrencyId, CurrencySpec>,
    admins: HashSet<UserId>,
    earning: EarningRule,
}

impl CurrencyPolicy {
    /// Build a policy, validating the earning rule against the table
    pub fn new(
        specs: Vec<CurrencySpec>,
        admins: Vec<UserId>,
        earning: EarningRule,
    ) -> EngineResult<Self> {
        if specs.is_empty() {
            return Err(EngineError::Configuration(
                "at least one currency must be configured".to_string(),
            ));
        }
        let mut table = HashMap::with_capacity(specs.len());
        for spec in specs {
            if table.insert(spec.id.clone(), spec).is_some() {
                return Err(EngineError::Configuration(
                    "duplicate currency id in configuration".to_string(),
                ));
            }
        }
        let earn_spec = table.get(&earning.currency).ok_or_else(|| {
            EngineError::Configuration(format!(
                "earning currency {} is not configured",
                earning.currency
            ))
        })?;
        if !earn_spec.earnable {
            return Err(EngineError::Configuration(format!(
                "earning currency {} is not earnable",
                earning.currency
            )));
        }

        Ok(Self {
            specs: table,
            admins: admins.into_iter().collect(),
            earning,
        })
    }

    /// Look up a currency, failing with `UnknownCurrency` for ids outside the
    /// configured set
    pub fn spec(&self, id: &CurrencyId) -> EngineResult<&CurrencySpec> {
        self.specs
            .get(id)
            .ok_or_else(|| EngineError::UnknownCurrency(id.clone()))
    }

    /// Amount earned by a message of the given length (0 below the threshold)
    pub fn earn_rate(&self, message_len: usize) -> u64 {
        if message_len > self.earning.min_message_len {
            self.earning.amount
        } else {
            0
        }
    }

    /// Currency credited by activity earning
    pub fn earning_currency(&self) -> &CurrencyId {
        &self.earning.currency
    }

    pub fn can_transfer(&self, id: &CurrencyId) -> EngineResult<bool> {
        Ok(self.spec(id)?.transferable)
    }

    pub fn can_admin_grant(&self, id: &CurrencyId, actor: UserId) -> EngineResult<bool> {
        Ok(self.spec(id)?.admin_grantable && self.is_admin(actor))
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}
