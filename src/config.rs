//! Configuration management with validation and defaults
//!
//! Centralized configuration for the engine: the currency table, earning
//! rule, session lifecycle timers, and per-game tuning. Loadable from a TOML
//! file with `VOXBANK_*` environment overrides.

use crate::currency::{CurrencyId, CurrencySpec, EarningRule};
use crate::errors::{EngineError, EngineResult};
use crate::UserId;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Built-in nonsense story question sets, used when none are configured
static DEFAULT_TEMPLATES: Lazy<Vec<Vec<String>>> = Lazy::new(|| {
    let sets: [&[&str]; 5] = [
        &[
            "How did the story begin?",
            "Who is the main character?",
            "Where did they go next?",
            "What was the main obstacle?",
            "How did the story end?",
        ],
        &[
            "Where is the story set?",
            "What unusual thing happened?",
            "Who did the hero meet?",
            "What did the hero do first?",
            "How did it all end?",
        ],
        &[
            "What did the hero find on the road?",
            "Why was it important?",
            "How did others react?",
            "What did the hero decide to do?",
            "What is the moral of the story?",
        ],
        &[
            "How did an ordinary day begin?",
            "What interrupted it suddenly?",
            "Who did the hero meet along the way?",
            "Where did it all lead?",
            "What did the hero understand in the end?",
        ],
        &[
            "Why did the hero wake up at night?",
            "What did they see?",
            "Where did they go?",
            "What was waiting for them?",
            "What was the final revelation?",
        ],
    ];
    sets.iter()
        .map(|set| set.iter().map(|q| q.to_string()).collect())
        .collect()
});

/// Complete engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub currencies: Vec<CurrencySpec>,
    /// Users allowed to grant currency and close stories
    pub admins: Vec<UserId>,
    pub earning: EarningRule,
    pub session: SessionConfig,
    pub ledger: LedgerConfig,
    pub casino: CasinoConfig,
    pub uno: UnoConfig,
    pub nonsense: NonsenseConfig,
    /// Fixed seed for the game RNG; leave unset for entropy seeding
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currencies: CurrencySpec::all_default(),
            admins: vec![],
            earning: EarningRule::default(),
            session: SessionConfig::default(),
            ledger: LedgerConfig::default(),
            casino: CasinoConfig::default(),
            uno: UnoConfig::default(),
            nonsense: NonsenseConfig::default(),
            rng_seed: None,
        }
    }
}

/// Session lifecycle timers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is reclaimed as abandoned
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub snapshot_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 24 * 3600,
            sweep_interval_secs: 60,
            snapshot_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

/// Ledger store tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Size of the recent-operation dedup window
    pub dedup_window: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { dedup_window: 4096 }
    }
}

/// Casino round tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CasinoConfig {
    pub stake_currency: CurrencyId,
    pub min_bet: u64,
    pub slots_quota: SlotsQuotaConfig,
}

impl Default for CasinoConfig {
    fn default() -> Self {
        Self {
            stake_currency: CurrencyId::new("voxcent"),
            min_bet: 50,
            slots_quota: SlotsQuotaConfig::default(),
        }
    }
}

/// Per-user slot machine quota over a rolling window
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsQuotaConfig {
    /// 0 disables the quota
    pub max_spins: u32,
    pub window_secs: u64,
}

impl Default for SlotsQuotaConfig {
    fn default() -> Self {
        Self {
            max_spins: 5,
            window_secs: 6 * 3600,
        }
    }
}

impl SlotsQuotaConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// UNO match tuning
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UnoConfig {
    /// Optional entry wager, escrowed on join and pooled for the winner
    pub wager: Option<WagerConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WagerConfig {
    pub currency: CurrencyId,
    pub amount: u64,
}

/// Nonsense story tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NonsenseConfig {
    /// Question sets; one is chosen at random when a story starts
    pub templates: Vec<Vec<String>>,
}

impl Default for NonsenseConfig {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES.clone(),
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| EngineError::Configuration(format!("failed to parse TOML: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(timeout) = env::var("VOXBANK_SESSION_TIMEOUT_SECS") {
            config.session.timeout_secs = Self::parse_env("VOXBANK_SESSION_TIMEOUT_SECS", &timeout)?;
        }
        if let Ok(interval) = env::var("VOXBANK_SWEEP_INTERVAL_SECS") {
            config.session.sweep_interval_secs =
                Self::parse_env("VOXBANK_SWEEP_INTERVAL_SECS", &interval)?;
        }
        if let Ok(interval) = env::var("VOXBANK_SNAPSHOT_INTERVAL_SECS") {
            config.session.snapshot_interval_secs =
                Self::parse_env("VOXBANK_SNAPSHOT_INTERVAL_SECS", &interval)?;
        }
        if let Ok(min_bet) = env::var("VOXBANK_MIN_BET") {
            config.casino.min_bet = Self::parse_env("VOXBANK_MIN_BET", &min_bet)?;
        }
        if let Ok(seed) = env::var("VOXBANK_RNG_SEED") {
            config.rng_seed = Some(Self::parse_env("VOXBANK_RNG_SEED", &seed)?);
        }
        Ok(())
    }

    fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
        value
            .parse()
            .map_err(|_| EngineError::Configuration(format!("invalid {}: '{}'", key, value)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Validate cross-field consistency
    pub fn validate(&self) -> EngineResult<()> {
        if self.currencies.is_empty() {
            return Err(EngineError::Configuration(
                "no currencies configured".to_string(),
            ));
        }
        let known = |id: &CurrencyId| self.currencies.iter().any(|c| &c.id == id);

        if !known(&self.earning.currency) {
            return Err(EngineError::Configuration(format!(
                "earning currency {} is not configured",
                self.earning.currency
            )));
        }
        if !known(&self.casino.stake_currency) {
            return Err(EngineError::Configuration(format!(
                "casino stake currency {} is not configured",
                self.casino.stake_currency
            )));
        }
        if let Some(ref wager) = self.uno.wager {
            if !known(&wager.currency) {
                return Err(EngineError::Configuration(format!(
                    "uno wager currency {} is not configured",
                    wager.currency
                )));
            }
            if wager.amount == 0 {
                return Err(EngineError::Configuration(
                    "uno wager amount must be positive".to_string(),
                ));
            }
        }
        if self.casino.min_bet == 0 {
            return Err(EngineError::Configuration(
                "casino min_bet must be positive".to_string(),
            ));
        }
        if self.session.timeout_secs == 0 || self.session.sweep_interval_secs == 0 {
            return Err(EngineError::Configuration(
                "session timers must be positive".to_string(),
            ));
        }
        if self.ledger.dedup_window == 0 {
            return Err(EngineError::Configuration(
                "ledger dedup_window must be positive".to_string(),
            ));
        }
        if self.nonsense.templates.is_empty()
            || self.nonsense.templates.iter().any(|t| t.is_empty())
        {
            return Err(EngineError::Configuration(
                "nonsense templates must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
