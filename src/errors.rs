//! Error types for the Voxbank engine
//!
//! Every failure crosses the coordinator boundary as a value of this enum;
//! nothing is thrown across component boundaries. All variants are
//! recoverable user-facing rejections except `UnknownCurrency` and
//! `Configuration`, which indicate a configuration or programming error.

use crate::currency::CurrencyId;

/// Root error type for all engine operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient funds: have {balance}, need {required}")]
    InsufficientFunds { balance: u64, required: u64 },

    #[error("a {0} session is already active in this chat")]
    SessionAlreadyActive(String),

    #[error("no active {0} session in this chat")]
    SessionNotFound(String),

    #[error("stale revision {submitted}, session is at {current}")]
    StaleRevision { submitted: u64, current: u64 },

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("not your turn")]
    NotYourTurn,

    #[error("unknown currency: {0}")]
    UnknownCurrency(CurrencyId),

    #[error("admin grant of {0} denied")]
    GrantDenied(CurrencyId),

    #[error("{0} is not transferable between users")]
    NotTransferable(CurrencyId),

    #[error("bet quota exhausted, retry in {retry_after_secs}s")]
    QuotaExhausted { retry_after_secs: u64 },

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("session settlement failed: {0}")]
    SessionFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InsufficientFunds {
            balance: 10,
            required: 50,
        };
        assert!(err.to_string().contains("have 10"));
        assert!(err.to_string().contains("need 50"));
    }

    #[test]
    fn test_stale_revision_carries_both_sides() {
        let err = EngineError::StaleRevision {
            submitted: 3,
            current: 5,
        };
        assert_eq!(err.to_string(), "stale revision 3, session is at 5");
    }
}
