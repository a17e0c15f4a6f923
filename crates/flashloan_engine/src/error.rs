//! Error handling for flash-loan operations
//!
//! Errors raised before the pool is debited leave no trace. Errors raised
//! after the debit always take the rollback path in
//! [`crate::FlashLoanEngine::execute`]: the pool is restored to its snapshot
//! and the failure counter is incremented.

use cdp_ledger::{LedgerError, PositionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Flash-loan engine error types
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    /// Malformed request or strategy parameters
    #[error("Validation error: {field} - {message}")]
    Validation {
        /// Offending field
        field: String,
        /// Reason
        message: String,
    },

    /// No runner registered for the strategy name
    #[error("Unknown flash loan strategy: {name}")]
    UnknownStrategy {
        /// Requested strategy name
        name: String,
    },

    /// Loan exceeds the share of the pool a single flash loan may take
    #[error("Insufficient liquidity for {token}: requested {requested}, max {max_loan}")]
    InsufficientLiquidity {
        /// Pool token
        token: String,
        /// Requested loan
        requested: Decimal,
        /// Largest loan the pool allows
        max_loan: Decimal,
    },

    /// Withdrawal exceeds the pool balance
    #[error("Insufficient pool balance for {token}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Pool token
        token: String,
        /// Requested withdrawal
        requested: Decimal,
        /// Current balance
        available: Decimal,
    },

    /// Strategy returned less than loan plus fee
    #[error("Repayment insufficient: required {required}, repaid {repaid}")]
    RepaymentInsufficient {
        /// Loan plus fee
        required: Decimal,
        /// Amount the strategy returned
        repaid: Decimal,
    },

    /// Liquidation target does not exist
    #[error("Loan not found: {position_id}")]
    LoanNotFound {
        /// Target position
        position_id: PositionId,
    },

    /// Strategy runner reported a failure
    #[error("Strategy {strategy} failed: {message}")]
    StrategyFailed {
        /// Strategy name
        strategy: String,
        /// Failure reason
        message: String,
    },

    /// Strategy runner panicked
    #[error("Strategy {strategy} panicked")]
    RunnerPanicked {
        /// Strategy name
        strategy: String,
    },

    /// Strategy runner exceeded the watchdog
    #[error("Strategy {strategy} timed out after {timeout_ms}ms")]
    RunnerTimeout {
        /// Strategy name
        strategy: String,
        /// Watchdog in milliseconds
        timeout_ms: u64,
    },

    /// AMM registry could not be read
    #[error("AMM registry error: {message}")]
    Amm {
        /// Error message
        message: String,
    },

    /// Invalid engine configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Ledger rejected a strategy's mutation
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Create a validation error
    #[must_use]
    pub fn validation<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if error is retryable. Runner and repayment failures never are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Amm { .. })
    }

    /// Check if error comes from a runner or the repayment check, which
    /// only happen after the pool was debited. The pool was restored and the
    /// failure counter bumped.
    #[must_use]
    pub const fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            Self::RepaymentInsufficient { .. }
                | Self::LoanNotFound { .. }
                | Self::StrategyFailed { .. }
                | Self::RunnerPanicked { .. }
                | Self::RunnerTimeout { .. }
                | Self::Ledger(_)
        )
    }

    /// Check if error is critical (runner misbehaved)
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::RunnerPanicked { .. } | Self::RepaymentInsufficient { .. })
    }

    /// Get error category for monitoring
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnknownStrategy { .. } => "validation",
            Self::InsufficientLiquidity { .. } | Self::InsufficientBalance { .. } => "liquidity",
            Self::RepaymentInsufficient { .. } => "repayment",
            Self::LoanNotFound { .. } => "reference",
            Self::StrategyFailed { .. } | Self::RunnerPanicked { .. } | Self::RunnerTimeout { .. } => "strategy",
            Self::Amm { .. } => "amm",
            Self::Configuration { .. } => "config",
            Self::Ledger(_) => "ledger",
        }
    }
}
