//! Error types for ledger operations
//!
//! Every fallible ledger call returns [`LedgerError`]. All variants are local
//! and recoverable: the ledger never leaves a position half-mutated when it
//! returns an error.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::position::{PositionId, PositionStatus};

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which side of a position an asset was requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole {
    /// Asset locked as collateral
    Collateral,
    /// Asset borrowed against collateral
    Borrow,
}

impl std::fmt::Display for AssetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collateral => f.write_str("collateral"),
            Self::Borrow => f.write_str("borrow"),
        }
    }
}

/// Ledger error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LedgerError {
    /// Malformed input (non-positive amount, empty owner, bad price)
    #[error("Validation error: {field} - {message}")]
    Validation {
        /// Offending field
        field: String,
        /// Human readable reason
        message: String,
    },

    /// Asset is not registered for the requested role
    #[error("Unsupported {role} asset: {symbol}")]
    UnsupportedAsset {
        /// Asset symbol
        symbol: String,
        /// Requested role
        role: AssetRole,
    },

    /// Borrow would exceed the collateral's max LTV
    #[error("Insufficient collateral: requested ${requested_usd}, max ${max_borrow_usd} ({max_borrow_amount} units)")]
    InsufficientCollateral {
        /// Requested borrow value in USD
        requested_usd: Decimal,
        /// Maximum borrowable value in USD
        max_borrow_usd: Decimal,
        /// Maximum borrowable amount in borrow-asset units
        max_borrow_amount: Decimal,
    },

    /// Unknown position, or a position owned by someone else
    #[error("Position not found: {position_id}")]
    PositionNotFound {
        /// Position identifier
        position_id: PositionId,
    },

    /// Position already reached a terminal state
    #[error("Position {position_id} is not active (status: {status})")]
    PositionNotActive {
        /// Position identifier
        position_id: PositionId,
        /// Current terminal status
        status: PositionStatus,
    },

    /// Registry or ledger configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },
}

impl LedgerError {
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

    /// Ledger errors are business-rule or input rejections; none are retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the error carries a computed limit the caller can act on
    #[must_use]
    pub const fn is_limit_rejection(&self) -> bool {
        matches!(self, Self::InsufficientCollateral { .. })
    }

    /// Get error category for monitoring
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnsupportedAsset { .. } => "validation",
            Self::InsufficientCollateral { .. } => "collateral",
            Self::PositionNotFound { .. } | Self::PositionNotActive { .. } => "reference",
            Self::Configuration { .. } => "config",
        }
    }
}
