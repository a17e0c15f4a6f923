//! # CDP Ledger
//!
//! Collateralized debt positions over a registry of collateral and borrow
//! assets. The [`CollateralManager`] enforces loan-to-value limits at open,
//! accrues simple interest over time and liquidates positions whose
//! collateral/debt ratio falls below the asset's liquidation threshold.
//!
//! ## Collaborators
//! - [`ValuationProvider`]: synchronous USD prices, fed by [`PriceBook`]
//! - [`InterestPolicy`]: accrual formula, [`SimpleInterest`] by default
//! - [`Clock`]: time source, [`ManualClock`] for deterministic tests
//! - [`CreditEventSink`]: notified on every liquidation
//!
//! ## Safety
//! - Zero `unwrap()`, `expect()`, or `panic!()` in production code
//! - All financial calculations use `rust_decimal`

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unreachable
)]
#![warn(missing_docs, clippy::undocumented_unsafe_blocks)]

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

pub mod clock;
pub mod credit;
pub mod error;
pub mod interest;
pub mod manager;
pub mod position;
pub mod pricing;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credit::{CreditEvent, CreditEventSink, NoopCreditSink, RecordingCreditSink};
pub use error::{AssetRole, LedgerError, LedgerResult};
pub use interest::{InterestPolicy, SimpleInterest, SECONDS_PER_YEAR};
pub use manager::{
    AccrualReport, CatalogEntry, CollateralAdded, CollateralManager, LedgerStats, LiquidationRecord,
    MaintenanceReport, OpenedPosition, RepayOutcome,
};
pub use position::{Position, PositionHealth, PositionId, PositionStatus, PositionSummary};
pub use pricing::{PriceBook, PriceOracle, StaticPriceOracle, ValuationProvider, FALLBACK_PRICE_USD};
pub use registry::{BorrowAsset, CollateralAsset, CollateralRegistry, QualityTier};

/// Debt at or below which a repaid position is closed (1e-6 units)
pub const DEFAULT_DUST_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct LedgerConfig {
    /// Remaining debt that closes a position on repay
    pub dust_epsilon: Decimal,
    /// Year length used by the default interest policy
    pub seconds_per_year: i64,
}

impl Default for LedgerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            dust_epsilon: DEFAULT_DUST_EPSILON,
            seconds_per_year: SECONDS_PER_YEAR,
        }
    }
}

impl LedgerConfig {
    /// Parse configuration from TOML; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] for malformed TOML or
    /// out-of-range values
    pub fn from_toml_str(source: &str) -> LedgerResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| LedgerError::config(format!("invalid ledger config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Configuration`] for a negative dust epsilon or
    /// a non-positive year length
    pub fn validate(&self) -> LedgerResult<()> {
        if self.dust_epsilon.is_sign_negative() {
            return Err(LedgerError::config("dust_epsilon must not be negative"));
        }
        if self.seconds_per_year <= 0 {
            return Err(LedgerError::config("seconds_per_year must be positive"));
        }
        Ok(())
    }
}
