//! Engine configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Flash loan fee: 0.09% of the loan
pub const FLASHLOAN_DEFAULT_FEE: Decimal = Decimal::from_parts(9, 0, 0, false, 4);
/// Largest share of a pool a single loan may take: 10%
pub const FLASHLOAN_DEFAULT_MAX_POOL_FRACTION: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
/// Hard cap on arbitrage loan size ($50k)
pub const FLASHLOAN_DEFAULT_ARB_MAX_LOAN_USD: Decimal = Decimal::from_parts(50_000, 0, 0, false, 0);
/// Floor on arbitrage loan size ($100)
pub const FLASHLOAN_DEFAULT_ARB_MIN_LOAN_USD: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
/// Opportunities netting less than this are discarded ($1)
pub const FLASHLOAN_DEFAULT_MIN_PROFIT_USD: Decimal = Decimal::ONE;
/// Estimated execution slippage: 0.1%
pub const FLASHLOAN_DEFAULT_SLIPPAGE_BUFFER: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
/// AMM swap fee when a pool does not report one: 0.3%
pub const FLASHLOAN_DEFAULT_AMM_FEE: Decimal = Decimal::from_parts(3, 0, 0, false, 3);
/// Liquidator bonus on seized collateral: 5%
pub const FLASHLOAN_DEFAULT_LIQUIDATION_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
/// Positions below this health are liquidation candidates
pub const FLASHLOAN_DEFAULT_HEALTH_MARGIN: Decimal = Decimal::from_parts(105, 0, 0, false, 2);
/// Debts below this are ignored by the liquidation scan ($10)
pub const FLASHLOAN_DEFAULT_DUST_DEBT_USD: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
/// Tolerance when verifying repayment ($0.01)
pub const FLASHLOAN_DEFAULT_REPAYMENT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
/// Advisory scanner period
pub const FLASHLOAN_DEFAULT_SCAN_INTERVAL_MS: u64 = 30_000;

/// Flash-loan engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct FlashLoanConfig {
    /// Fee charged on every loan, as a fraction of the loan
    pub flash_fee: Decimal,
    /// Largest fraction of a pool balance a single loan may take
    pub max_pool_fraction: Decimal,
    /// Arbitrage loan hard cap (USD)
    pub arbitrage_max_loan_usd: Decimal,
    /// Arbitrage loan floor (USD)
    pub arbitrage_min_loan_usd: Decimal,
    /// Minimum net profit for an opportunity to be reported (USD)
    pub min_profit_usd: Decimal,
    /// Slippage estimate as a fraction of the loan
    pub slippage_buffer: Decimal,
    /// AMM fee used when a pool reports none
    pub default_amm_fee: Decimal,
    /// Liquidator bonus as a fraction of collateral value
    pub liquidation_bonus: Decimal,
    /// Health factor under which positions are liquidation candidates
    pub liquidation_health_margin: Decimal,
    /// Debts smaller than this are skipped by the liquidation scan (USD)
    pub dust_debt_usd: Decimal,
    /// Shortfall tolerated when verifying repayment
    pub repayment_epsilon: Decimal,
    /// Scanner period in milliseconds
    pub scanner_interval_ms: u64,
    /// Quote assets arbitrage loans can be drawn in
    pub arbitrage_quote_assets: Vec<String>,
    /// Name recorded on positions liquidated through the engine
    pub liquidator_id: String,
}

impl Default for FlashLoanConfig {
    #[inline]
    fn default() -> Self {
        Self {
            flash_fee: FLASHLOAN_DEFAULT_FEE,
            max_pool_fraction: FLASHLOAN_DEFAULT_MAX_POOL_FRACTION,
            arbitrage_max_loan_usd: FLASHLOAN_DEFAULT_ARB_MAX_LOAN_USD,
            arbitrage_min_loan_usd: FLASHLOAN_DEFAULT_ARB_MIN_LOAN_USD,
            min_profit_usd: FLASHLOAN_DEFAULT_MIN_PROFIT_USD,
            slippage_buffer: FLASHLOAN_DEFAULT_SLIPPAGE_BUFFER,
            default_amm_fee: FLASHLOAN_DEFAULT_AMM_FEE,
            liquidation_bonus: FLASHLOAN_DEFAULT_LIQUIDATION_BONUS,
            liquidation_health_margin: FLASHLOAN_DEFAULT_HEALTH_MARGIN,
            dust_debt_usd: FLASHLOAN_DEFAULT_DUST_DEBT_USD,
            repayment_epsilon: FLASHLOAN_DEFAULT_REPAYMENT_EPSILON,
            scanner_interval_ms: FLASHLOAN_DEFAULT_SCAN_INTERVAL_MS,
            arbitrage_quote_assets: vec!["USDC".to_owned()],
            liquidator_id: "flash_loan_engine".to_owned(),
        }
    }
}

impl FlashLoanConfig {
    /// Parse configuration from TOML; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for malformed TOML or values
    /// rejected by [`Self::validate`]
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| EngineError::config(format!("invalid flash loan config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] naming the first bad field
    pub fn validate(&self) -> EngineResult<()> {
        let fraction = |name: &str, value: Decimal| -> EngineResult<()> {
            if value.is_sign_negative() || value >= Decimal::ONE {
                return Err(EngineError::config(format!("{name} must be in [0, 1), got {value}")));
            }
            Ok(())
        };
        fraction("flash_fee", self.flash_fee)?;
        fraction("slippage_buffer", self.slippage_buffer)?;
        fraction("default_amm_fee", self.default_amm_fee)?;
        fraction("liquidation_bonus", self.liquidation_bonus)?;

        if self.max_pool_fraction <= Decimal::ZERO || self.max_pool_fraction > Decimal::ONE {
            return Err(EngineError::config("max_pool_fraction must be in (0, 1]"));
        }
        if self.arbitrage_min_loan_usd > self.arbitrage_max_loan_usd {
            return Err(EngineError::config("arbitrage_min_loan_usd exceeds arbitrage_max_loan_usd"));
        }
        if self.liquidation_health_margin <= Decimal::ZERO {
            return Err(EngineError::config("liquidation_health_margin must be positive"));
        }
        if self.repayment_epsilon.is_sign_negative() || self.dust_debt_usd.is_sign_negative() {
            return Err(EngineError::config("repayment_epsilon and dust_debt_usd must not be negative"));
        }
        if self.scanner_interval_ms == 0 {
            return Err(EngineError::config("scanner_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Scanner period
    #[must_use]
    pub const fn scanner_interval(&self) -> Duration {
        Duration::from_millis(self.scanner_interval_ms)
    }

    /// Smallest absolute spread an arbitrage must clear
    #[must_use]
    pub fn min_arbitrage_spread(&self, amm_fee: Decimal) -> Decimal {
        self.flash_fee + amm_fee + self.slippage_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_flashloan_config_default() {
        let config = FlashLoanConfig::default();
        assert_eq!(config.flash_fee, dec!(0.0009));
        assert_eq!(config.max_pool_fraction, dec!(0.10));
        assert_eq!(config.arbitrage_max_loan_usd, dec!(50000));
        assert_eq!(config.liquidation_health_margin, dec!(1.05));
        assert_eq!(config.repayment_epsilon, dec!(0.01));
        assert_eq!(config.scanner_interval(), Duration::from_secs(30));
        assert_eq!(config.min_arbitrage_spread(config.default_amm_fee), dec!(0.0049));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flashloan_config_from_toml() {
        let config = FlashLoanConfig::from_toml_str(
            r#"
            flash_fee = "0.0005"
            scanner_interval_ms = 1000
            arbitrage_quote_assets = ["USDC", "USDT"]
            "#,
        );
        assert!(config.is_ok());
        if let Ok(config) = config {
            assert_eq!(config.flash_fee, dec!(0.0005));
            assert_eq!(config.scanner_interval_ms, 1000);
            assert_eq!(config.arbitrage_quote_assets.len(), 2);
            assert_eq!(config.liquidation_bonus, dec!(0.05));
        }
    }

    #[test]
    fn test_flashloan_config_rejects_bad_values() {
        assert!(FlashLoanConfig::from_toml_str("flash_fee = \"1.5\"").is_err());
        assert!(FlashLoanConfig::from_toml_str("max_pool_fraction = \"0\"").is_err());
        assert!(FlashLoanConfig::from_toml_str("scanner_interval_ms = 0").is_err());
        assert!(FlashLoanConfig::from_toml_str(
            "arbitrage_min_loan_usd = \"100000\"\narbitrage_max_loan_usd = \"10\""
        )
        .is_err());
    }
}
