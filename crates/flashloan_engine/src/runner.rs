//! Strategy runners
//!
//! A runner receives the borrowed funds (implicitly, the pool is already
//! debited) and reports whether it repaid, how much, and its gross profit.
//! Runners never touch the pool; [`crate::FlashLoanEngine`] owns commit and
//! rollback.

use async_trait::async_trait;
use cdp_ledger::{CollateralManager, LedgerError, PositionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Ledger shared between the lending system and the liquidation runner
pub type SharedLedger = Arc<RwLock<CollateralManager>>;

/// Built-in strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Buy on one venue, sell on the other
    #[serde(rename = "DEX_ARB")]
    DexArbitrage,
    /// Repay an unhealthy position's debt and seize its collateral
    #[serde(rename = "LIQUIDATION")]
    Liquidation,
}

impl StrategyKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DexArbitrage => "DEX_ARB",
            Self::Liquidation => "LIQUIDATION",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEX_ARB" => Ok(Self::DexArbitrage),
            "LIQUIDATION" => Ok(Self::Liquidation),
            other => Err(EngineError::UnknownStrategy { name: other.to_owned() }),
        }
    }
}

/// Strategy-specific parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum StrategyParams {
    /// Arbitrage between an AMM and the oracle
    #[serde(rename = "DEX_ARB")]
    DexArbitrage {
        /// AMM-implied price
        amm_price: Decimal,
        /// Oracle price
        oracle_price: Decimal,
        /// AMM swap fee, engine default when absent
        amm_fee: Option<Decimal>,
    },
    /// Liquidation of one ledger position
    #[serde(rename = "LIQUIDATION")]
    Liquidation {
        /// Target position
        position_id: PositionId,
    },
}

impl StrategyParams {
    /// Strategy these parameters belong to
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::DexArbitrage { .. } => StrategyKind::DexArbitrage,
            Self::Liquidation { .. } => StrategyKind::Liquidation,
        }
    }
}

/// A flash loan to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanRequest {
    /// Strategy to run
    pub strategy: StrategyKind,
    /// Pool token borrowed
    pub token: String,
    /// Principal
    pub loan_amount: Decimal,
    /// Strategy parameters
    pub params: StrategyParams,
}

impl FlashLoanRequest {
    /// Arbitrage request
    #[must_use]
    pub fn dex_arbitrage(token: &str, loan_amount: Decimal, amm_price: Decimal, oracle_price: Decimal) -> Self {
        Self {
            strategy: StrategyKind::DexArbitrage,
            token: token.to_owned(),
            loan_amount,
            params: StrategyParams::DexArbitrage {
                amm_price,
                oracle_price,
                amm_fee: None,
            },
        }
    }

    /// Liquidation request
    #[must_use]
    pub fn liquidation(token: &str, loan_amount: Decimal, position_id: PositionId) -> Self {
        Self {
            strategy: StrategyKind::Liquidation,
            token: token.to_owned(),
            loan_amount,
            params: StrategyParams::Liquidation { position_id },
        }
    }

    /// Request for a strategy given by name
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStrategy`] for unrecognised names
    pub fn named(strategy: &str, token: &str, loan_amount: Decimal, params: StrategyParams) -> EngineResult<Self> {
        Ok(Self {
            strategy: strategy.parse()?,
            token: token.to_owned(),
            loan_amount,
            params,
        })
    }

    /// Check the request before any funds move
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a non-positive loan, an empty
    /// token or parameters that belong to another strategy
    pub fn validate(&self) -> EngineResult<()> {
        if self.loan_amount <= Decimal::ZERO {
            return Err(EngineError::validation(
                "loan_amount",
                format!("must be positive, got {}", self.loan_amount),
            ));
        }
        if self.token.is_empty() {
            return Err(EngineError::validation("token", "must not be empty"));
        }
        if self.params.kind() != self.strategy {
            return Err(EngineError::validation(
                "params",
                format!("{} parameters supplied for {}", self.params.kind(), self.strategy),
            ));
        }
        Ok(())
    }
}

/// What a runner reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategyOutcome {
    /// Runner claims to have repaid
    pub repaid: bool,
    /// Amount returned to the pool
    pub repaid_amount: Decimal,
    /// Gross strategy profit before the flash fee
    pub profit: Decimal,
}

/// Strategy runner interface
#[async_trait]
pub trait StrategyRunner: Send + Sync {
    /// Run the strategy with `request.loan_amount` borrowed and `fee` owed
    async fn run(&self, request: &FlashLoanRequest, fee: Decimal) -> EngineResult<StrategyOutcome>;

    /// Strategy this runner serves
    fn kind(&self) -> StrategyKind;
}

/// Simulated AMM/oracle arbitrage
#[derive(Debug, Clone)]
pub struct DexArbitrageRunner {
    default_amm_fee: Decimal,
    slippage: Decimal,
}

impl DexArbitrageRunner {
    /// Create a runner
    #[must_use]
    pub const fn new(default_amm_fee: Decimal, slippage: Decimal) -> Self {
        Self {
            default_amm_fee,
            slippage,
        }
    }
}

#[async_trait]
impl StrategyRunner for DexArbitrageRunner {
    async fn run(&self, request: &FlashLoanRequest, fee: Decimal) -> EngineResult<StrategyOutcome> {
        let StrategyParams::DexArbitrage {
            amm_price,
            oracle_price,
            amm_fee,
        } = &request.params
        else {
            return Err(EngineError::validation("params", "expected DEX_ARB parameters"));
        };
        if *amm_price <= Decimal::ZERO || *oracle_price <= Decimal::ZERO {
            return Err(EngineError::validation("price", "AMM and oracle prices must be positive"));
        }

        let loan = request.loan_amount;
        let amm_fee = amm_fee.unwrap_or(self.default_amm_fee);
        let (Some(spread), Some(costs)) = (
            (*oracle_price - *amm_price).checked_div(*oracle_price).map(|s| s.abs()),
            amm_fee.checked_add(self.slippage).and_then(|rate| loan.checked_mul(rate)),
        ) else {
            return Err(EngineError::validation("price", "spread is out of range"));
        };
        let profit = loan
            .checked_mul(spread)
            .and_then(|gross| gross.checked_sub(costs))
            .ok_or_else(|| EngineError::validation("price", "profit is out of range"))?;
        debug!("DEX_ARB on {}: spread {spread}, gross profit {profit}", request.token);

        Ok(StrategyOutcome {
            repaid: true,
            repaid_amount: loan + fee,
            profit,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::DexArbitrage
    }
}

/// Liquidates ledger positions with borrowed funds
#[derive(Debug, Clone)]
pub struct LiquidationRunner {
    ledger: SharedLedger,
    bonus: Decimal,
    health_margin: Decimal,
    liquidator_id: String,
}

impl LiquidationRunner {
    /// Create a runner over a shared ledger
    #[must_use]
    pub fn new(ledger: SharedLedger, bonus: Decimal, health_margin: Decimal, liquidator_id: &str) -> Self {
        Self {
            ledger,
            bonus,
            health_margin,
            liquidator_id: liquidator_id.to_owned(),
        }
    }
}

#[async_trait]
impl StrategyRunner for LiquidationRunner {
    async fn run(&self, request: &FlashLoanRequest, fee: Decimal) -> EngineResult<StrategyOutcome> {
        let StrategyParams::Liquidation { position_id } = request.params else {
            return Err(EngineError::validation("params", "expected LIQUIDATION parameters"));
        };
        let not_found = |e: LedgerError| match e {
            LedgerError::PositionNotFound { position_id } => EngineError::LoanNotFound { position_id },
            other => EngineError::Ledger(other),
        };

        let mut ledger = self.ledger.write().await;
        let health = ledger.position_health(position_id).map_err(not_found)?;
        if health.health_factor >= self.health_margin {
            return Err(EngineError::StrategyFailed {
                strategy: StrategyKind::Liquidation.to_string(),
                message: format!(
                    "{position_id} health {} is not below {}",
                    health.health_factor.round_dp(4),
                    self.health_margin
                ),
            });
        }

        let record = ledger
            .liquidate_position(position_id, &self.liquidator_id)
            .map_err(not_found)?;
        drop(ledger);

        Ok(StrategyOutcome {
            repaid: true,
            repaid_amount: request.loan_amount + fee,
            profit: record.collateral_value_usd * self.bonus,
        })
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Liquidation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_ledger::{CollateralRegistry, PositionStatus, PriceBook};
    use rust_decimal_macros::dec;

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("DEX_ARB".parse::<StrategyKind>(), Ok(StrategyKind::DexArbitrage));
        assert_eq!("LIQUIDATION".parse::<StrategyKind>(), Ok(StrategyKind::Liquidation));
        assert!(matches!(
            "dex_arb".parse::<StrategyKind>(),
            Err(EngineError::UnknownStrategy { .. })
        ));
        assert_eq!(StrategyKind::Liquidation.to_string(), "LIQUIDATION");
    }

    #[test]
    fn test_request_validation() {
        let ok = FlashLoanRequest::dex_arbitrage("USDC", dec!(10000), dec!(99), dec!(100));
        assert!(ok.validate().is_ok());

        let zero = FlashLoanRequest::dex_arbitrage("USDC", Decimal::ZERO, dec!(99), dec!(100));
        assert!(zero.validate().is_err());

        let mismatched = FlashLoanRequest {
            strategy: StrategyKind::Liquidation,
            ..ok
        };
        assert!(mismatched.validate().is_err());

        assert!(FlashLoanRequest::named(
            "SANDWICH",
            "USDC",
            dec!(1),
            StrategyParams::Liquidation {
                position_id: PositionId::new(1)
            }
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_dex_arbitrage_runner_profit() {
        let runner = DexArbitrageRunner::new(dec!(0.003), dec!(0.001));
        let request = FlashLoanRequest::dex_arbitrage("USDC", dec!(10000), dec!(99), dec!(100));
        let outcome = runner.run(&request, dec!(9)).await;
        assert_eq!(
            outcome,
            Ok(StrategyOutcome {
                repaid: true,
                repaid_amount: dec!(10009),
                profit: dec!(60),
            })
        );
    }

    #[tokio::test]
    async fn test_dex_arbitrage_runner_rejects_extreme_prices() {
        let runner = DexArbitrageRunner::new(dec!(0.003), dec!(0.001));
        let request = FlashLoanRequest::dex_arbitrage("USDC", dec!(10000), Decimal::MAX, dec!(0.0001));
        assert!(matches!(
            runner.run(&request, dec!(9)).await,
            Err(EngineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_liquidation_runner() {
        let prices = Arc::new(PriceBook::with_default_prices());
        let mut manager = CollateralManager::new(CollateralRegistry::default(), prices.clone());
        let opened = manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1900));
        assert!(opened.is_ok());
        let Ok(opened) = opened else { return };
        let ledger: SharedLedger = Arc::new(RwLock::new(manager));
        let runner = LiquidationRunner::new(ledger.clone(), dec!(0.05), dec!(1.05), "flash_loan_engine");
        let request = FlashLoanRequest::liquidation("USDC", dec!(1900), opened.position_id);

        // healthy position is refused
        let refused = runner.run(&request, dec!(1.71)).await;
        assert!(matches!(refused, Err(EngineError::StrategyFailed { .. })));

        assert!(prices.set_price("ETH", dec!(1950)).is_ok());
        let outcome = runner.run(&request, dec!(1.71)).await;
        assert!(outcome.is_ok_and(|o| o.repaid && o.profit == dec!(97.5)));

        let guard = ledger.read().await;
        let position = guard.position(opened.position_id);
        assert!(position.is_ok_and(|p| p.status == PositionStatus::Liquidated
            && p.liquidated_by.as_deref() == Some("flash_loan_engine")));
        drop(guard);

        let missing = FlashLoanRequest::liquidation("USDC", dec!(1), PositionId::new(999));
        assert!(matches!(runner.run(&missing, dec!(0)).await, Err(EngineError::LoanNotFound { .. })));
    }
}
