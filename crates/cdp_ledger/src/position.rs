//! CDP position model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::ValuationProvider;
use crate::registry::QualityTier;

/// Ledger-unique position identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(u64);

impl PositionId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cdp-{}", self.0)
    }
}

/// Position lifecycle state. `Closed` and `Liquidated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Open with outstanding debt
    Active,
    /// Debt repaid, collateral released
    Closed,
    /// Seized after breaching the liquidation threshold
    Liquidated,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
            Self::Liquidated => "LIQUIDATED",
        };
        f.write_str(label)
    }
}

/// Collateral/debt ratio. Zero debt reports `Decimal::MAX`.
#[must_use]
pub fn health_factor(collateral_value_usd: Decimal, debt_value_usd: Decimal) -> Decimal {
    if debt_value_usd <= Decimal::ZERO {
        return Decimal::MAX;
    }
    collateral_value_usd.checked_div(debt_value_usd).unwrap_or(Decimal::MAX)
}

/// A collateralized debt position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    /// Identifier
    pub id: PositionId,
    /// Owner
    pub owner: String,
    /// Collateral asset symbol
    pub collateral_asset: String,
    /// Locked collateral in asset units
    pub collateral_amount: Decimal,
    /// Collateral value at the last valuation
    pub collateral_value_usd: Decimal,
    /// Borrowed asset symbol
    pub borrow_asset: String,
    /// Outstanding principal in borrow-asset units
    pub borrow_principal: Decimal,
    /// Principal value at the last valuation
    pub borrow_value_usd: Decimal,
    /// Unpaid interest in borrow-asset units
    pub accrued_interest: Decimal,
    /// Annual rate locked at open
    pub interest_rate_pct: Decimal,
    /// Quality tier of the collateral
    pub quality: QualityTier,
    /// Max LTV at open
    pub max_ltv: Decimal,
    /// Liquidation threshold at open
    pub liquidation_threshold: Decimal,
    /// Liquidation penalty at open
    pub liquidation_penalty: Decimal,
    /// Collateral/debt ratio at the last valuation
    pub health_factor: Decimal,
    /// Lifecycle state
    pub status: PositionStatus,
    /// Open time
    pub opened_at: DateTime<Utc>,
    /// Last interest accrual
    pub last_accrual_at: DateTime<Utc>,
    /// Terminal transition time
    pub closed_at: Option<DateTime<Utc>>,
    /// Who liquidated the position, for on-demand liquidations
    pub liquidated_by: Option<String>,
}

impl Position {
    /// Principal plus accrued interest, in borrow-asset units
    #[must_use]
    pub fn total_debt(&self) -> Decimal {
        self.borrow_principal + self.accrued_interest
    }

    /// Debt value in USD at the last valuation
    #[must_use]
    pub fn debt_value_usd(&self, borrow_price: Decimal) -> Decimal {
        self.borrow_value_usd
            .saturating_add(self.accrued_interest.saturating_mul(borrow_price))
    }

    /// Whether the position is still open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Collateral price at which health falls to the liquidation threshold,
    /// given the current debt
    #[must_use]
    pub fn liquidation_price(&self, borrow_price: Decimal) -> Decimal {
        if self.collateral_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.debt_value_usd(borrow_price) * self.liquidation_threshold)
            .checked_div(self.collateral_amount)
            .unwrap_or(Decimal::MAX)
    }

    /// Recompute cached USD values and health at current prices
    pub fn revalue(&mut self, prices: &dyn ValuationProvider) {
        let collateral_price = prices.price_usd(&self.collateral_asset);
        let borrow_price = prices.price_usd(&self.borrow_asset);
        self.collateral_value_usd = self.collateral_amount.saturating_mul(collateral_price);
        self.borrow_value_usd = self.borrow_principal.saturating_mul(borrow_price);
        self.recompute_health(borrow_price);
    }

    /// Recompute health from the cached collateral and principal values
    pub fn recompute_health(&mut self, borrow_price: Decimal) {
        self.health_factor = health_factor(self.collateral_value_usd, self.debt_value_usd(borrow_price));
    }

    /// Caller-facing view
    #[must_use]
    pub fn summary(&self, borrow_price: Decimal) -> PositionSummary {
        PositionSummary {
            position_id: self.id,
            status: self.status,
            collateral_asset: self.collateral_asset.clone(),
            collateral_amount: self.collateral_amount,
            collateral_value_usd: self.collateral_value_usd.round_dp(2),
            borrow_asset: self.borrow_asset.clone(),
            total_debt: self.total_debt(),
            debt_value_usd: self.debt_value_usd(borrow_price).round_dp(2),
            health_factor: self.health_factor,
            interest_rate_pct: self.interest_rate_pct,
            quality: self.quality,
            opened_at: self.opened_at,
        }
    }
}

/// Read-only summary returned by position queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSummary {
    /// Identifier
    pub position_id: PositionId,
    /// Lifecycle state
    pub status: PositionStatus,
    /// Collateral asset symbol
    pub collateral_asset: String,
    /// Locked collateral
    pub collateral_amount: Decimal,
    /// Collateral value in USD
    pub collateral_value_usd: Decimal,
    /// Borrowed asset symbol
    pub borrow_asset: String,
    /// Principal plus interest
    pub total_debt: Decimal,
    /// Debt value in USD
    pub debt_value_usd: Decimal,
    /// Collateral/debt ratio
    pub health_factor: Decimal,
    /// Annual rate
    pub interest_rate_pct: Decimal,
    /// Collateral quality tier
    pub quality: QualityTier,
    /// Open time
    pub opened_at: DateTime<Utc>,
}

/// Valuation of an active position at current prices, without mutating it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionHealth {
    /// Identifier
    pub position_id: PositionId,
    /// Owner
    pub owner: String,
    /// Borrowed asset symbol
    pub borrow_asset: String,
    /// Collateral value in USD
    pub collateral_value_usd: Decimal,
    /// Principal plus interest in USD
    pub debt_value_usd: Decimal,
    /// Collateral/debt ratio
    pub health_factor: Decimal,
    /// Liquidation threshold of the position
    pub liquidation_threshold: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceBook;
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        Position {
            id: PositionId::new(1),
            owner: "alice".to_owned(),
            collateral_asset: "ETH".to_owned(),
            collateral_amount: dec!(1),
            collateral_value_usd: dec!(2650),
            borrow_asset: "USDC".to_owned(),
            borrow_principal: dec!(1900),
            borrow_value_usd: dec!(1900),
            accrued_interest: Decimal::ZERO,
            interest_rate_pct: dec!(4.5),
            quality: QualityTier::AAA,
            max_ltv: dec!(0.75),
            liquidation_threshold: dec!(0.82),
            liquidation_penalty: dec!(0.05),
            health_factor: Decimal::ZERO,
            status: PositionStatus::Active,
            opened_at: now,
            last_accrual_at: now,
            closed_at: None,
            liquidated_by: None,
        }
    }

    #[test]
    fn test_position_id_display() {
        assert_eq!(PositionId::new(42).to_string(), "cdp-42");
        assert_eq!(PositionStatus::Liquidated.to_string(), "LIQUIDATED");
    }

    #[test]
    fn test_health_factor_guards_zero_debt() {
        assert_eq!(health_factor(dec!(100), Decimal::ZERO), Decimal::MAX);
        assert_eq!(health_factor(dec!(100), dec!(50)), dec!(2));
    }

    #[test]
    fn test_revalue_includes_interest() {
        let prices = PriceBook::with_default_prices();
        let mut position = sample_position();
        position.accrued_interest = dec!(100);
        position.revalue(&prices);

        assert_eq!(position.collateral_value_usd, dec!(2650));
        assert_eq!(position.debt_value_usd(Decimal::ONE), dec!(2000));
        assert_eq!(position.health_factor, dec!(1.325));
        assert_eq!(position.total_debt(), dec!(2000));
    }

    #[test]
    fn test_liquidation_price() {
        let position = sample_position();
        // 1900 * 0.82 / 1
        assert_eq!(position.liquidation_price(Decimal::ONE), dec!(1558));
    }
}
