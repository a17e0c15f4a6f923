//! Collateral-swap preview

use cdp_ledger::ValuationProvider;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// One side of the swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapLeg {
    /// Asset
    pub token: String,
    /// Amount in asset units
    pub amount: Decimal,
    /// USD value
    pub value_usd: Decimal,
}

/// Fee breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapCosts {
    /// AMM swap fee
    pub amm_fee_usd: Decimal,
    /// Flash loan fee
    pub flash_fee_usd: Decimal,
    /// Both fees
    pub total_cost_usd: Decimal,
    /// Total cost over position value, in percent
    pub cost_pct: Decimal,
}

/// Ordered step of an atomic re-collateralization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStep {
    /// Borrow the replacement collateral
    FlashBorrow {
        /// Asset borrowed
        token: String,
        /// Amount borrowed
        amount: Decimal,
        /// USD value borrowed
        value_usd: Decimal,
    },
    /// Post it as collateral
    DepositCollateral {
        /// New collateral
        token: String,
    },
    /// Release the old collateral
    WithdrawCollateral {
        /// Old collateral
        token: String,
        /// Amount released
        amount: Decimal,
    },
    /// Sell old for new on the AMM
    Swap {
        /// Sold asset
        from: String,
        /// Bought asset
        to: String,
    },
    /// Return loan plus fee
    RepayFlashLoan {
        /// Fee rate
        fee_rate: Decimal,
    },
    /// Resulting cost
    NetCost {
        /// Cost in USD
        total_cost_usd: Decimal,
        /// Cost in percent
        cost_pct: Decimal,
    },
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlashBorrow {
                token,
                amount,
                value_usd,
            } => write!(f, "Flash borrow {} {token} (${})", amount.round_dp(4), value_usd.round_dp(2)),
            Self::DepositCollateral { token } => write!(f, "Deposit {token} as new collateral"),
            Self::WithdrawCollateral { token, amount } => write!(f, "Withdraw {amount} {token} collateral"),
            Self::Swap { from, to } => write!(f, "Swap {from}->{to} on AMM"),
            Self::RepayFlashLoan { fee_rate } => {
                write!(f, "Repay flash loan + {}% fee", (*fee_rate * Decimal::ONE_HUNDRED).normalize())
            }
            Self::NetCost {
                total_cost_usd,
                cost_pct,
            } => write!(f, "Net cost: ${} ({}% of position)", total_cost_usd.round_dp(2), cost_pct.round_dp(2)),
        }
    }
}

/// Non-binding plan for replacing one collateral with another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollateralSwapPreview {
    /// Position owner
    pub owner: String,
    /// Collateral released
    pub from: SwapLeg,
    /// Collateral acquired, valued net of costs
    pub to: SwapLeg,
    /// Fee breakdown
    pub costs: SwapCosts,
    /// Steps in execution order
    pub steps: Vec<SwapStep>,
    /// Costs leave a positive position value
    pub feasible: bool,
}

/// Preview swapping `amount` of `from_token` collateral into `to_token`
///
/// Prices come from `prices`; missing prices fall back to the placeholder.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] for a non-positive amount or identical
/// assets
pub fn calculate_collateral_swap(
    owner: &str,
    from_token: &str,
    to_token: &str,
    amount: Decimal,
    prices: &dyn ValuationProvider,
    amm_fee: Decimal,
    flash_fee: Decimal,
) -> EngineResult<CollateralSwapPreview> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::validation("amount", format!("must be positive, got {amount}")));
    }
    if from_token == to_token {
        return Err(EngineError::validation("to_token", "must differ from from_token"));
    }

    let from_value = amount * prices.price_usd(from_token);
    let to_amount = from_value / prices.price_usd(to_token);
    let amm_fee_usd = from_value * amm_fee;
    let flash_fee_usd = from_value * flash_fee;
    let total_cost_usd = amm_fee_usd + flash_fee_usd;
    let cost_pct = total_cost_usd / from_value * Decimal::ONE_HUNDRED;

    let steps = vec![
        SwapStep::FlashBorrow {
            token: to_token.to_owned(),
            amount: to_amount,
            value_usd: from_value,
        },
        SwapStep::DepositCollateral {
            token: to_token.to_owned(),
        },
        SwapStep::WithdrawCollateral {
            token: from_token.to_owned(),
            amount,
        },
        SwapStep::Swap {
            from: from_token.to_owned(),
            to: to_token.to_owned(),
        },
        SwapStep::RepayFlashLoan { fee_rate: flash_fee },
        SwapStep::NetCost {
            total_cost_usd,
            cost_pct,
        },
    ];

    Ok(CollateralSwapPreview {
        owner: owner.to_owned(),
        from: SwapLeg {
            token: from_token.to_owned(),
            amount,
            value_usd: from_value,
        },
        to: SwapLeg {
            token: to_token.to_owned(),
            amount: to_amount,
            value_usd: from_value - total_cost_usd,
        },
        costs: SwapCosts {
            amm_fee_usd,
            flash_fee_usd,
            total_cost_usd,
            cost_pct,
        },
        steps,
        feasible: total_cost_usd < from_value,
    })
}
