//! Opportunity scanning
//!
//! Both scans are pure: they read AMM reserves, prices and position health
//! and never mutate anything. [`ScanReport::build`] merges them by
//! descending net profit.

use cdp_ledger::{PositionHealth, PositionId, ValuationProvider};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::trace;

use crate::amm::AmmPoolQuote;
use crate::config::FlashLoanConfig;
use crate::runner::{FlashLoanRequest, StrategyKind, StrategyParams};

/// Which venue is cheap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArbitrageDirection {
    /// AMM below oracle
    BuyAmmSellOracle,
    /// AMM above oracle
    BuyOracleSellAmm,
}

/// How far below water a position is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidationUrgency {
    /// Health below 1.00
    Critical,
    /// Health below 1.02
    High,
    /// Health below the scan margin
    Medium,
}

impl LiquidationUrgency {
    /// Tier for a health factor
    #[must_use]
    pub fn from_health(health_factor: Decimal) -> Self {
        if health_factor < Decimal::ONE {
            Self::Critical
        } else if health_factor < Decimal::new(102, 2) {
            Self::High
        } else {
            Self::Medium
        }
    }
}

/// AMM/oracle price gap worth a flash loan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    /// Pool pair, `BASE/QUOTE`
    pub pair: String,
    /// Token borrowed
    pub token: String,
    /// Pool-implied price
    pub amm_price: Decimal,
    /// Oracle price in quote units
    pub oracle_price: Decimal,
    /// `(oracle - amm) / oracle`
    pub spread: Decimal,
    /// Trade direction
    pub direction: ArbitrageDirection,
    /// AMM fee applied
    pub amm_fee: Decimal,
    /// Loan size
    pub loan_amount: Decimal,
    /// `loan * |spread|`
    pub gross_profit: Decimal,
    /// Flash and AMM fees
    pub fees: Decimal,
    /// Estimated slippage cost
    pub slippage: Decimal,
    /// Gross minus fees and slippage
    pub net_profit: Decimal,
    /// Net profit over loan
    pub roi: Decimal,
}

/// Unhealthy position worth liquidating
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationOpportunity {
    /// Target position
    pub position_id: PositionId,
    /// Position owner
    pub owner: String,
    /// Token borrowed to cover the debt
    pub token: String,
    /// Collateral / debt
    pub health_factor: Decimal,
    /// Collateral value
    pub collateral_value_usd: Decimal,
    /// Debt value, also the loan size
    pub debt_value_usd: Decimal,
    /// Liquidator bonus
    pub bonus_usd: Decimal,
    /// Flash fee on the debt
    pub flash_fee_usd: Decimal,
    /// Bonus minus flash fee
    pub net_profit: Decimal,
    /// Urgency tier
    pub urgency: LiquidationUrgency,
}

/// Candidate flash loan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlashLoanOpportunity {
    /// AMM/oracle arbitrage
    DexArbitrage(ArbitrageOpportunity),
    /// Position liquidation
    Liquidation(LiquidationOpportunity),
}

impl FlashLoanOpportunity {
    /// Strategy that would exploit this opportunity
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::DexArbitrage(_) => StrategyKind::DexArbitrage,
            Self::Liquidation(_) => StrategyKind::Liquidation,
        }
    }

    /// Expected net profit
    #[must_use]
    pub const fn net_profit(&self) -> Decimal {
        match self {
            Self::DexArbitrage(a) => a.net_profit,
            Self::Liquidation(l) => l.net_profit,
        }
    }

    /// Request that would execute this opportunity
    #[must_use]
    pub fn to_request(&self) -> FlashLoanRequest {
        match self {
            Self::DexArbitrage(a) => FlashLoanRequest {
                strategy: StrategyKind::DexArbitrage,
                token: a.token.clone(),
                loan_amount: a.loan_amount,
                params: StrategyParams::DexArbitrage {
                    amm_price: a.amm_price,
                    oracle_price: a.oracle_price,
                    amm_fee: Some(a.amm_fee),
                },
            },
            Self::Liquidation(l) => FlashLoanRequest::liquidation(&l.token, l.debt_value_usd, l.position_id),
        }
    }
}

/// Arbitrage opportunities across `pools`
///
/// Pools quoted in an asset outside `config.arbitrage_quote_assets`, with an
/// empty reserve, or whose base or quote has no oracle price are skipped.
#[must_use]
pub fn scan_dex_arbitrage(
    pools: &[AmmPoolQuote],
    prices: &dyn ValuationProvider,
    config: &FlashLoanConfig,
) -> Vec<ArbitrageOpportunity> {
    let mut found = Vec::new();
    for pool in pools {
        if !config.arbitrage_quote_assets.iter().any(|q| *q == pool.quote) {
            continue;
        }
        let Some(amm_price) = pool.spot_price() else { continue };
        let (Some(base_usd), Some(quote_usd)) = (prices.quote(&pool.base), prices.quote(&pool.quote)) else {
            trace!("No oracle price for {}, skipping", pool.pair());
            continue;
        };
        let Some(oracle_price) = base_usd.checked_div(quote_usd).filter(|p| *p > Decimal::ZERO) else {
            continue;
        };

        let amm_fee = pool.fee_rate.unwrap_or(config.default_amm_fee);
        let spread = (oracle_price - amm_price) / oracle_price;
        if spread.abs() <= config.min_arbitrage_spread(amm_fee) {
            continue;
        }

        let loan_amount = (pool.reserve_quote * config.max_pool_fraction)
            .min(config.arbitrage_max_loan_usd)
            .max(config.arbitrage_min_loan_usd);
        let gross_profit = loan_amount * spread.abs();
        let fees = loan_amount * (config.flash_fee + amm_fee);
        let slippage = loan_amount * config.slippage_buffer;
        let net_profit = gross_profit - fees - slippage;
        if net_profit < config.min_profit_usd {
            continue;
        }

        found.push(ArbitrageOpportunity {
            pair: pool.pair(),
            token: pool.quote.clone(),
            amm_price,
            oracle_price,
            spread,
            direction: if spread > Decimal::ZERO {
                ArbitrageDirection::BuyAmmSellOracle
            } else {
                ArbitrageDirection::BuyOracleSellAmm
            },
            amm_fee,
            loan_amount,
            gross_profit,
            fees,
            slippage,
            net_profit,
            roi: net_profit / loan_amount,
        });
    }
    found
}

/// Positions below the liquidation margin, dust excluded
#[must_use]
pub fn scan_liquidations(health: &[PositionHealth], config: &FlashLoanConfig) -> Vec<LiquidationOpportunity> {
    health
        .iter()
        .filter(|h| h.debt_value_usd >= config.dust_debt_usd)
        .filter(|h| h.health_factor < config.liquidation_health_margin)
        .map(|h| {
            let bonus_usd = h.collateral_value_usd * config.liquidation_bonus;
            let flash_fee_usd = h.debt_value_usd * config.flash_fee;
            LiquidationOpportunity {
                position_id: h.position_id,
                owner: h.owner.clone(),
                token: h.borrow_asset.clone(),
                health_factor: h.health_factor,
                collateral_value_usd: h.collateral_value_usd,
                debt_value_usd: h.debt_value_usd,
                bonus_usd,
                flash_fee_usd,
                net_profit: bonus_usd - flash_fee_usd,
                urgency: LiquidationUrgency::from_health(h.health_factor),
            }
        })
        .collect()
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    /// Opportunities by descending net profit
    pub opportunities: Vec<FlashLoanOpportunity>,
    /// Arbitrage count
    pub dex_arbitrage_count: usize,
    /// Liquidation count
    pub liquidation_count: usize,
    /// Scan time
    pub scanned_at: DateTime<Utc>,
}

impl ScanReport {
    /// Merge both scans
    #[must_use]
    pub fn build(
        arbitrage: Vec<ArbitrageOpportunity>,
        liquidations: Vec<LiquidationOpportunity>,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        let dex_arbitrage_count = arbitrage.len();
        let liquidation_count = liquidations.len();
        let mut opportunities: Vec<_> = arbitrage
            .into_iter()
            .map(FlashLoanOpportunity::DexArbitrage)
            .chain(liquidations.into_iter().map(FlashLoanOpportunity::Liquidation))
            .collect();
        opportunities.sort_by(|a, b| b.net_profit().cmp(&a.net_profit()));

        Self {
            opportunities,
            dex_arbitrage_count,
            liquidation_count,
            scanned_at,
        }
    }

    /// Total opportunities
    #[must_use]
    pub fn total(&self) -> usize {
        self.opportunities.len()
    }

    /// Most profitable opportunity
    #[must_use]
    pub fn best(&self) -> Option<&FlashLoanOpportunity> {
        self.opportunities.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_ledger::PriceBook;
    use rust_decimal_macros::dec;

    fn prices() -> PriceBook {
        let book = PriceBook::new();
        for (symbol, price) in [("ETH", dec!(2650)), ("BTC", dec!(67000)), ("USDC", dec!(1))] {
            assert!(book.set_price(symbol, price).is_ok());
        }
        book
    }

    fn health(id: u64, collateral: Decimal, debt: Decimal) -> PositionHealth {
        PositionHealth {
            position_id: PositionId::new(id),
            owner: format!("owner-{id}"),
            borrow_asset: "USDC".to_owned(),
            collateral_value_usd: collateral,
            debt_value_usd: debt,
            health_factor: collateral / debt,
            liquidation_threshold: dec!(0.82),
        }
    }

    #[test]
    fn test_dex_arbitrage_scan() {
        let config = FlashLoanConfig::default();
        let pools = vec![
            // 2% below oracle on a deep pool: capped loan
            AmmPoolQuote::new("ETH", "USDC", dec!(1000), dec!(2597000)),
            // within the fee band
            AmmPoolQuote::new("BTC", "USDC", dec!(10), dec!(669000)),
            // not a quote asset
            AmmPoolQuote::new("ETH", "BTC", dec!(100), dec!(3)),
        ];
        let found = scan_dex_arbitrage(&pools, &prices(), &config);
        assert_eq!(found.len(), 1);

        let arb = &found[0];
        assert_eq!(arb.pair, "ETH/USDC");
        assert_eq!(arb.direction, ArbitrageDirection::BuyAmmSellOracle);
        assert_eq!(arb.amm_price, dec!(2597));
        assert_eq!(arb.loan_amount, dec!(50000));
        assert_eq!(arb.spread, dec!(0.02));
        assert_eq!(arb.net_profit, dec!(755));
        assert_eq!(arb.roi, dec!(0.0151));
    }

    #[test]
    fn test_dex_arbitrage_skips_unpriced_and_small() {
        let config = FlashLoanConfig::default();
        let pools = vec![
            AmmPoolQuote::new("DOGE", "USDC", dec!(1000), dec!(100)),
            AmmPoolQuote::new("ETH", "USDC", dec!(1), dec!(2800)).with_fee(dec!(0.5)),
        ];
        assert!(scan_dex_arbitrage(&pools, &prices(), &config).is_empty());
    }

    #[test]
    fn test_dex_arbitrage_loan_floor_and_direction() {
        let config = FlashLoanConfig::default();
        // tiny pool, AMM 10% above oracle
        let pools = vec![AmmPoolQuote::new("ETH", "USDC", dec!(0.1), dec!(291.5))];
        let found = scan_dex_arbitrage(&pools, &prices(), &config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].loan_amount, dec!(100));
        assert_eq!(found[0].direction, ArbitrageDirection::BuyOracleSellAmm);
    }

    #[test]
    fn test_liquidation_scan() {
        let config = FlashLoanConfig::default();
        let positions = vec![
            health(1, dec!(1950), dec!(1900)),
            health(2, dec!(1800), dec!(1900)),
            health(3, dec!(1930), dec!(1900)),
            health(4, dec!(5000), dec!(1900)),
            health(5, dec!(5), dec!(9)),
        ];
        let found = scan_liquidations(&positions, &config);
        assert_eq!(found.len(), 3);

        assert_eq!(found[0].urgency, LiquidationUrgency::Medium);
        assert_eq!(found[0].bonus_usd, dec!(97.5));
        assert_eq!(found[0].net_profit, dec!(95.79));
        assert_eq!(found[1].urgency, LiquidationUrgency::Critical);
        assert_eq!(found[2].urgency, LiquidationUrgency::High);
    }

    #[test]
    fn test_scan_report_orders_by_net_profit() {
        let config = FlashLoanConfig::default();
        let arbs = scan_dex_arbitrage(
            &[AmmPoolQuote::new("ETH", "USDC", dec!(1000), dec!(2597000))],
            &prices(),
            &config,
        );
        let liqs = scan_liquidations(&[health(1, dec!(1950), dec!(1900))], &config);
        let report = ScanReport::build(arbs, liqs, Utc::now());

        assert_eq!(report.total(), 2);
        assert_eq!(report.dex_arbitrage_count, 1);
        assert_eq!(report.liquidation_count, 1);
        assert_eq!(report.best().map(FlashLoanOpportunity::kind), Some(StrategyKind::DexArbitrage));

        let request = report.opportunities[1].to_request();
        assert_eq!(request.strategy, StrategyKind::Liquidation);
        assert_eq!(request.loan_amount, dec!(1900));
        assert!(request.validate().is_ok());
    }
}
