//! Engine counters

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use crate::runner::StrategyKind;

const SCALE: u64 = 1_000_000;

fn scaled_u64(amount: Decimal) -> u64 {
    amount.saturating_mul(Decimal::from(SCALE)).trunc().to_u64().unwrap_or(u64::MAX)
}

fn scaled_i64(amount: Decimal) -> i64 {
    let scaled = amount.saturating_mul(Decimal::from(SCALE)).trunc();
    scaled
        .to_i64()
        .unwrap_or(if scaled.is_sign_negative() { i64::MIN } else { i64::MAX })
}

fn unscale(raw: i128) -> Decimal {
    Decimal::from_i128_with_scale(raw, 6).normalize()
}

/// Lock-free engine statistics
#[derive(Debug)]
pub struct EngineStats {
    /// Loans debited from the pool
    pub loans_issued: AtomicU64,

    /// Arbitrage loans that were repaid
    pub successful_arbitrages: AtomicU64,

    /// Liquidation loans that were repaid
    pub successful_liquidations: AtomicU64,

    /// Loans rolled back after the debit
    pub failed_loans: AtomicU64,

    /// Fees earned (scaled by 1e6)
    pub total_fees_scaled: AtomicU64,

    /// Principal lent on successful loans (scaled by 1e6)
    pub total_volume_scaled: AtomicU64,

    /// Strategy net profit after fees (scaled by 1e6)
    pub total_net_profit_scaled: AtomicI64,

    started_at: DateTime<Utc>,
    started: Instant,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            loans_issued: AtomicU64::new(0),
            successful_arbitrages: AtomicU64::new(0),
            successful_liquidations: AtomicU64::new(0),
            failed_loans: AtomicU64::new(0),
            total_fees_scaled: AtomicU64::new(0),
            total_volume_scaled: AtomicU64::new(0),
            total_net_profit_scaled: AtomicI64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl EngineStats {
    pub(crate) fn record_issued(&self) {
        self.loans_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, kind: StrategyKind, loan: Decimal, fee: Decimal, net_profit: Decimal) {
        match kind {
            StrategyKind::DexArbitrage => self.successful_arbitrages.fetch_add(1, Ordering::Relaxed),
            StrategyKind::Liquidation => self.successful_liquidations.fetch_add(1, Ordering::Relaxed),
        };
        self.total_fees_scaled.fetch_add(scaled_u64(fee), Ordering::Relaxed);
        self.total_volume_scaled.fetch_add(scaled_u64(loan), Ordering::Relaxed);
        self.total_net_profit_scaled.fetch_add(scaled_i64(net_profit), Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_loans.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view with derived rates
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let loans_issued = self.loans_issued.load(Ordering::Relaxed);
        let successful_arbitrages = self.successful_arbitrages.load(Ordering::Relaxed);
        let successful_liquidations = self.successful_liquidations.load(Ordering::Relaxed);
        let successes = successful_arbitrages.saturating_add(successful_liquidations);
        let total_net_profit_usd = unscale(i128::from(self.total_net_profit_scaled.load(Ordering::Relaxed)));

        let success_rate_pct = if loans_issued == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(successes) * Decimal::ONE_HUNDRED / Decimal::from(loans_issued)).round_dp(2)
        };
        let avg_profit_per_loan_usd = if successes == 0 {
            Decimal::ZERO
        } else {
            (total_net_profit_usd / Decimal::from(successes)).round_dp(2)
        };

        EngineStatsSnapshot {
            loans_issued,
            successful_arbitrages,
            successful_liquidations,
            failed_loans: self.failed_loans.load(Ordering::Relaxed),
            total_fees_earned_usd: unscale(i128::from(self.total_fees_scaled.load(Ordering::Relaxed))),
            total_volume_usd: unscale(i128::from(self.total_volume_scaled.load(Ordering::Relaxed))),
            total_net_profit_usd,
            success_rate_pct,
            avg_profit_per_loan_usd,
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Serializable statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    /// Loans debited from the pool
    pub loans_issued: u64,
    /// Arbitrage loans repaid
    pub successful_arbitrages: u64,
    /// Liquidation loans repaid
    pub successful_liquidations: u64,
    /// Loans rolled back
    pub failed_loans: u64,
    /// Fees retained by the pool
    pub total_fees_earned_usd: Decimal,
    /// Principal of successful loans
    pub total_volume_usd: Decimal,
    /// Strategy profit net of fees
    pub total_net_profit_usd: Decimal,
    /// Successful loans over issued loans, in percent
    pub success_rate_pct: Decimal,
    /// Net profit per successful loan
    pub avg_profit_per_loan_usd: Decimal,
    /// Engine creation time
    pub started_at: DateTime<Utc>,
    /// Seconds since creation
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_engine_stats_operations() {
        let stats = EngineStats::default();
        stats.record_issued();
        stats.record_issued();
        stats.record_success(StrategyKind::DexArbitrage, dec!(10000), dec!(9), dec!(51));
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loans_issued, 2);
        assert_eq!(snapshot.successful_arbitrages, 1);
        assert_eq!(snapshot.failed_loans, 1);
        assert_eq!(snapshot.total_fees_earned_usd, dec!(9));
        assert_eq!(snapshot.total_volume_usd, dec!(10000));
        assert_eq!(snapshot.success_rate_pct, dec!(50));
        assert_eq!(snapshot.avg_profit_per_loan_usd, dec!(51));
    }

    #[test]
    fn test_negative_net_profit_is_tracked() {
        let stats = EngineStats::default();
        stats.record_issued();
        stats.record_success(StrategyKind::Liquidation, dec!(100), dec!(0.09), dec!(-0.04));
        assert_eq!(stats.snapshot().total_net_profit_usd, dec!(-0.04));
    }

    #[test]
    fn test_empty_stats() {
        let snapshot = EngineStats::default().snapshot();
        assert_eq!(snapshot.success_rate_pct, Decimal::ZERO);
        assert_eq!(snapshot.avg_profit_per_loan_usd, Decimal::ZERO);
    }
}
