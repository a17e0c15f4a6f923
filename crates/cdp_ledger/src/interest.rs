//! Interest accrual policies

use chrono::Duration;
use rust_decimal::Decimal;

/// Seconds in a 365-day year
pub const SECONDS_PER_YEAR: i64 = 365 * 24 * 3600;

/// Computes interest owed on a principal over an elapsed period
pub trait InterestPolicy: Send + Sync + std::fmt::Debug {
    /// Interest accrued on `principal` at `annual_rate_pct` over `elapsed`.
    /// Non-positive `elapsed` accrues nothing.
    fn accrue(&self, principal: Decimal, annual_rate_pct: Decimal, elapsed: Duration) -> Decimal;

    /// Policy name for logging
    fn name(&self) -> &'static str;
}

/// Simple interest; accrued interest is never folded into principal
#[derive(Debug, Clone, Copy)]
pub struct SimpleInterest {
    seconds_per_year: Decimal,
}

impl SimpleInterest {
    /// Simple interest over a custom year length
    #[must_use]
    pub fn with_year_seconds(seconds_per_year: i64) -> Self {
        Self {
            seconds_per_year: Decimal::from(seconds_per_year.max(1)),
        }
    }
}

impl Default for SimpleInterest {
    fn default() -> Self {
        Self::with_year_seconds(SECONDS_PER_YEAR)
    }
}

impl InterestPolicy for SimpleInterest {
    fn accrue(&self, principal: Decimal, annual_rate_pct: Decimal, elapsed: Duration) -> Decimal {
        let millis = elapsed.num_milliseconds();
        if millis <= 0 || principal <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let elapsed_secs = Decimal::new(millis, 3);
        principal
            .saturating_mul(annual_rate_pct / Decimal::ONE_HUNDRED)
            .saturating_mul(elapsed_secs / self.seconds_per_year)
    }

    fn name(&self) -> &'static str {
        "simple"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_one_year_simple_interest() {
        let policy = SimpleInterest::default();
        let interest = policy.accrue(dec!(1000), dec!(5), Duration::seconds(SECONDS_PER_YEAR));
        assert_eq!(interest, dec!(50));
    }

    #[test]
    fn test_partial_period() {
        let policy = SimpleInterest::default();
        let half_year = Duration::seconds(SECONDS_PER_YEAR / 2);
        assert_eq!(policy.accrue(dec!(2000), dec!(4.5), half_year), dec!(45));
    }

    #[test]
    fn test_no_accrual_without_elapsed_time() {
        let policy = SimpleInterest::default();
        assert_eq!(policy.accrue(dec!(1000), dec!(5), Duration::zero()), Decimal::ZERO);
        assert_eq!(policy.accrue(dec!(1000), dec!(5), Duration::seconds(-10)), Decimal::ZERO);
        assert_eq!(policy.accrue(Decimal::ZERO, dec!(5), Duration::days(30)), Decimal::ZERO);
    }
}
