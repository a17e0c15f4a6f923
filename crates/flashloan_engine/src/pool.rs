//! Shared liquidity pool
//!
//! Per-token balances shared by ordinary lending and the flash-loan engine.
//! Balances never go negative.

use ahash::AHashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Token balances
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiquidityPool {
    balances: AHashMap<String, Decimal>,
}

impl LiquidityPool {
    /// Empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool seeded with the reference lending liquidity
    #[must_use]
    pub fn with_default_seed() -> Self {
        let mut pool = Self::new();
        for (token, amount) in [
            ("USDC", Decimal::from(50_000_000_u64)),
            ("USDT", Decimal::from(30_000_000_u64)),
            ("ETH", Decimal::from(5_000_u64)),
            ("BTC", Decimal::from(200_u64)),
            ("SOL", Decimal::from(100_000_u64)),
        ] {
            pool.balances.insert(token.to_owned(), amount);
        }
        pool
    }

    /// Balance of a token, zero when unknown
    #[must_use]
    pub fn balance(&self, token: &str) -> Decimal {
        self.balances.get(token).copied().unwrap_or_default()
    }

    /// All balances
    #[must_use]
    pub fn balances(&self) -> &AHashMap<String, Decimal> {
        &self.balances
    }

    /// Add liquidity
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a non-positive amount or one
    /// that would overflow the balance
    pub fn deposit(&mut self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation("amount", format!("deposit must be positive, got {amount}")));
        }
        self.credit(token, amount)
    }

    /// Remove liquidity
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for a non-positive amount
    /// - [`EngineError::InsufficientBalance`] when the pool holds less than `amount`
    pub fn withdraw(&mut self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation("amount", format!("withdrawal must be positive, got {amount}")));
        }
        self.debit(token, amount)
    }

    pub(crate) fn debit(&mut self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        let available = self.balance(token);
        if amount > available {
            return Err(EngineError::InsufficientBalance {
                token: token.to_owned(),
                requested: amount,
                available,
            });
        }
        let remaining = available - amount;
        self.balances.insert(token.to_owned(), remaining);
        debug!("Pool {token}: -{amount} -> {remaining}");
        Ok(remaining)
    }

    pub(crate) fn credit(&mut self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        let balance = self.balance(token).checked_add(amount).ok_or_else(|| {
            EngineError::validation("amount", format!("{token} balance cannot hold another {amount}"))
        })?;
        self.balances.insert(token.to_owned(), balance);
        debug!("Pool {token}: +{amount} -> {balance}");
        Ok(balance)
    }

    /// Put a token balance back to an earlier snapshot
    pub(crate) fn restore(&mut self, token: &str, snapshot: Decimal) {
        self.balances.insert(token.to_owned(), snapshot);
        debug!("Pool {token}: restored to {snapshot}");
    }
}
