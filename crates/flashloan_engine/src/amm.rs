//! AMM pool registry

use ahash::AHashMap;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Reserves of a constant-product pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmPoolQuote {
    /// Base token
    pub base: String,
    /// Quote token
    pub quote: String,
    /// Base reserve
    pub reserve_base: Decimal,
    /// Quote reserve
    pub reserve_quote: Decimal,
    /// Swap fee, when the pool reports one
    pub fee_rate: Option<Decimal>,
}

impl AmmPoolQuote {
    /// Create a pool quote
    #[must_use]
    pub fn new(base: &str, quote: &str, reserve_base: Decimal, reserve_quote: Decimal) -> Self {
        Self {
            base: base.to_owned(),
            quote: quote.to_owned(),
            reserve_base,
            reserve_quote,
            fee_rate: None,
        }
    }

    /// Set the swap fee
    #[must_use]
    pub const fn with_fee(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    /// Pair identifier, `BASE/QUOTE`
    #[must_use]
    pub fn pair(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Spot price of base in quote, `None` for an empty base reserve
    #[must_use]
    pub fn spot_price(&self) -> Option<Decimal> {
        if self.reserve_base <= Decimal::ZERO {
            return None;
        }
        self.reserve_quote.checked_div(self.reserve_base)
    }
}

/// Source of AMM pool reserves
#[async_trait]
pub trait AmmRegistry: Send + Sync {
    /// Current pool reserves
    async fn pools(&self) -> EngineResult<Vec<AmmPoolQuote>>;
}

/// In-memory AMM registry keyed by pair
#[derive(Debug, Default)]
pub struct StaticAmmRegistry {
    pools: RwLock<AHashMap<String, AmmPoolQuote>>,
}

impl StaticAmmRegistry {
    /// Registry holding `pools`
    #[must_use]
    pub fn new<I: IntoIterator<Item = AmmPoolQuote>>(pools: I) -> Self {
        Self {
            pools: RwLock::new(pools.into_iter().map(|p| (p.pair(), p)).collect()),
        }
    }

    /// Insert or replace a pool
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Amm`] for negative reserves
    pub async fn upsert_pool(&self, pool: AmmPoolQuote) -> EngineResult<()> {
        if pool.reserve_base.is_sign_negative() || pool.reserve_quote.is_sign_negative() {
            return Err(EngineError::Amm {
                message: format!("negative reserves for {}", pool.pair()),
            });
        }
        self.pools.write().await.insert(pool.pair(), pool);
        Ok(())
    }
}

#[async_trait]
impl AmmRegistry for StaticAmmRegistry {
    async fn pools(&self) -> EngineResult<Vec<AmmPoolQuote>> {
        let mut pools: Vec<_> = self.pools.read().await.values().cloned().collect();
        pools.sort_by(|a, b| a.pair().cmp(&b.pair()));
        Ok(pools)
    }
}
