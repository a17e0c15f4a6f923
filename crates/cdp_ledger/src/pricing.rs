//! Asset valuation
//!
//! [`ValuationProvider`] is the single synchronous price source the ledger
//! reads from. [`PriceBook`] is the in-process implementation; it is fed by
//! direct updates or by awaiting an upstream [`PriceOracle`].

use ahash::AHashMap;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};

/// Price used when no quote exists for an asset
pub const FALLBACK_PRICE_USD: Decimal = Decimal::ONE;

/// Synchronous USD valuation of assets
pub trait ValuationProvider: Send + Sync {
    /// Quoted USD price, if one is known
    fn quote(&self, symbol: &str) -> Option<Decimal>;

    /// USD price with the placeholder fallback applied
    fn price_usd(&self, symbol: &str) -> Decimal {
        self.quote(symbol).unwrap_or_else(|| {
            warn!("No price for {symbol}, valuing at placeholder {FALLBACK_PRICE_USD}");
            FALLBACK_PRICE_USD
        })
    }
}

/// Upstream price feed
#[async_trait::async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch the current USD price for an asset
    async fn fetch_price(&self, symbol: &str) -> Option<Decimal>;

    /// Oracle name for logging
    fn name(&self) -> &'static str;
}

/// Concurrent price table
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: DashMap<String, Decimal>,
}

impl PriceBook {
    /// Create an empty price book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a price book seeded with reference prices for the default registry
    #[must_use]
    pub fn with_default_prices() -> Self {
        let book = Self::new();
        for (symbol, price) in default_prices() {
            book.prices.insert(symbol.to_owned(), price);
        }
        book
    }

    /// Set the USD price of an asset
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if the price is not positive
    pub fn set_price(&self, symbol: &str, price: Decimal) -> LedgerResult<()> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::validation("price", format!("{symbol} price must be positive, got {price}")));
        }
        let previous = self.prices.insert(symbol.to_owned(), price);
        debug!("Price update {symbol}: {previous:?} -> {price}");
        Ok(())
    }

    /// Drop the quote for an asset
    pub fn remove_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.remove(symbol).map(|(_, price)| price)
    }

    /// Current quotes
    #[must_use]
    pub fn snapshot(&self) -> AHashMap<String, Decimal> {
        self.prices
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Pull prices for `symbols` from an oracle
    ///
    /// All quotes are awaited before the first write, so no lock is held
    /// across the oracle. Writes land one symbol at a time and a concurrent
    /// reader may see a mix of old and new quotes. Symbols the oracle cannot
    /// price keep their previous quote. Returns the number of prices updated.
    pub async fn refresh(&self, oracle: &dyn PriceOracle, symbols: &[&str]) -> usize {
        let mut fetched = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match oracle.fetch_price(symbol).await {
                Some(price) if price > Decimal::ZERO => fetched.push((*symbol, price)),
                Some(price) => warn!("{} returned non-positive price {price} for {symbol}", oracle.name()),
                None => debug!("{} has no price for {symbol}", oracle.name()),
            }
        }

        for (symbol, price) in &fetched {
            self.prices.insert((*symbol).to_owned(), *price);
        }
        debug!("Refreshed {} of {} prices from {}", fetched.len(), symbols.len(), oracle.name());
        fetched.len()
    }
}

impl ValuationProvider for PriceBook {
    fn quote(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).map(|price| *price)
    }
}

/// Fixed-table oracle
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: AHashMap<String, Decimal>,
}

impl StaticPriceOracle {
    /// Create an oracle serving the given prices
    #[must_use]
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            prices: prices.into_iter().map(|(symbol, price)| (symbol.into(), price)).collect(),
        }
    }
}

#[async_trait::async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn default_prices() -> [(&'static str, Decimal); 11] {
    [
        ("ETH", Decimal::new(2650, 0)),
        ("WBTC", Decimal::new(96_000, 0)),
        ("SOL", Decimal::new(135, 0)),
        ("ARB", Decimal::new(55, 2)),
        ("AVAX", Decimal::new(23, 0)),
        ("USDC", Decimal::ONE),
        ("USDT", Decimal::ONE),
        ("OBK-USD", Decimal::ONE),
        ("OBK-ETH", Decimal::new(2650, 0)),
        ("OBK-BTC", Decimal::new(96_000, 0)),
        ("OBK-GOLD", Decimal::new(2820, 0)),
    ]
}
