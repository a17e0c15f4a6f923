//! Shared fixtures for the integration suites

#![allow(clippy::unwrap_used, reason = "Fixtures panic on setup failure")]
#![allow(clippy::expect_used, reason = "Fixtures panic on setup failure")]

use std::sync::{Arc, Once};

use cdp_ledger::{CollateralManager, CollateralRegistry, ManualClock, PriceBook, RecordingCreditSink};
use flashloan_engine::{
    AmmPoolQuote, FlashLoanConfig, FlashLoanEngine, LiquidityPool, SharedLedger, StaticAmmRegistry,
};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

/// Ledger wired to inspectable collaborators
pub struct LedgerHarness {
    pub manager: CollateralManager,
    pub prices: Arc<PriceBook>,
    pub clock: Arc<ManualClock>,
    pub credit: Arc<RecordingCreditSink>,
}

/// Default registry and prices, a manual clock and a recording credit sink
#[must_use]
pub fn ledger_harness() -> LedgerHarness {
    init_tracing();
    let prices = Arc::new(PriceBook::with_default_prices());
    let clock = Arc::new(ManualClock::default());
    let credit = Arc::new(RecordingCreditSink::new());
    let manager = CollateralManager::new(CollateralRegistry::default(), prices.clone())
        .with_clock(clock.clone())
        .with_credit_sink(credit.clone());
    LedgerHarness {
        manager,
        prices,
        clock,
        credit,
    }
}

/// Engine over a shared ledger
pub struct EngineHarness {
    pub engine: FlashLoanEngine,
    pub ledger: SharedLedger,
    pub prices: Arc<PriceBook>,
    pub credit: Arc<RecordingCreditSink>,
    pub amm: Arc<StaticAmmRegistry>,
}

/// Engine with `usdc` of pool liquidity and the given config
pub async fn engine_harness_with(usdc: Decimal, config: FlashLoanConfig) -> EngineHarness {
    let LedgerHarness {
        manager, prices, credit, ..
    } = ledger_harness();
    let ledger: SharedLedger = Arc::new(RwLock::new(manager));
    let mut pool = LiquidityPool::new();
    pool.deposit("USDC", usdc).unwrap();
    let amm = Arc::new(StaticAmmRegistry::new([AmmPoolQuote::new(
        "ETH",
        "USDC",
        Decimal::from(1_000_u64),
        Decimal::from(2_650_000_u64),
    )]));
    let engine = FlashLoanEngine::new(config, pool, ledger.clone(), amm.clone())
        .await
        .expect("engine construction");
    EngineHarness {
        engine,
        ledger,
        prices,
        credit,
        amm,
    }
}

/// Engine with `usdc` of pool liquidity and the default config
pub async fn engine_harness(usdc: Decimal) -> EngineHarness {
    engine_harness_with(usdc, FlashLoanConfig::default()).await
}
