//! # Flash Loan Engine
//!
//! Atomic flash loans over a shared [`LiquidityPool`]. A loan is debited,
//! handed to a [`StrategyRunner`], verified against `loan + fee`, and then
//! either committed (pool grows by exactly the fee) or rolled back to the
//! exact pre-call balance.
//!
//! ## Strategies
//! - `DEX_ARB`: AMM/oracle price gap, simulated by [`DexArbitrageRunner`]
//! - `LIQUIDATION`: liquidates a [`cdp_ledger::CollateralManager`] position
//!   through [`LiquidationRunner`]
//!
//! [`FlashLoanEngine::scan_opportunities`] finds candidates for both without
//! mutating anything; the optional scanner repeats it on an interval.
//!
//! ## Safety
//! - Zero `unwrap()`, `expect()`, or `panic!()` in production code
//! - Runner panics and watchdog timeouts take the rollback path

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unreachable
)]
#![warn(missing_docs, clippy::undocumented_unsafe_blocks)]

pub mod amm;
pub mod config;
pub mod engine;
pub mod error;
pub mod opportunity;
pub mod pool;
pub mod runner;
pub mod stats;
pub mod swap;

pub use amm::{AmmPoolQuote, AmmRegistry, StaticAmmRegistry};
pub use config::FlashLoanConfig;
pub use engine::{FlashLoanEngine, FlashLoanReceipt};
pub use error::{EngineError, EngineResult};
pub use opportunity::{
    scan_dex_arbitrage, scan_liquidations, ArbitrageDirection, ArbitrageOpportunity, FlashLoanOpportunity,
    LiquidationOpportunity, LiquidationUrgency, ScanReport,
};
pub use pool::LiquidityPool;
pub use runner::{
    DexArbitrageRunner, FlashLoanRequest, LiquidationRunner, SharedLedger, StrategyKind, StrategyOutcome,
    StrategyParams, StrategyRunner,
};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use swap::{calculate_collateral_swap, CollateralSwapPreview, SwapCosts, SwapLeg, SwapStep};
