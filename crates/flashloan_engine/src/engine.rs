//! Flash-loan engine
//!
//! [`FlashLoanEngine::execute`] holds the pool lock across the whole
//! debit, run, verify and commit-or-rollback sequence. After it returns the
//! token balance is either the pre-call balance plus the fee, or exactly the
//! pre-call balance.
//!
//! Lock order is pool, then ledger. The scanner only takes the ledger read
//! lock and never touches the pool.

use ahash::AHashMap;
use cdp_ledger::ValuationProvider;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::amm::AmmRegistry;
use crate::config::FlashLoanConfig;
use crate::error::{EngineError, EngineResult};
use crate::opportunity::{scan_dex_arbitrage, scan_liquidations, FlashLoanOpportunity, ScanReport};
use crate::pool::LiquidityPool;
use crate::runner::{
    DexArbitrageRunner, FlashLoanRequest, LiquidationRunner, SharedLedger, StrategyKind, StrategyOutcome,
    StrategyRunner,
};
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::swap::{calculate_collateral_swap, CollateralSwapPreview};

/// Result of a committed flash loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashLoanReceipt {
    /// Always true; failures are returned as errors
    pub success: bool,
    /// Strategy run
    pub strategy: StrategyKind,
    /// Requesting caller
    pub caller: String,
    /// Pool token
    pub token: String,
    /// Principal
    pub loan_amount: Decimal,
    /// Fee retained by the pool
    pub fee: Decimal,
    /// Amount credited back to the pool
    pub repay_amount: Decimal,
    /// Gross strategy profit
    pub profit: Decimal,
    /// Profit minus fee
    pub net_profit: Decimal,
    /// Identifier for log correlation
    pub correlation_id: Uuid,
    /// Commit time
    pub executed_at: DateTime<Utc>,
}

struct ScannerHandle {
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Atomic flash-loan executor over a shared liquidity pool
pub struct FlashLoanEngine {
    config: FlashLoanConfig,
    pool: Mutex<LiquidityPool>,
    ledger: SharedLedger,
    prices: Arc<dyn ValuationProvider>,
    amm: Arc<dyn AmmRegistry>,
    runners: AHashMap<StrategyKind, Arc<dyn StrategyRunner>>,
    stats: Arc<EngineStats>,
    scanner: parking_lot::Mutex<Option<ScannerHandle>>,
    latest_scan: RwLock<Option<ScanReport>>,
}

impl std::fmt::Debug for FlashLoanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashLoanEngine")
            .field("config", &self.config)
            .field("runners", &self.runners.keys().collect::<Vec<_>>())
            .field("scanner_running", &self.is_scanner_running())
            .finish_non_exhaustive()
    }
}

impl FlashLoanEngine {
    /// Create an engine with the built-in runners registered
    ///
    /// Oracle prices are read through the ledger's valuation provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for an invalid config
    pub async fn new(
        config: FlashLoanConfig,
        pool: LiquidityPool,
        ledger: SharedLedger,
        amm: Arc<dyn AmmRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let prices = Arc::clone(ledger.read().await.prices());

        let mut engine = Self {
            pool: Mutex::new(pool),
            ledger: Arc::clone(&ledger),
            prices,
            amm,
            runners: AHashMap::new(),
            stats: Arc::new(EngineStats::default()),
            scanner: parking_lot::Mutex::new(None),
            latest_scan: RwLock::new(None),
            config,
        };
        engine.register_runner(DexArbitrageRunner::new(
            engine.config.default_amm_fee,
            engine.config.slippage_buffer,
        ));
        engine.register_runner(LiquidationRunner::new(
            ledger,
            engine.config.liquidation_bonus,
            engine.config.liquidation_health_margin,
            &engine.config.liquidator_id,
        ));

        info!(
            "Flash loan engine ready: fee {}, max {} of pool",
            engine.config.flash_fee, engine.config.max_pool_fraction
        );
        Ok(engine)
    }

    /// Register a runner, replacing any runner for the same strategy
    pub fn register_runner<T: StrategyRunner + 'static>(&mut self, runner: T) {
        let kind = runner.kind();
        if self.runners.insert(kind, Arc::new(runner)).is_some() {
            info!("Replaced {kind} runner");
        } else {
            info!("Registered {kind} runner");
        }
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &FlashLoanConfig {
        &self.config
    }

    /// Shared ledger
    #[must_use]
    pub const fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Execute a flash loan
    ///
    /// # Errors
    ///
    /// Before the debit, nothing changes:
    /// - [`EngineError::Validation`] for a malformed request
    /// - [`EngineError::UnknownStrategy`] when no runner serves the strategy
    /// - [`EngineError::InsufficientLiquidity`] when the loan exceeds the pool limit
    ///
    /// After the debit, the pool is restored and the failure counter bumped:
    /// - [`EngineError::RepaymentInsufficient`] on under-repayment
    /// - [`EngineError::RunnerPanicked`] if the runner panicked
    /// - any error the runner returned
    pub async fn execute(&self, request: &FlashLoanRequest, caller: &str) -> EngineResult<FlashLoanReceipt> {
        self.execute_inner(request, caller, None).await
    }

    /// Execute a flash loan, failing the runner if it exceeds `watchdog`
    ///
    /// # Errors
    ///
    /// As [`Self::execute`], plus [`EngineError::RunnerTimeout`] after a rollback
    pub async fn execute_with_watchdog(
        &self,
        request: &FlashLoanRequest,
        caller: &str,
        watchdog: Duration,
    ) -> EngineResult<FlashLoanReceipt> {
        self.execute_inner(request, caller, Some(watchdog)).await
    }

    /// Execute the request an opportunity describes
    ///
    /// # Errors
    ///
    /// As [`Self::execute`]
    pub async fn execute_opportunity(
        &self,
        opportunity: &FlashLoanOpportunity,
        caller: &str,
    ) -> EngineResult<FlashLoanReceipt> {
        self.execute(&opportunity.to_request(), caller).await
    }

    async fn execute_inner(
        &self,
        request: &FlashLoanRequest,
        caller: &str,
        watchdog: Option<Duration>,
    ) -> EngineResult<FlashLoanReceipt> {
        request.validate()?;
        let runner = self
            .runners
            .get(&request.strategy)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStrategy {
                name: request.strategy.to_string(),
            })?;

        let token = request.token.as_str();
        let loan = request.loan_amount;
        let mut pool = self.pool.lock().await;

        let snapshot = pool.balance(token);
        let max_loan = snapshot * self.config.max_pool_fraction;
        if loan > max_loan {
            return Err(EngineError::InsufficientLiquidity {
                token: token.to_owned(),
                requested: loan,
                max_loan,
            });
        }

        let fee = loan * self.config.flash_fee;
        let required = loan + fee;
        let correlation_id = Uuid::new_v4();

        pool.debit(token, loan)?;
        self.stats.record_issued();
        debug!("[{correlation_id}] {} borrowed {loan} {token} for {}", caller, request.strategy);

        let verified = Self::run_guarded(runner.as_ref(), request, fee, watchdog)
            .await
            .and_then(|outcome| self.verify_repayment(outcome, required))
            .and_then(|outcome| pool.credit(token, required).map(|_| outcome));

        match verified {
            Ok(outcome) => {
                drop(pool);

                let net_profit = outcome.profit.saturating_sub(fee);
                self.stats.record_success(request.strategy, loan, fee, net_profit);
                info!(
                    "[{correlation_id}] {} {loan} {token} repaid, fee {fee}, net profit {}",
                    request.strategy,
                    net_profit.round_dp(2)
                );

                Ok(FlashLoanReceipt {
                    success: true,
                    strategy: request.strategy,
                    caller: caller.to_owned(),
                    token: token.to_owned(),
                    loan_amount: loan,
                    fee,
                    repay_amount: required,
                    profit: outcome.profit,
                    net_profit,
                    correlation_id,
                    executed_at: Utc::now(),
                })
            }
            Err(e) => {
                pool.restore(token, snapshot);
                drop(pool);

                self.stats.record_failure();
                warn!("[{correlation_id}] {} rolled back: {e}", request.strategy);
                Err(e)
            }
        }
    }

    async fn run_guarded(
        runner: &dyn StrategyRunner,
        request: &FlashLoanRequest,
        fee: Decimal,
        watchdog: Option<Duration>,
    ) -> EngineResult<StrategyOutcome> {
        let strategy = request.strategy.to_string();
        let run = AssertUnwindSafe(runner.run(request, fee)).catch_unwind();

        let caught = match watchdog {
            Some(limit) => timeout(limit, run).await.map_err(|_| EngineError::RunnerTimeout {
                strategy: strategy.clone(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?,
            None => run.await,
        };

        caught.unwrap_or(Err(EngineError::RunnerPanicked { strategy }))
    }

    fn verify_repayment(&self, outcome: StrategyOutcome, required: Decimal) -> EngineResult<StrategyOutcome> {
        if !outcome.repaid || outcome.repaid_amount < required - self.config.repayment_epsilon {
            return Err(EngineError::RepaymentInsufficient {
                required,
                repaid: outcome.repaid_amount,
            });
        }
        Ok(outcome)
    }

    /// Scan AMM pools and ledger positions for opportunities
    ///
    /// AMM reserves are awaited before the ledger is read.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Amm`] if the AMM registry cannot be read
    pub async fn scan_opportunities(&self) -> EngineResult<ScanReport> {
        let pools = self.amm.pools().await?;
        let health = self.ledger.read().await.active_position_health();

        let arbitrage = scan_dex_arbitrage(&pools, self.prices.as_ref(), &self.config);
        let liquidations = scan_liquidations(&health, &self.config);
        let report = ScanReport::build(arbitrage, liquidations, Utc::now());

        *self.latest_scan.write().await = Some(report.clone());
        Ok(report)
    }

    /// Most recent scan result
    pub async fn latest_scan(&self) -> Option<ScanReport> {
        self.latest_scan.read().await.clone()
    }

    /// Start periodic advisory scanning; returns false if already running
    pub fn start_scanner(self: &Arc<Self>) -> bool {
        let mut scanner = self.scanner.lock();
        if scanner.is_some() {
            debug!("Scanner already running");
            return false;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.config.scanner_interval();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !stop.load(Ordering::Relaxed) {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else { break };
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                match engine.scan_opportunities().await {
                    Ok(report) => info!(
                        "Scan found {} opportunities ({} DEX_ARB, {} LIQUIDATION)",
                        report.total(),
                        report.dex_arbitrage_count,
                        report.liquidation_count
                    ),
                    Err(e) => warn!("Opportunity scan failed: {e}"),
                }
            }
        });

        *scanner = Some(ScannerHandle { shutdown, task });
        drop(scanner);
        info!("Opportunity scanner started, every {}ms", self.config.scanner_interval_ms);
        true
    }

    /// Stop the scanner; returns false if it was not running
    pub async fn stop_scanner(&self) -> bool {
        let handle = self.scanner.lock().take();
        let Some(handle) = handle else {
            return false;
        };
        handle.shutdown.store(true, Ordering::Relaxed);
        handle.task.abort();
        if let Err(e) = handle.task.await {
            if !e.is_cancelled() {
                warn!("Scanner task ended abnormally: {e}");
            }
        }
        info!("Opportunity scanner stopped");
        true
    }

    /// Whether the scanner is running
    #[must_use]
    pub fn is_scanner_running(&self) -> bool {
        self.scanner.lock().is_some()
    }

    /// Add liquidity to the pool
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a non-positive amount or one
    /// the pool balance cannot hold
    pub async fn provide_liquidity(&self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        let balance = self.pool.lock().await.deposit(token, amount)?;
        info!("Liquidity +{amount} {token}, pool {balance}");
        Ok(balance)
    }

    /// Remove liquidity from the pool
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for a non-positive amount
    /// - [`EngineError::InsufficientBalance`] when the pool holds less
    pub async fn withdraw_liquidity(&self, token: &str, amount: Decimal) -> EngineResult<Decimal> {
        let balance = self.pool.lock().await.withdraw(token, amount)?;
        info!("Liquidity -{amount} {token}, pool {balance}");
        Ok(balance)
    }

    /// Pool balance of a token
    pub async fn pool_balance(&self, token: &str) -> Decimal {
        self.pool.lock().await.balance(token)
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Preview replacing `amount` of `from_token` collateral with `to_token`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a non-positive amount or
    /// identical assets
    pub fn calculate_collateral_swap(
        &self,
        owner: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
    ) -> EngineResult<CollateralSwapPreview> {
        calculate_collateral_swap(
            owner,
            from_token,
            to_token,
            amount,
            self.prices.as_ref(),
            self.config.default_amm_fee,
            self.config.flash_fee,
        )
    }
}

impl Drop for FlashLoanEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.scanner.get_mut().take() {
            handle.shutdown.store(true, Ordering::Relaxed);
            handle.task.abort();
        }
    }
}
