//! Collateral manager
//!
//! Sole owner and writer of the position store. Every mutating call runs to
//! completion on `&mut self`; callers sharing a manager across tasks wrap it
//! in a lock and must resolve any async price reads before taking it.
//!
//! ## State machine
//! - `Active -> Closed` when repayment brings debt under the dust epsilon
//! - `Active -> Liquidated` when a scan finds health below the threshold, or
//!   when a liquidator seizes the position on demand
//!
//! Terminal positions are never revisited.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::credit::{CreditEvent, CreditEventSink, NoopCreditSink};
use crate::error::{LedgerError, LedgerResult};
use crate::interest::{InterestPolicy, SimpleInterest};
use crate::position::{health_factor, Position, PositionHealth, PositionId, PositionStatus, PositionSummary};
use crate::pricing::ValuationProvider;
use crate::registry::{CollateralRegistry, QualityTier};
use crate::LedgerConfig;

/// Result of a successful `open_position`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenedPosition {
    /// New position
    pub position_id: PositionId,
    /// Collateral value in USD
    pub collateral_value_usd: Decimal,
    /// Borrowed value in USD
    pub borrow_value_usd: Decimal,
    /// Collateral/debt ratio in percent
    pub collateral_ratio_pct: Decimal,
    /// Collateral/debt ratio
    pub health_factor: Decimal,
    /// Collateral price at which the position hits its threshold
    pub liquidation_price: Decimal,
    /// Annual rate locked in
    pub interest_rate_pct: Decimal,
    /// Collateral quality tier
    pub quality: QualityTier,
}

/// Result of a successful `add_collateral`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollateralAdded {
    /// Position topped up
    pub position_id: PositionId,
    /// Value added in USD
    pub added_usd: Decimal,
    /// Health after the top-up
    pub health_factor: Decimal,
}

/// Result of a successful `repay`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepayOutcome {
    /// Debt cleared; collateral can be released
    Closed {
        /// Position closed
        position_id: PositionId,
        /// Amount applied, after capping to the outstanding debt
        repaid: Decimal,
        /// Collateral released to the owner
        collateral_released: Decimal,
        /// Collateral asset symbol
        collateral_asset: String,
    },
    /// Debt remains
    Partial {
        /// Position repaid against
        position_id: PositionId,
        /// Amount applied
        repaid: Decimal,
        /// Principal plus interest still owed
        remaining_debt: Decimal,
        /// Health after repayment
        health_factor: Decimal,
    },
}

impl RepayOutcome {
    /// Amount applied to the debt
    #[must_use]
    pub const fn repaid(&self) -> Decimal {
        match self {
            Self::Closed { repaid, .. } | Self::Partial { repaid, .. } => *repaid,
        }
    }
}

/// Totals from one accrual pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccrualReport {
    /// Active positions visited
    pub positions_accrued: usize,
    /// Interest added across all positions, in USD
    pub total_accrued_usd: Decimal,
}

/// A single liquidation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationRecord {
    /// Liquidated position
    pub position_id: PositionId,
    /// Owner
    pub owner: String,
    /// Collateral asset symbol
    pub collateral_asset: String,
    /// Collateral/debt ratio at liquidation
    pub ratio: Decimal,
    /// Threshold that was breached
    pub threshold: Decimal,
    /// Collateral value at liquidation
    pub collateral_value_usd: Decimal,
    /// Debt value at liquidation
    pub debt_value_usd: Decimal,
    /// Collateral units returned to the owner after the penalty
    pub seized_collateral: Decimal,
    /// Penalty in USD
    pub penalty_usd: Decimal,
    /// Liquidator, for on-demand liquidations
    pub liquidated_by: Option<String>,
    /// Liquidation time
    pub liquidated_at: DateTime<Utc>,
}

/// Accrual followed by a liquidation scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceReport {
    /// Accrual totals
    pub accrual: AccrualReport,
    /// Positions liquidated in this cycle
    pub liquidations: Vec<LiquidationRecord>,
}

/// Catalog row for an accepted collateral asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Asset symbol
    pub asset: String,
    /// Quality tier
    pub quality: QualityTier,
    /// Max LTV
    pub max_ltv: Decimal,
    /// Liquidation threshold
    pub liquidation_threshold: Decimal,
    /// Liquidation penalty
    pub liquidation_penalty: Decimal,
    /// Current USD price
    pub price_usd: Decimal,
}

/// Ledger-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    /// Positions ever opened
    pub total_positions: usize,
    /// Positions still active
    pub active_positions: usize,
    /// Running collateral total in USD
    pub total_collateral_usd: Decimal,
    /// Running borrowed total in USD
    pub total_borrowed_usd: Decimal,
    /// Interest accrued since start, in USD
    pub total_interest_earned_usd: Decimal,
    /// Liquidations since start
    pub liquidation_count: u64,
    /// Collateral/borrowed ratio over running totals; `None` when nothing is borrowed
    pub global_health_factor: Option<Decimal>,
    /// Mean health of active positions; `None` when there are none
    pub average_health_factor: Option<Decimal>,
}

#[derive(Debug, Default)]
struct RunningTotals {
    collateral_usd: Decimal,
    borrowed_usd: Decimal,
    interest_earned_usd: Decimal,
    liquidation_count: u64,
}

impl RunningTotals {
    fn release(&mut self, collateral_usd: Decimal, borrowed_usd: Decimal) {
        self.collateral_usd = (self.collateral_usd - collateral_usd).max(Decimal::ZERO);
        self.borrowed_usd = (self.borrowed_usd - borrowed_usd).max(Decimal::ZERO);
    }
}

/// CDP ledger
pub struct CollateralManager {
    config: LedgerConfig,
    registry: CollateralRegistry,
    prices: Arc<dyn ValuationProvider>,
    interest: Box<dyn InterestPolicy>,
    clock: Arc<dyn Clock>,
    credit: Arc<dyn CreditEventSink>,
    positions: BTreeMap<PositionId, Position>,
    by_owner: AHashMap<String, Vec<PositionId>>,
    next_id: u64,
    totals: RunningTotals,
}

impl std::fmt::Debug for CollateralManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollateralManager")
            .field("config", &self.config)
            .field("interest", &self.interest)
            .field("positions", &self.positions.len())
            .field("totals", &self.totals)
            .finish_non_exhaustive()
    }
}

impl CollateralManager {
    /// Create a manager with simple interest, the system clock and no credit sink
    #[must_use]
    pub fn new(registry: CollateralRegistry, prices: Arc<dyn ValuationProvider>) -> Self {
        Self::with_config(LedgerConfig::default(), registry, prices)
    }

    /// Create a manager with explicit configuration
    #[must_use]
    pub fn with_config(
        config: LedgerConfig,
        registry: CollateralRegistry,
        prices: Arc<dyn ValuationProvider>,
    ) -> Self {
        let interest = SimpleInterest::with_year_seconds(config.seconds_per_year);
        Self {
            config,
            registry,
            prices,
            interest: Box::new(interest),
            clock: Arc::new(SystemClock),
            credit: Arc::new(NoopCreditSink),
            positions: BTreeMap::new(),
            by_owner: AHashMap::new(),
            next_id: 1,
            totals: RunningTotals::default(),
        }
    }

    /// Replace the interest policy
    #[must_use]
    pub fn with_interest_policy<P: InterestPolicy + 'static>(mut self, policy: P) -> Self {
        self.interest = Box::new(policy);
        self
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route liquidation events to a credit system
    #[must_use]
    pub fn with_credit_sink(mut self, sink: Arc<dyn CreditEventSink>) -> Self {
        self.credit = sink;
        self
    }

    /// Asset registry
    #[must_use]
    pub const fn registry(&self) -> &CollateralRegistry {
        &self.registry
    }

    /// Valuation source
    #[must_use]
    pub fn prices(&self) -> &Arc<dyn ValuationProvider> {
        &self.prices
    }

    /// Open a new position, rejecting borrows beyond the collateral's max LTV
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for an empty owner, non-positive amounts or
    ///   amounts too large to value
    /// - [`LedgerError::UnsupportedAsset`] for unregistered assets
    /// - [`LedgerError::InsufficientCollateral`] carrying the max borrowable amount
    pub fn open_position(
        &mut self,
        owner: &str,
        collateral_asset: &str,
        collateral_amount: Decimal,
        borrow_asset: &str,
        borrow_amount: Decimal,
    ) -> LedgerResult<OpenedPosition> {
        if owner.is_empty() {
            return Err(LedgerError::validation("owner", "must not be empty"));
        }
        require_positive("collateral_amount", collateral_amount)?;
        require_positive("borrow_amount", borrow_amount)?;

        let collateral = self.registry.collateral(collateral_asset)?.clone();
        let rate = self.registry.borrow_asset(borrow_asset)?.annual_rate_pct;

        let collateral_price = self.prices.price_usd(collateral_asset);
        let borrow_price = self.prices.price_usd(borrow_asset);
        let collateral_value_usd = usd_value("collateral_amount", collateral_amount, collateral_price)?;
        let borrow_value_usd = usd_value("borrow_amount", borrow_amount, borrow_price)?;

        let max_borrow_usd = collateral_value_usd * collateral.max_ltv;
        if borrow_value_usd > max_borrow_usd {
            debug!(
                "Rejected {owner} borrow of ${borrow_value_usd}: max ${max_borrow_usd} at LTV {}",
                collateral.max_ltv
            );
            return Err(LedgerError::InsufficientCollateral {
                requested_usd: borrow_value_usd,
                max_borrow_usd,
                max_borrow_amount: max_borrow_usd.checked_div(borrow_price).unwrap_or(Decimal::MAX),
            });
        }
        let collateral_total = checked_total("collateral_amount", self.totals.collateral_usd, collateral_value_usd)?;
        let borrowed_total = checked_total("borrow_amount", self.totals.borrowed_usd, borrow_value_usd)?;

        let id = PositionId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        let now = self.clock.now();

        let mut position = Position {
            id,
            owner: owner.to_owned(),
            collateral_asset: collateral_asset.to_owned(),
            collateral_amount,
            collateral_value_usd,
            borrow_asset: borrow_asset.to_owned(),
            borrow_principal: borrow_amount,
            borrow_value_usd,
            accrued_interest: Decimal::ZERO,
            interest_rate_pct: rate,
            quality: collateral.quality,
            max_ltv: collateral.max_ltv,
            liquidation_threshold: collateral.liquidation_threshold,
            liquidation_penalty: collateral.liquidation_penalty,
            health_factor: Decimal::ZERO,
            status: PositionStatus::Active,
            opened_at: now,
            last_accrual_at: now,
            closed_at: None,
            liquidated_by: None,
        };
        position.recompute_health(borrow_price);

        let opened = OpenedPosition {
            position_id: id,
            collateral_value_usd,
            borrow_value_usd,
            collateral_ratio_pct: position.health_factor.saturating_mul(Decimal::ONE_HUNDRED).round_dp(1),
            health_factor: position.health_factor,
            liquidation_price: position.liquidation_price(borrow_price),
            interest_rate_pct: rate,
            quality: collateral.quality,
        };

        self.totals.collateral_usd = collateral_total;
        self.totals.borrowed_usd = borrowed_total;
        self.positions.insert(id, position);
        self.by_owner.entry(owner.to_owned()).or_default().push(id);

        info!(
            "Opened {id} for {owner}: {collateral_amount} {collateral_asset} (${collateral_value_usd}) -> {borrow_amount} {borrow_asset}, health {}",
            opened.health_factor.round_dp(3)
        );
        Ok(opened)
    }

    /// Lock more collateral into an active position
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for a non-positive amount or one too large to value
    /// - [`LedgerError::PositionNotFound`] for unknown ids or another owner's position
    /// - [`LedgerError::PositionNotActive`] for terminal positions
    pub fn add_collateral(&mut self, owner: &str, position_id: PositionId, amount: Decimal) -> LedgerResult<CollateralAdded> {
        require_positive("amount", amount)?;
        let prices = Arc::clone(&self.prices);
        let collateral_total = self.totals.collateral_usd;
        let position = self.owned_active_mut(owner, position_id)?;

        let added_usd = usd_value("amount", amount, prices.price_usd(&position.collateral_asset))?;
        let collateral_amount = checked_total("amount", position.collateral_amount, amount)?;
        let collateral_value_usd = checked_total("amount", position.collateral_value_usd, added_usd)?;
        let collateral_total = checked_total("amount", collateral_total, added_usd)?;

        position.collateral_amount = collateral_amount;
        position.collateral_value_usd = collateral_value_usd;
        position.recompute_health(prices.price_usd(&position.borrow_asset));
        let health = position.health_factor;

        self.totals.collateral_usd = collateral_total;
        debug!("Added {amount} collateral (${added_usd}) to {position_id}, health {}", health.round_dp(3));

        Ok(CollateralAdded {
            position_id,
            added_usd,
            health_factor: health,
        })
    }

    /// Repay debt, interest first. Overpayment is truncated to the outstanding debt.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for a non-positive amount
    /// - [`LedgerError::PositionNotFound`] for unknown ids or another owner's position
    /// - [`LedgerError::PositionNotActive`] for terminal positions
    pub fn repay(&mut self, owner: &str, position_id: PositionId, repay_amount: Decimal) -> LedgerResult<RepayOutcome> {
        require_positive("repay_amount", repay_amount)?;
        let prices = Arc::clone(&self.prices);
        let dust = self.config.dust_epsilon;
        let now = self.clock.now();
        let position = self.owned_active_mut(owner, position_id)?;

        let borrow_price = prices.price_usd(&position.borrow_asset);
        let repaid = repay_amount.min(position.total_debt());
        let interest_paid = repaid.min(position.accrued_interest);
        let principal_paid = repaid - interest_paid;

        position.accrued_interest -= interest_paid;
        position.borrow_principal -= principal_paid;
        position.borrow_value_usd = position.borrow_principal * borrow_price;

        if position.total_debt() <= dust {
            position.status = PositionStatus::Closed;
            position.closed_at = Some(now);
            let outcome = RepayOutcome::Closed {
                position_id,
                repaid,
                collateral_released: position.collateral_amount,
                collateral_asset: position.collateral_asset.clone(),
            };
            let collateral_usd = position.collateral_value_usd;
            let remaining_usd = position.borrow_value_usd;
            self.totals.release(collateral_usd, principal_paid * borrow_price + remaining_usd);
            info!("Closed {position_id} for {owner}, repaid {repaid}");
            return Ok(outcome);
        }

        position.recompute_health(borrow_price);
        let outcome = RepayOutcome::Partial {
            position_id,
            repaid,
            remaining_debt: position.total_debt(),
            health_factor: position.health_factor,
        };
        self.totals.release(Decimal::ZERO, principal_paid * borrow_price);
        debug!("Repaid {repaid} on {position_id}");
        Ok(outcome)
    }

    /// Accrue interest on every active position up to now
    pub fn accrue_interest(&mut self) -> AccrualReport {
        let now = self.clock.now();
        let mut report = AccrualReport::default();

        for position in self.positions.values_mut().filter(|p| p.is_active()) {
            let elapsed = now.signed_duration_since(position.last_accrual_at);
            let interest = self
                .interest
                .accrue(position.borrow_principal, position.interest_rate_pct, elapsed);
            let borrow_price = self.prices.price_usd(&position.borrow_asset);

            position.accrued_interest += interest;
            if now > position.last_accrual_at {
                position.last_accrual_at = now;
            }
            position.revalue(self.prices.as_ref());

            report.positions_accrued += 1;
            report.total_accrued_usd += interest * borrow_price;
        }

        self.totals.interest_earned_usd += report.total_accrued_usd;
        debug!(
            "Accrued ${} across {} positions ({} interest)",
            report.total_accrued_usd,
            report.positions_accrued,
            self.interest.name()
        );
        report
    }

    /// Liquidate every active position whose collateral/debt ratio is below its threshold
    pub fn check_liquidations(&mut self) -> Vec<LiquidationRecord> {
        let now = self.clock.now();
        let mut liquidated = Vec::new();

        for position in self.positions.values_mut().filter(|p| p.is_active()) {
            position.revalue(self.prices.as_ref());
            let borrow_price = self.prices.price_usd(&position.borrow_asset);
            let debt_usd = position.debt_value_usd(borrow_price);
            if debt_usd <= Decimal::ZERO {
                continue;
            }
            if position.health_factor < position.liquidation_threshold {
                let record = seize(position, debt_usd, None, now);
                warn!(
                    "Liquidated {} of {}: health {} < threshold {}",
                    record.position_id,
                    record.owner,
                    record.ratio.round_dp(3),
                    record.threshold
                );
                liquidated.push(record);
            }
        }

        for record in &liquidated {
            self.settle_liquidation(record);
        }
        liquidated
    }

    /// Accrue interest, then scan for liquidations
    pub fn run_maintenance(&mut self) -> MaintenanceReport {
        let accrual = self.accrue_interest();
        let liquidations = self.check_liquidations();
        if !liquidations.is_empty() {
            info!("Maintenance liquidated {} positions", liquidations.len());
        }
        MaintenanceReport { accrual, liquidations }
    }

    /// Seize an active position on behalf of `liquidator`, regardless of threshold
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PositionNotFound`] for unknown ids
    /// - [`LedgerError::PositionNotActive`] for terminal positions
    pub fn liquidate_position(&mut self, position_id: PositionId, liquidator: &str) -> LedgerResult<LiquidationRecord> {
        let now = self.clock.now();
        let prices = Arc::clone(&self.prices);
        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(LedgerError::PositionNotFound { position_id })?;
        if !position.is_active() {
            return Err(LedgerError::PositionNotActive {
                position_id,
                status: position.status,
            });
        }

        position.revalue(prices.as_ref());
        let debt_usd = position.debt_value_usd(prices.price_usd(&position.borrow_asset));
        let record = seize(position, debt_usd, Some(liquidator.to_owned()), now);
        self.settle_liquidation(&record);

        info!("{liquidator} liquidated {position_id}, penalty ${}", record.penalty_usd.round_dp(2));
        Ok(record)
    }

    fn settle_liquidation(&mut self, record: &LiquidationRecord) {
        self.totals.liquidation_count = self.totals.liquidation_count.saturating_add(1);
        self.totals.release(record.collateral_value_usd, record.debt_value_usd);
        let event = CreditEvent::PositionLiquidated {
            position_id: record.position_id,
            penalty_usd: record.penalty_usd,
            liquidated_by: record.liquidated_by.clone(),
        };
        self.credit.record(&record.owner, &event);
    }

    /// Look up one position
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PositionNotFound`] for unknown ids
    pub fn position(&self, position_id: PositionId) -> LedgerResult<&Position> {
        self.positions
            .get(&position_id)
            .ok_or(LedgerError::PositionNotFound { position_id })
    }

    /// All positions of an owner, in open order
    #[must_use]
    pub fn get_user_positions(&self, owner: &str) -> Vec<PositionSummary> {
        self.by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.positions.get(id))
                    .map(|p| p.summary(self.prices.price_usd(&p.borrow_asset)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accepted collateral with current prices
    #[must_use]
    pub fn get_collateral_catalog(&self) -> Vec<CatalogEntry> {
        self.registry
            .collateral_assets()
            .iter()
            .map(|asset| CatalogEntry {
                asset: asset.symbol.clone(),
                quality: asset.quality,
                max_ltv: asset.max_ltv,
                liquidation_threshold: asset.liquidation_threshold,
                liquidation_penalty: asset.liquidation_penalty,
                price_usd: self.prices.price_usd(&asset.symbol),
            })
            .collect()
    }

    /// Health of every active position at current prices, without mutating state
    #[must_use]
    pub fn active_position_health(&self) -> Vec<PositionHealth> {
        self.positions
            .values()
            .filter(|p| p.is_active())
            .map(|p| self.current_health(p))
            .collect()
    }

    /// Health of one active position at current prices
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PositionNotFound`] for unknown ids
    /// - [`LedgerError::PositionNotActive`] for terminal positions
    pub fn position_health(&self, position_id: PositionId) -> LedgerResult<PositionHealth> {
        let position = self.position(position_id)?;
        if !position.is_active() {
            return Err(LedgerError::PositionNotActive {
                position_id,
                status: position.status,
            });
        }
        Ok(self.current_health(position))
    }

    fn current_health(&self, position: &Position) -> PositionHealth {
        let collateral_value_usd = position.collateral_amount * self.prices.price_usd(&position.collateral_asset);
        let debt_value_usd = position.total_debt() * self.prices.price_usd(&position.borrow_asset);
        PositionHealth {
            position_id: position.id,
            owner: position.owner.clone(),
            borrow_asset: position.borrow_asset.clone(),
            collateral_value_usd,
            debt_value_usd,
            health_factor: health_factor(collateral_value_usd, debt_value_usd),
            liquidation_threshold: position.liquidation_threshold,
        }
    }

    /// Ledger-wide statistics
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let mut active = 0_usize;
        let mut health_sum = Decimal::ZERO;
        let mut health_overflow = false;
        for position in self.positions.values().filter(|p| p.is_active()) {
            active += 1;
            match health_sum.checked_add(position.health_factor) {
                Some(sum) => health_sum = sum,
                None => health_overflow = true,
            }
        }

        let average_health_factor = if active == 0 {
            None
        } else if health_overflow {
            Some(Decimal::MAX)
        } else {
            Some((health_sum / Decimal::from(active)).round_dp(3))
        };

        let global_health_factor = (self.totals.borrowed_usd > Decimal::ZERO)
            .then(|| health_factor(self.totals.collateral_usd, self.totals.borrowed_usd).round_dp(3));

        LedgerStats {
            total_positions: self.positions.len(),
            active_positions: active,
            total_collateral_usd: self.totals.collateral_usd.round_dp(2),
            total_borrowed_usd: self.totals.borrowed_usd.round_dp(2),
            total_interest_earned_usd: self.totals.interest_earned_usd.round_dp(4),
            liquidation_count: self.totals.liquidation_count,
            global_health_factor,
            average_health_factor,
        }
    }

    fn owned_active_mut(&mut self, owner: &str, position_id: PositionId) -> LedgerResult<&mut Position> {
        let position = self
            .positions
            .get_mut(&position_id)
            .filter(|p| p.owner == owner)
            .ok_or(LedgerError::PositionNotFound { position_id })?;
        if !position.is_active() {
            return Err(LedgerError::PositionNotActive {
                position_id,
                status: position.status,
            });
        }
        Ok(position)
    }
}

fn usd_value(field: &str, amount: Decimal, price: Decimal) -> LedgerResult<Decimal> {
    amount
        .checked_mul(price)
        .ok_or_else(|| LedgerError::validation(field, format!("{amount} at ${price} is too large to value")))
}

fn checked_total(field: &str, total: Decimal, added: Decimal) -> LedgerResult<Decimal> {
    total
        .checked_add(added)
        .ok_or_else(|| LedgerError::validation(field, format!("adding {added} to {total} overflows")))
}

fn require_positive(field: &str, value: Decimal) -> LedgerResult<()> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::validation(field, format!("must be positive, got {value}")));
    }
    Ok(())
}

fn seize(position: &mut Position, debt_usd: Decimal, liquidated_by: Option<String>, now: DateTime<Utc>) -> LiquidationRecord {
    let penalty_usd = position.collateral_value_usd * position.liquidation_penalty;
    let seized_collateral = position.collateral_amount * (Decimal::ONE - position.liquidation_penalty);

    position.status = PositionStatus::Liquidated;
    position.closed_at = Some(now);
    position.liquidated_by.clone_from(&liquidated_by);

    LiquidationRecord {
        position_id: position.id,
        owner: position.owner.clone(),
        collateral_asset: position.collateral_asset.clone(),
        ratio: position.health_factor,
        threshold: position.liquidation_threshold,
        collateral_value_usd: position.collateral_value_usd,
        debt_value_usd: debt_usd,
        seized_collateral,
        penalty_usd,
        liquidated_by,
        liquidated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credit::RecordingCreditSink;
    use crate::pricing::PriceBook;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Fixture {
        manager: CollateralManager,
        prices: Arc<PriceBook>,
        clock: Arc<ManualClock>,
        credit: Arc<RecordingCreditSink>,
    }

    fn fixture() -> Fixture {
        let prices = Arc::new(PriceBook::with_default_prices());
        let clock = Arc::new(ManualClock::default());
        let credit = Arc::new(RecordingCreditSink::new());
        let manager = CollateralManager::new(CollateralRegistry::default(), Arc::clone(&prices) as Arc<dyn ValuationProvider>)
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .with_credit_sink(Arc::clone(&credit) as Arc<dyn CreditEventSink>);
        Fixture { manager, prices, clock, credit }
    }

    #[test]
    fn test_open_position_within_ltv() {
        let mut fx = fixture();
        let opened = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1900));
        assert!(opened.is_ok());
        if let Ok(opened) = opened {
            assert_eq!(opened.collateral_value_usd, dec!(2650));
            assert_eq!(opened.borrow_value_usd, dec!(1900));
            assert_eq!(opened.health_factor.round_dp(3), dec!(1.395));
            assert_eq!(opened.collateral_ratio_pct, dec!(139.5));
            assert_eq!(opened.liquidation_price, dec!(1558));
            assert_eq!(opened.interest_rate_pct, dec!(4.5));
            assert_eq!(opened.quality, QualityTier::AAA);
        }
    }

    #[test]
    fn test_open_position_rejected_beyond_ltv() {
        let mut fx = fixture();
        let result = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(2000));
        assert_eq!(
            result,
            Err(LedgerError::InsufficientCollateral {
                requested_usd: dec!(2000),
                max_borrow_usd: dec!(1987.50),
                max_borrow_amount: dec!(1987.50),
            })
        );
        assert_eq!(fx.manager.stats().total_positions, 0);
    }

    #[test]
    fn test_open_position_validation() {
        let mut fx = fixture();
        assert!(matches!(
            fx.manager.open_position("alice", "DOGE", dec!(1), "USDC", dec!(1)),
            Err(LedgerError::UnsupportedAsset { .. })
        ));
        assert!(matches!(
            fx.manager.open_position("alice", "ETH", dec!(1), "ETH", dec!(1)),
            Err(LedgerError::UnsupportedAsset { .. })
        ));
        assert!(matches!(
            fx.manager.open_position("alice", "ETH", Decimal::ZERO, "USDC", dec!(1)),
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            fx.manager.open_position("", "ETH", dec!(1), "USDC", dec!(1)),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn test_oversized_amounts_are_rejected() {
        let mut fx = fixture();
        assert!(matches!(
            fx.manager.open_position("alice", "ETH", Decimal::MAX, "USDC", dec!(1)),
            Err(LedgerError::Validation { .. })
        ));
        // a borrow valued at exactly the maximum still hits the LTV cap
        assert!(matches!(
            fx.manager.open_position("alice", "ETH", dec!(1), "USDC", Decimal::MAX),
            Err(LedgerError::InsufficientCollateral { .. })
        ));
        assert_eq!(fx.manager.stats().total_positions, 0);

        let Ok(opened) = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1900)) else {
            return;
        };
        assert!(matches!(
            fx.manager.add_collateral("alice", opened.position_id, Decimal::MAX),
            Err(LedgerError::Validation { .. })
        ));
        let stats = fx.manager.stats();
        assert_eq!(stats.total_collateral_usd, dec!(2650));
        assert_eq!(fx.manager.position(opened.position_id).map(|p| p.collateral_amount), Ok(dec!(1)));
    }

    #[test]
    fn test_add_collateral_improves_health() {
        let mut fx = fixture();
        let Ok(opened) = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1900)) else {
            return;
        };
        let added = fx.manager.add_collateral("alice", opened.position_id, dec!(1));
        assert!(added.is_ok());
        if let Ok(added) = added {
            assert_eq!(added.added_usd, dec!(2650));
            assert!(added.health_factor > opened.health_factor);
        }

        // another owner cannot see the position
        assert!(matches!(
            fx.manager.add_collateral("bob", opened.position_id, dec!(1)),
            Err(LedgerError::PositionNotFound { .. })
        ));
    }

    #[test]
    fn test_full_repay_closes_and_releases_collateral() {
        let mut fx = fixture();
        let Ok(opened) = fx.manager.open_position("alice", "ETH", dec!(2), "USDC", dec!(1000)) else {
            return;
        };
        let outcome = fx.manager.repay("alice", opened.position_id, dec!(5000));
        assert_eq!(
            outcome,
            Ok(RepayOutcome::Closed {
                position_id: opened.position_id,
                repaid: dec!(1000),
                collateral_released: dec!(2),
                collateral_asset: "ETH".to_owned(),
            })
        );

        assert!(matches!(
            fx.manager.repay("alice", opened.position_id, dec!(1)),
            Err(LedgerError::PositionNotActive { status: PositionStatus::Closed, .. })
        ));
        let stats = fx.manager.stats();
        assert_eq!(stats.active_positions, 0);
        assert_eq!(stats.total_borrowed_usd, Decimal::ZERO);
        assert_eq!(stats.total_collateral_usd, Decimal::ZERO);
        assert_eq!(stats.global_health_factor, None);
    }

    #[test]
    fn test_repay_applies_interest_first() {
        let mut fx = fixture();
        let Ok(opened) = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1000)) else {
            return;
        };
        fx.clock.advance(Duration::seconds(crate::interest::SECONDS_PER_YEAR));
        let report = fx.manager.accrue_interest();
        assert_eq!(report.positions_accrued, 1);
        assert_eq!(report.total_accrued_usd, dec!(45));

        let outcome = fx.manager.repay("alice", opened.position_id, dec!(100));
        assert!(matches!(outcome, Ok(RepayOutcome::Partial { .. })));
        if let Ok(RepayOutcome::Partial { remaining_debt, .. }) = outcome {
            assert_eq!(remaining_debt, dec!(945));
        }
        let position = fx.manager.position(opened.position_id);
        assert!(position.is_ok_and(|p| p.accrued_interest == Decimal::ZERO && p.borrow_principal == dec!(945)));
    }

    #[test]
    fn test_price_drop_triggers_single_liquidation() {
        let mut fx = fixture();
        let Ok(opened) = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1900)) else {
            return;
        };
        let _ = fx.manager.open_position("bob", "WBTC", dec!(1), "USDC", dec!(10000));

        assert!(fx.prices.set_price("ETH", dec!(1500)).is_ok());
        let first = fx.manager.check_liquidations();
        assert_eq!(first.len(), 1);
        if let Some(record) = first.first() {
            assert_eq!(record.position_id, opened.position_id);
            assert_eq!(record.threshold, dec!(0.82));
            assert_eq!(record.penalty_usd, dec!(75));
            assert_eq!(record.seized_collateral, dec!(0.95));
            assert!(record.ratio < dec!(0.82));
        }

        let second = fx.manager.check_liquidations();
        assert!(second.is_empty());
        assert_eq!(fx.manager.stats().liquidation_count, 1);
        assert_eq!(fx.credit.events_for("alice").len(), 1);
        assert!(fx.credit.events_for("bob").is_empty());
    }

    #[test]
    fn test_liquidate_position_on_demand() {
        let mut fx = fixture();
        let Ok(opened) = fx.manager.open_position("alice", "SOL", dec!(100), "USDC", dec!(8000)) else {
            return;
        };
        let record = fx.manager.liquidate_position(opened.position_id, "flash_loan_engine");
        assert!(record.is_ok());
        if let Ok(record) = record {
            assert_eq!(record.liquidated_by.as_deref(), Some("flash_loan_engine"));
            assert_eq!(record.collateral_value_usd, dec!(13500));
            assert_eq!(record.penalty_usd, dec!(1080));
        }
        assert!(matches!(
            fx.manager.liquidate_position(opened.position_id, "flash_loan_engine"),
            Err(LedgerError::PositionNotActive { status: PositionStatus::Liquidated, .. })
        ));
        let events = fx.credit.events();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_maintenance_accrues_before_scanning() {
        let mut fx = fixture();
        // ten years of 4.5% on 1900 adds 855 of interest
        let _ = fx.manager.open_position("alice", "OBK-ETH", dec!(1), "USDC", dec!(1900));
        fx.clock.advance(Duration::seconds(crate::interest::SECONDS_PER_YEAR * 10));

        let report = fx.manager.run_maintenance();
        assert_eq!(report.accrual.positions_accrued, 1);
        assert_eq!(report.accrual.total_accrued_usd, dec!(855));
        // 2650 / 2755 = 0.9619, still above the 0.80 threshold
        assert!(report.liquidations.is_empty());
        assert!(fx.manager.stats().total_interest_earned_usd > Decimal::ZERO);
    }

    #[test]
    fn test_user_positions_and_catalog() {
        let mut fx = fixture();
        let _ = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(500));
        let _ = fx.manager.open_position("alice", "SOL", dec!(10), "OBK-USD", dec!(200));
        let _ = fx.manager.open_position("bob", "ETH", dec!(1), "USDC", dec!(500));

        let positions = fx.manager.get_user_positions("alice");
        assert_eq!(positions.len(), 2);
        assert!(positions.iter().all(|p| p.status == PositionStatus::Active));
        assert!(fx.manager.get_user_positions("carol").is_empty());

        let catalog = fx.manager.get_collateral_catalog();
        assert_eq!(catalog.len(), 9);
        assert!(catalog.iter().any(|entry| entry.asset == "OBK-GOLD" && entry.price_usd == dec!(2820)));
    }

    #[test]
    fn test_stats_aggregate() {
        let mut fx = fixture();
        let _ = fx.manager.open_position("alice", "ETH", dec!(1), "USDC", dec!(1325));
        let _ = fx.manager.open_position("bob", "ETH", dec!(2), "USDC", dec!(1325));

        let stats = fx.manager.stats();
        assert_eq!(stats.total_positions, 2);
        assert_eq!(stats.active_positions, 2);
        assert_eq!(stats.total_collateral_usd, dec!(7950));
        assert_eq!(stats.total_borrowed_usd, dec!(2650));
        assert_eq!(stats.global_health_factor, Some(dec!(3)));
        assert_eq!(stats.average_health_factor, Some(dec!(3)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn open_never_exceeds_max_ltv(collateral_cents in 1_i64..10_000_000, borrow_cents in 1_i64..10_000_000_000) {
                let mut fx = fixture();
                let collateral = Decimal::new(collateral_cents, 2);
                let borrow = Decimal::new(borrow_cents, 2);
                match fx.manager.open_position("prop", "ETH", collateral, "USDC", borrow) {
                    Ok(opened) => {
                        prop_assert!(opened.borrow_value_usd <= opened.collateral_value_usd * dec!(0.75));
                        prop_assert!(opened.health_factor >= Decimal::ONE);
                    }
                    Err(LedgerError::InsufficientCollateral { requested_usd, max_borrow_usd, .. }) => {
                        prop_assert!(requested_usd > max_borrow_usd);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                }
            }

            #[test]
            fn repay_never_drives_balances_negative(repay_cents in 1_i64..500_000, years in 0_i64..5) {
                let mut fx = fixture();
                let Ok(opened) = fx.manager.open_position("prop", "ETH", dec!(1), "USDC", dec!(1500)) else {
                    return Ok(());
                };
                fx.clock.advance(Duration::seconds(crate::interest::SECONDS_PER_YEAR * years));
                fx.manager.accrue_interest();
                let _ = fx.manager.repay("prop", opened.position_id, Decimal::new(repay_cents, 2));

                if let Ok(position) = fx.manager.position(opened.position_id) {
                    prop_assert!(position.borrow_principal >= Decimal::ZERO);
                    prop_assert!(position.accrued_interest >= Decimal::ZERO);
                    prop_assert!(position.collateral_value_usd >= Decimal::ZERO);
                }
                let stats = fx.manager.stats();
                prop_assert!(stats.total_borrowed_usd >= Decimal::ZERO);
                prop_assert!(stats.total_collateral_usd >= Decimal::ZERO);
            }
        }
    }
}
