//! Tick orchestration.
//!
//! One tick, in fixed order:
//! 1. refresh the last-price context cache (read-only)
//! 2. exits before entries, trailing marks updated before every close check
//! 3. entries, at most one per pair per tick, first signalling strategy wins
//! 4. mark-to-market into account equity
//! 5. equity-curve sample at the configured stride
//!
//! The loop is single-threaded and synchronous: a tick fully completes
//! before the next begins. The orchestrator is the store's only writer.

use crate::broker::{with_retry, Backoff, RateLimiter};
use crate::config::{ExecutionConfig, TradingConfig};
use crate::data::CandleFeed;
use crate::domain::{Candle, Position};
use crate::engine::emergency::EmergencyStop;
use crate::engine::fill::FillModel;
use crate::engine::reconciler::Reconciler;
use crate::engine::registry::PositionRegistry;
use crate::error::{MarlinError, Result};
use crate::execution::ExecutionAdapter;
use crate::risk::RiskPolicy;
use crate::store::{EquitySnapshot, SqliteStore};
use crate::strategy::StrategyRegistry;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One point on the in-memory equity curve.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

pub struct Orchestrator {
    strategies: StrategyRegistry,
    risk: RiskPolicy,
    registry: PositionRegistry,
    adapter: Arc<dyn ExecutionAdapter>,
    store: Arc<SqliteStore>,
    emergency: EmergencyStop,
    fill: FillModel,
    trading: TradingConfig,
    execution: ExecutionConfig,
    /// Market context cache: last seen close per pair. Refreshed at the top
    /// of every tick; also the price source for end-of-data closes.
    last_price: HashMap<String, Decimal>,
    equity_curve: Vec<EquityPoint>,
    tick_count: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategies: StrategyRegistry,
        risk: RiskPolicy,
        registry: PositionRegistry,
        adapter: Arc<dyn ExecutionAdapter>,
        store: Arc<SqliteStore>,
        emergency: EmergencyStop,
        trading: TradingConfig,
        execution: ExecutionConfig,
    ) -> Self {
        let fill = FillModel::from_config(&execution);
        info!(
            "Engine initialized: {} strategies ({}), {} pairs",
            strategies.len(),
            strategies.names().join(", "),
            trading.pairs.len()
        );

        Self {
            strategies,
            risk,
            registry,
            adapter,
            store,
            emergency,
            fill,
            trading,
            execution,
            last_price: HashMap::new(),
            equity_curve: Vec::new(),
            tick_count: 0,
        }
    }

    pub fn registry(&self) -> &PositionRegistry {
        &self.registry
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn is_halted(&self) -> bool {
        self.emergency.is_tripped()
    }

    /// Process one tick of fresh candle data.
    pub async fn process_tick(
        &mut self,
        candles_by_pair: &HashMap<String, Vec<Candle>>,
        tick_time: DateTime<Utc>,
    ) -> Result<()> {
        self.tick_count += 1;

        // Step 1: refresh the market context cache. Read-only with respect
        // to position and risk state.
        self.refresh_context(candles_by_pair);

        // Step 2: exits before entries
        self.process_exits(candles_by_pair).await?;

        // Safety monitor runs between exits and entries: losses realized
        // this tick count immediately, and a trip blocks the entry pass.
        if let Some(liquidated) = self
            .emergency
            .check(&mut self.registry, self.adapter.as_ref())
            .await?
        {
            for position in &liquidated {
                self.risk.clear_position_state(&position.id);
            }
            self.mark_to_market().await?;
            self.sample_equity(tick_time).await?;
            return Ok(());
        }

        // Step 3: entries
        self.process_entries(candles_by_pair).await?;

        // Step 4: mark-to-market
        self.mark_to_market().await?;

        // Step 5: equity sample
        self.sample_equity(tick_time).await?;

        Ok(())
    }

    fn refresh_context(&mut self, candles_by_pair: &HashMap<String, Vec<Candle>>) {
        for (pair, candles) in candles_by_pair {
            if let Some(last) = candles.last() {
                self.last_price.insert(pair.clone(), last.close);
            }
        }
    }

    /// Evaluate every open position with fresh price data for an exit.
    ///
    /// The trailing high-water mark is advanced before the close check; the
    /// owning strategy's exit hook runs before the generic risk rules.
    async fn process_exits(
        &mut self,
        candles_by_pair: &HashMap<String, Vec<Candle>>,
    ) -> Result<()> {
        let mut open: Vec<(String, Position)> = self.registry.all_open().into_iter().collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));

        for (pair, position) in open {
            let Some(candles) = candles_by_pair.get(&pair) else {
                continue;
            };
            let Some(current_price) = candles.last().map(|c| c.close) else {
                continue;
            };

            self.risk.update_high_water(&position, current_price);

            let reason = self
                .strategies
                .get(&position.strategy_name)
                .and_then(|s| s.should_exit(&position, candles, current_price))
                .map(|exit| exit.reason)
                .or_else(|| self.risk.should_close(&position, current_price));

            let Some(reason) = reason else {
                continue;
            };

            let fill_price = self.fill.exit_fill_price(current_price, position.direction);

            // Execution failures skip this tick's action; the next tick
            // re-evaluates with fresh data. No blind retry on orders.
            if let Err(e) = self.adapter.execute_exit(&position, fill_price).await {
                warn!("Exit fill failed for {pair}: {e}. Skipping this tick");
                continue;
            }

            let fees = self
                .fill
                .round_trip_fees(position.entry_notional(), fill_price * position.quantity);

            match self.registry.close(&pair, fill_price, fees, &reason).await {
                Ok(closed) => {
                    self.risk.clear_position_state(&position.id);
                    let pnl = closed.realized_pnl()?;
                    info!(
                        "CLOSED {pair} {}: entry {} exit {} P&L {pnl} ({reason})",
                        closed.direction, closed.entry_price, fill_price
                    );
                }
                Err(e) => warn!("Failed to record close for {pair}: {e}"),
            }
        }

        Ok(())
    }

    /// Look for new entries on pairs without an open position, one entry
    /// per pair per tick.
    async fn process_entries(
        &mut self,
        candles_by_pair: &HashMap<String, Vec<Candle>>,
    ) -> Result<()> {
        let mut pairs: Vec<&String> = candles_by_pair.keys().collect();
        pairs.sort();

        for pair in pairs {
            if self.registry.has_position(pair) {
                continue;
            }

            let candles = &candles_by_pair[pair];
            if candles.is_empty() {
                continue;
            }

            // Strategies run in configured order; the first one to produce
            // a signal acts for this pair and the rest are not consulted.
            for strategy in self.strategies.in_order() {
                let Some(signal) = strategy.analyze(candles) else {
                    continue;
                };

                if let Err(rejection) = self.risk.can_open(
                    &signal,
                    self.registry.count_open(),
                    self.registry.has_position(pair),
                ) {
                    debug!("Signal blocked for {pair}: {rejection}");
                    break;
                }

                let account_value = self.adapter.account_value().await?;
                let reference_price = candles[candles.len() - 1].close;
                let direction = if signal.is_long() {
                    crate::domain::Direction::Long
                } else {
                    crate::domain::Direction::Short
                };
                let fill_price = self.fill.entry_fill_price(reference_price, direction);
                let quantity = self.risk.size_position(account_value, fill_price);

                match self.adapter.execute_entry(&signal, fill_price, quantity).await {
                    Ok(position) => {
                        info!(
                            "OPENED {pair} {}: price {fill_price} qty {quantity:.4} ({})",
                            position.direction, signal.strategy_name
                        );
                        debug!("  Reasoning: {}", signal.reasoning);
                        self.registry.open(position).await?;
                    }
                    Err(MarlinError::InsufficientFunds { have, need }) => {
                        // Treated exactly like a risk rejection
                        debug!("Entry for {pair} rejected: insufficient funds ({have} < {need})");
                    }
                    Err(e) => {
                        warn!("Entry fill failed for {pair}: {e}. Skipping this tick");
                    }
                }

                break;
            }
        }

        Ok(())
    }

    /// Sum unrealized P&L over open positions and push it into equity.
    async fn mark_to_market(&mut self) -> Result<()> {
        let unrealized = self.registry.total_unrealized_pnl(&self.last_price);
        self.adapter.update_equity(unrealized).await
    }

    async fn sample_equity(&mut self, tick_time: DateTime<Utc>) -> Result<()> {
        if (self.tick_count - 1) % self.trading.equity_sample_stride != 0 {
            return Ok(());
        }

        let equity = self.adapter.account_value().await?;
        self.equity_curve.push(EquityPoint {
            timestamp: tick_time,
            equity,
        });
        Ok(())
    }

    /// Force-close every remaining open position at the last known price.
    ///
    /// Used at the end of a finite replay and nowhere else: this is the only
    /// path that closes positions without consulting the risk policy.
    pub async fn close_all(&mut self, reason: &str) -> Result<Vec<Position>> {
        let mut open: Vec<(String, Position)> = self.registry.all_open().into_iter().collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));

        let mut closed = Vec::with_capacity(open.len());
        for (pair, position) in open {
            let reference_price = self
                .last_price
                .get(&pair)
                .copied()
                .unwrap_or(position.entry_price);
            let fill_price = self.fill.exit_fill_price(reference_price, position.direction);

            if let Err(e) = self.adapter.execute_exit(&position, fill_price).await {
                warn!("Final exit fill failed for {pair}: {e}. Closing locally");
            }

            let fees = self
                .fill
                .round_trip_fees(position.entry_notional(), fill_price * position.quantity);

            match self.registry.close(&pair, fill_price, fees, reason).await {
                Ok(position) => {
                    self.risk.clear_position_state(&position.id);
                    closed.push(position);
                }
                Err(e) => warn!("Failed to close {pair} at end: {e}"),
            }
        }

        if !closed.is_empty() {
            info!("Closed {} remaining positions ({reason})", closed.len());
        }
        Ok(closed)
    }

    /// Run one reconciliation pass against this engine's registry. Used at
    /// startup before the live loop takes over the periodic cadence.
    pub async fn reconcile_now(
        &mut self,
        reconciler: &Reconciler,
    ) -> Result<crate::engine::reconciler::ReconcileReport> {
        reconciler.reconcile(&mut self.registry).await
    }

    /// Live polling loop: fetch candles, tick, snapshot equity, reconcile
    /// periodically. Runs until ctrl-c, which produces a best-effort final
    /// equity report rather than a guaranteed clean position close.
    pub async fn run_live(
        &mut self,
        feed: Arc<dyn CandleFeed>,
        reconciler: Option<Reconciler>,
    ) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.trading.loop_interval_secs));
        let mut rate_limiter = RateLimiter::new(
            self.execution.rate_limit_requests,
            Duration::from_secs(self.execution.rate_limit_window_secs),
        );
        let mut last_candles: HashMap<String, Vec<Candle>> = HashMap::new();
        let mut iteration: u64 = 0;

        info!(
            "Live loop started: {} pairs, {}s interval",
            self.trading.pairs.len(),
            self.trading.loop_interval_secs
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {}
            }

            iteration += 1;

            if let Some(reconciler) = &reconciler {
                if iteration % self.trading.reconcile_every == 0 {
                    match reconciler.reconcile(&mut self.registry).await {
                        Ok(report) => {
                            if !report.adopted.is_empty() || !report.stale_closed.is_empty() {
                                info!(
                                    "Reconciliation: adopted={}, stale_closed={}",
                                    report.adopted.len(),
                                    report.stale_closed.len()
                                );
                            }
                        }
                        Err(e) => error!("Reconciliation error: {e}"),
                    }
                }
            }

            rate_limiter.acquire().await;
            let fetched = with_retry(
                "fetch candles",
                Backoff::new(
                    self.execution.max_retries,
                    Duration::from_millis(self.execution.retry_base_delay_ms),
                ),
                || feed.fetch_recent(&self.trading.pairs, self.trading.candle_history),
            )
            .await;

            match fetched {
                Ok(candles_by_pair) => {
                    last_candles = candles_by_pair;
                    if let Err(e) = self.process_tick(&last_candles, Utc::now()).await {
                        error!("Tick failed: {e}");
                    }
                }
                Err(e) => {
                    error!("Candle fetch failed: {e}");
                    // Degraded pass: still protect open positions using the
                    // last known prices. No new entries.
                    if last_candles.is_empty() {
                        warn!("No cached prices available, cannot check exits");
                    } else {
                        warn!("Checking exits against last known prices");
                        self.refresh_context(&last_candles);
                        if let Err(e) = self.process_exits(&last_candles).await {
                            error!("Degraded exit pass failed: {e}");
                        }
                        if let Err(e) = self.mark_to_market().await {
                            error!("Equity mark failed: {e}");
                        }
                    }
                }
            }

            if let Err(e) = self.snapshot_equity().await {
                warn!("Equity snapshot failed: {e}");
            }
        }

        // Best-effort final report
        match self.adapter.account_value().await {
            Ok(equity) => info!(
                "Final equity: {equity} ({} positions still open)",
                self.registry.count_open()
            ),
            Err(e) => warn!("Could not fetch final equity: {e}"),
        }

        Ok(())
    }

    /// Persist one equity snapshot row for the reporting reader.
    async fn snapshot_equity(&self) -> Result<()> {
        let cash = self.adapter.cash_balance().await?;
        let equity = self.adapter.account_value().await?;
        let unrealized = self.registry.total_unrealized_pnl(&self.last_price);

        self.store
            .insert_equity_snapshot(&EquitySnapshot {
                timestamp: Utc::now(),
                cash,
                equity,
                unrealized_pnl: unrealized,
                num_positions: self.registry.count_open() as i64,
            })
            .await
    }
}
