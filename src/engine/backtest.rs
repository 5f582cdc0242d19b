//! Backtest engine: replay historical candles through the orchestrator.
//!
//! Iterates the union of candle timestamps across pairs without lookahead:
//! each tick sees only history up to that instant. Fills go through the same
//! slippage/commission model and paper ledger as live paper trading, backed
//! by an in-memory database.

use crate::config::AppConfig;
use crate::domain::{Candle, Trade};
use crate::engine::emergency::EmergencyStop;
use crate::engine::orchestrator::{EquityPoint, Orchestrator};
use crate::engine::registry::PositionRegistry;
use crate::error::Result;
use crate::execution::PaperExecution;
use crate::risk::RiskPolicy;
use crate::store::SqliteStore;
use crate::strategy::StrategyRegistry;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// Aggregate results of one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub initial_balance: Decimal,
    pub final_equity: Decimal,
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate_pct: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: Decimal,
    pub max_drawdown_pct: Decimal,
    pub by_strategy: Vec<StrategyPerformance>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

#[derive(Debug, Clone)]
pub struct StrategyPerformance {
    pub strategy: String,
    pub trades: usize,
    pub winners: usize,
    pub win_rate_pct: Decimal,
    pub pnl: Decimal,
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backtest results")?;
        writeln!(
            f,
            "  Total return:  {} ({:.2}%)",
            self.total_return, self.total_return_pct
        )?;
        writeln!(f, "  Final equity:  {}", self.final_equity)?;
        writeln!(f, "  Total trades:  {}", self.total_trades)?;
        writeln!(
            f,
            "  Win rate:      {:.1}% ({} W / {} L)",
            self.win_rate_pct, self.winners, self.losers
        )?;
        writeln!(f, "  Avg win:       {:.2}", self.avg_win)?;
        writeln!(f, "  Avg loss:      {:.2}", self.avg_loss)?;
        writeln!(f, "  Profit factor: {:.2}", self.profit_factor)?;
        writeln!(f, "  Max drawdown:  {:.2}%", self.max_drawdown_pct)?;

        if !self.by_strategy.is_empty() {
            writeln!(f, "  By strategy:")?;
            for perf in &self.by_strategy {
                writeln!(
                    f,
                    "    {}: {} trades, {:.1}% win rate, P&L {}",
                    perf.strategy, perf.trades, perf.win_rate_pct, perf.pnl
                )?;
            }
        }
        Ok(())
    }
}

pub struct BacktestEngine {
    orchestrator: Orchestrator,
    store: Arc<SqliteStore>,
    initial_balance: Decimal,
}

impl BacktestEngine {
    /// Assemble a fully simulated engine over an in-memory database.
    pub async fn new(config: &AppConfig, strategies: StrategyRegistry) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory().await?);
        let adapter = Arc::new(
            PaperExecution::new(Arc::clone(&store), config.paper.starting_balance).await?,
        );
        let registry = PositionRegistry::load(Arc::clone(&store)).await?;
        let risk = RiskPolicy::new(config.risk.clone());
        let emergency = EmergencyStop::new(Arc::clone(&store), &config.emergency);

        let orchestrator = Orchestrator::new(
            strategies,
            risk,
            registry,
            adapter,
            Arc::clone(&store),
            emergency,
            config.trading.clone(),
            config.execution.clone(),
        );

        Ok(Self {
            orchestrator,
            store,
            initial_balance: config.paper.starting_balance,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Replay history tick by tick and produce the report.
    pub async fn run(
        &mut self,
        candles_by_pair: HashMap<String, Vec<Candle>>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BacktestReport> {
        let filtered = filter_by_date(candles_by_pair, start, end);

        // Union of timestamps across pairs, replayed in order
        let timestamps: BTreeSet<DateTime<Utc>> = filtered
            .values()
            .flat_map(|candles| candles.iter().map(|c| c.timestamp))
            .collect();

        info!(
            "Backtest: {} pairs, {} time steps",
            filtered.len(),
            timestamps.len()
        );

        // Growing per-pair windows; each tick sees history up to "now" only
        let mut cursor: HashMap<String, usize> = filtered.keys().map(|p| (p.clone(), 0)).collect();
        let mut windows: HashMap<String, Vec<Candle>> = filtered
            .keys()
            .map(|p| (p.clone(), Vec::new()))
            .collect();

        for ts in &timestamps {
            for (pair, candles) in &filtered {
                let idx = cursor.get_mut(pair).expect("cursor seeded for every pair");
                let window = windows.get_mut(pair).expect("window seeded for every pair");
                while *idx < candles.len() && candles[*idx].timestamp <= *ts {
                    window.push(candles[*idx].clone());
                    *idx += 1;
                }
            }

            self.orchestrator.process_tick(&windows, *ts).await?;
        }

        // Close whatever is left at the last seen price
        self.orchestrator.close_all("End of backtest").await?;

        self.report().await
    }

    async fn report(&self) -> Result<BacktestReport> {
        let trades = self.store.all_trades().await?;
        let final_equity = self
            .store
            .get_account_state()
            .await?
            .map(|s| s.equity)
            .unwrap_or(self.initial_balance);

        let equity_curve = self.orchestrator.equity_curve().to_vec();

        let total_return = final_equity - self.initial_balance;
        let total_return_pct = if self.initial_balance > Decimal::ZERO {
            total_return / self.initial_balance * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let winners: Vec<&Trade> = trades.iter().filter(|t| t.is_winner()).collect();
        let losers: Vec<&Trade> = trades.iter().filter(|t| !t.is_winner()).collect();

        let win_rate_pct = if trades.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(winners.len()) / Decimal::from(trades.len()) * Decimal::ONE_HUNDRED
        };

        let gross_profit: Decimal = winners.iter().map(|t| t.pnl).sum();
        let gross_loss: Decimal = losers.iter().map(|t| t.pnl.abs()).sum();

        let avg_win = if winners.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit / Decimal::from(winners.len())
        };
        let avg_loss = if losers.is_empty() {
            Decimal::ZERO
        } else {
            -(gross_loss / Decimal::from(losers.len()))
        };

        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit / gross_loss
        } else {
            Decimal::ZERO
        };

        let max_drawdown_pct = max_drawdown(self.initial_balance, &equity_curve);
        let by_strategy = strategy_breakdown(&trades);

        Ok(BacktestReport {
            initial_balance: self.initial_balance,
            final_equity,
            total_return,
            total_return_pct,
            total_trades: trades.len(),
            winners: winners.len(),
            losers: losers.len(),
            win_rate_pct,
            avg_win,
            avg_loss,
            profit_factor,
            max_drawdown_pct,
            by_strategy,
            trades,
            equity_curve,
        })
    }
}

fn filter_by_date(
    candles_by_pair: HashMap<String, Vec<Candle>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> HashMap<String, Vec<Candle>> {
    candles_by_pair
        .into_iter()
        .map(|(pair, candles)| {
            let mut kept: Vec<Candle> = candles
                .into_iter()
                .filter(|c| start.map_or(true, |s| c.timestamp >= s))
                .filter(|c| end.map_or(true, |e| c.timestamp <= e))
                .collect();
            kept.sort_by_key(|c| c.timestamp);
            (pair, kept)
        })
        .filter(|(_, candles)| !candles.is_empty())
        .collect()
}

/// Largest peak-to-trough equity decline, as a percentage of the peak.
fn max_drawdown(initial: Decimal, curve: &[EquityPoint]) -> Decimal {
    let mut peak = initial;
    let mut max_dd = Decimal::ZERO;

    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - point.equity) / peak * Decimal::ONE_HUNDRED;
            if drawdown > max_dd {
                max_dd = drawdown;
            }
        }
    }
    max_dd
}

fn strategy_breakdown(trades: &[Trade]) -> Vec<StrategyPerformance> {
    let mut stats: HashMap<&str, (usize, usize, Decimal)> = HashMap::new();
    for trade in trades {
        let entry = stats
            .entry(trade.strategy_name.as_str())
            .or_insert((0, 0, Decimal::ZERO));
        entry.0 += 1;
        if trade.is_winner() {
            entry.1 += 1;
        }
        entry.2 += trade.pnl;
    }

    let mut breakdown: Vec<StrategyPerformance> = stats
        .into_iter()
        .map(|(strategy, (count, winners, pnl))| StrategyPerformance {
            strategy: strategy.to_string(),
            trades: count,
            winners,
            win_rate_pct: Decimal::from(winners) / Decimal::from(count) * Decimal::ONE_HUNDRED,
            pnl,
        })
        .collect();
    breakdown.sort_by(|a, b| a.strategy.cmp(&b.strategy));
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn point(equity: Decimal) -> EquityPoint {
        EquityPoint {
            timestamp: Utc::now(),
            equity,
        }
    }

    #[test]
    fn drawdown_tracks_the_peak() {
        let curve = vec![
            point(dec!(10000)),
            point(dec!(11000)),
            point(dec!(9900)),
            point(dec!(10500)),
        ];
        // Peak 11000 -> trough 9900 = 10%
        assert_eq!(max_drawdown(dec!(10000), &curve), dec!(10));
    }

    #[test]
    fn flat_curve_has_no_drawdown() {
        let curve = vec![point(dec!(10000)), point(dec!(10000))];
        assert_eq!(max_drawdown(dec!(10000), &curve), Decimal::ZERO);
    }

    #[test]
    fn date_filter_keeps_the_window_sorted() {
        let base = Utc::now();
        let candle = |offset: i64| {
            Candle::new(
                "BTC/USD",
                base + Duration::minutes(offset),
                dec!(100),
                dec!(100),
                dec!(100),
                dec!(100),
                dec!(1),
            )
            .unwrap()
        };

        let mut input = HashMap::new();
        input.insert(
            "BTC/USD".to_string(),
            vec![candle(30), candle(0), candle(60)],
        );

        let filtered = filter_by_date(
            input,
            Some(base),
            Some(base + Duration::minutes(45)),
        );
        let kept = &filtered["BTC/USD"];
        assert_eq!(kept.len(), 2);
        assert!(kept[0].timestamp < kept[1].timestamp);
    }
}
