//! Emergency stop: a one-way kill-switch over realized trades.
//!
//! Monitors today's realized P&L percentage and the current losing streak.
//! Either trigger trips the stop, which force-liquidates every open position
//! and halts trading for the rest of the process lifetime. There is no reset
//! path: a fresh process start is required to clear it.

use crate::config::EmergencyConfig;
use crate::domain::Position;
use crate::engine::registry::PositionRegistry;
use crate::error::Result;
use crate::execution::ExecutionAdapter;
use crate::store::SqliteStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, warn};

pub struct EmergencyStop {
    store: Arc<SqliteStore>,
    max_consecutive_losses: usize,
    max_daily_loss_pct: Decimal,
    tripped: bool,
}

impl EmergencyStop {
    pub fn new(store: Arc<SqliteStore>, config: &EmergencyConfig) -> Self {
        Self {
            store,
            max_consecutive_losses: config.max_consecutive_losses,
            max_daily_loss_pct: config.max_daily_loss_pct,
            tripped: false,
        }
    }

    /// Whether the stop has tripped this process lifetime.
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Evaluate both triggers and, on a trip, liquidate all open positions.
    ///
    /// Returns the liquidated positions when the stop trips on this call so
    /// the caller can release per-position risk state; None while healthy.
    /// Once tripped, subsequent calls return an empty trip without
    /// re-liquidating.
    pub async fn check(
        &mut self,
        registry: &mut PositionRegistry,
        adapter: &dyn ExecutionAdapter,
    ) -> Result<Option<Vec<Position>>> {
        if self.tripped {
            return Ok(Some(Vec::new()));
        }

        let daily_pnl = self.daily_pnl_pct().await?;
        if daily_pnl <= -self.max_daily_loss_pct {
            error!(
                "EMERGENCY STOP: daily loss {:.2}% breached limit {:.2}%",
                daily_pnl * Decimal::ONE_HUNDRED,
                self.max_daily_loss_pct * Decimal::ONE_HUNDRED
            );
            self.tripped = true;
            let closed = self
                .liquidate_all(registry, adapter, "emergency_daily_loss")
                .await?;
            return Ok(Some(closed));
        }

        let streak = self.consecutive_losses().await?;
        if streak >= self.max_consecutive_losses {
            error!(
                "EMERGENCY STOP: {streak} consecutive losses >= limit {}",
                self.max_consecutive_losses
            );
            self.tripped = true;
            let closed = self
                .liquidate_all(registry, adapter, "emergency_consecutive_losses")
                .await?;
            return Ok(Some(closed));
        }

        Ok(None)
    }

    /// Today's realized P&L as a fraction of current equity.
    async fn daily_pnl_pct(&self) -> Result<Decimal> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc();

        let trades = self.store.trades_closed_since(midnight).await?;
        if trades.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let pnl_sum: Decimal = trades.iter().map(|t| t.pnl).sum();
        let equity = self
            .store
            .get_account_state()
            .await?
            .map(|s| s.equity)
            .unwrap_or(Decimal::ZERO);

        if equity == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        Ok(pnl_sum / equity)
    }

    /// Length of the current losing streak: most-recent-first scan of trade
    /// history, stopping at the first winner.
    async fn consecutive_losses(&self) -> Result<usize> {
        let trades = self
            .store
            .recent_trades(self.max_consecutive_losses as i64)
            .await?;

        let mut count = 0;
        for trade in &trades {
            if trade.pnl <= Decimal::ZERO {
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }

    /// Close every open position immediately.
    ///
    /// No live price source is available on this path, so the position's own
    /// entry price stands in for the exit price. That misstates realized
    /// P&L on forced liquidation; a real last-trade price feed should
    /// replace it before this is treated as accurate.
    async fn liquidate_all(
        &self,
        registry: &mut PositionRegistry,
        adapter: &dyn ExecutionAdapter,
        reason: &str,
    ) -> Result<Vec<Position>> {
        let open = registry.all_open();
        let mut closed = Vec::with_capacity(open.len());

        let mut pairs: Vec<&String> = open.keys().collect();
        pairs.sort();

        for pair in pairs {
            let position = &open[pair];
            let exit_price = position.entry_price;

            if let Err(e) = adapter.execute_exit(position, exit_price).await {
                warn!("Liquidation fill failed for {pair}: {e}. Closing locally anyway");
            }

            match registry.close(pair, exit_price, Decimal::ZERO, reason).await {
                Ok(position) => closed.push(position),
                Err(e) => warn!("Failed to liquidate {pair}: {e}"),
            }
        }

        warn!("Emergency liquidation closed {} positions", closed.len());
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, NewPosition, Trade};
    use crate::execution::PaperExecution;
    use rust_decimal_macros::dec;

    fn config() -> EmergencyConfig {
        EmergencyConfig {
            max_consecutive_losses: 3,
            max_daily_loss_pct: dec!(0.03),
        }
    }

    fn long(pair: &str, entry: Decimal) -> Position {
        Position::open(NewPosition {
            pair: pair.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: dec!(1),
            entry_time: Utc::now(),
            strategy_name: "test_strategy".to_string(),
            stop_loss_price: None,
            take_profit_price: None,
            signal_id: None,
        })
        .unwrap()
    }

    /// Record a finished trade with the given P&L directly in the store.
    async fn record_trade(store: &SqliteStore, pair: &str, pnl: Decimal) {
        let position = long(pair, dec!(1000));
        store.insert_position(&position).await.unwrap();
        let exit = dec!(1000) + pnl;
        let closed = position.close(exit, "test").unwrap();
        let trade = Trade::from_closed(&closed, Decimal::ZERO).unwrap();
        store.close_position(&closed, &trade).await.unwrap();
    }

    async fn harness() -> (
        Arc<SqliteStore>,
        PositionRegistry,
        PaperExecution,
        EmergencyStop,
    ) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();
        let paper = PaperExecution::new(Arc::clone(&store), dec!(10000))
            .await
            .unwrap();
        let stop = EmergencyStop::new(Arc::clone(&store), &config());
        (store, registry, paper, stop)
    }

    #[tokio::test]
    async fn healthy_account_does_not_trip() {
        let (store, mut registry, paper, mut stop) = harness().await;
        record_trade(&store, "AAA/USD", dec!(5)).await;

        let result = stop.check(&mut registry, &paper).await.unwrap();
        assert!(result.is_none());
        assert!(!stop.is_tripped());
    }

    #[tokio::test]
    async fn consecutive_losses_trip_and_liquidate() {
        let (store, mut registry, paper, mut stop) = harness().await;
        record_trade(&store, "AAA/USD", dec!(-1)).await;
        record_trade(&store, "BBB/USD", dec!(-1)).await;
        record_trade(&store, "CCC/USD", dec!(-1)).await;

        registry.open(long("BTC/USD", dec!(100))).await.unwrap();

        let closed = stop.check(&mut registry, &paper).await.unwrap().unwrap();
        assert!(stop.is_tripped());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_price, Some(dec!(100)));
        assert!(closed[0].exit_reason.contains("emergency_consecutive_losses"));
        assert_eq!(registry.count_open(), 0);
    }

    #[tokio::test]
    async fn winner_resets_the_streak() {
        let (store, mut registry, paper, mut stop) = harness().await;
        record_trade(&store, "AAA/USD", dec!(-1)).await;
        record_trade(&store, "BBB/USD", dec!(-1)).await;
        // Most recent trade is a winner, so the streak is zero
        record_trade(&store, "CCC/USD", dec!(2)).await;

        let result = stop.check(&mut registry, &paper).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn daily_loss_trips() {
        let (store, mut registry, paper, mut stop) = harness().await;
        // -400 on 10000 equity = -4%, past the 3% limit
        record_trade(&store, "AAA/USD", dec!(-400)).await;

        let result = stop.check(&mut registry, &paper).await.unwrap();
        assert!(result.is_some());
        assert!(stop.is_tripped());
    }

    #[tokio::test]
    async fn trip_is_one_way() {
        let (store, mut registry, paper, mut stop) = harness().await;
        record_trade(&store, "AAA/USD", dec!(-400)).await;

        assert!(stop.check(&mut registry, &paper).await.unwrap().is_some());

        // A later profitable day does not clear the trip
        record_trade(&store, "BBB/USD", dec!(1000)).await;
        let again = stop.check(&mut registry, &paper).await.unwrap();
        assert!(again.is_some());
        assert!(stop.is_tripped());
    }
}
