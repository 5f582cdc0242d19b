//! Position registry: the single source of truth for open positions.
//!
//! Combines the durable store with an in-memory map keyed by pair. The
//! durable write always happens before the cache mutation, so the cache can
//! be reconstructed from the store after a crash; it is never authoritative.

use crate::domain::{Position, Trade};
use crate::error::{MarlinError, Result};
use crate::store::SqliteStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PositionRegistry {
    store: Arc<SqliteStore>,
    /// Open positions keyed by pair. Callers only ever receive clones.
    cache: HashMap<String, Position>,
}

impl PositionRegistry {
    /// Build the registry, reconstructing the cache from the durable store.
    pub async fn load(store: Arc<SqliteStore>) -> Result<Self> {
        let positions = store.get_open_positions().await?;
        let cache: HashMap<String, Position> = positions
            .into_iter()
            .map(|p| (p.pair.clone(), p))
            .collect();

        debug!("Loaded {} open positions from store", cache.len());
        Ok(Self { store, cache })
    }

    pub fn has_position(&self, pair: &str) -> bool {
        self.cache.contains_key(pair)
    }

    pub fn get(&self, pair: &str) -> Option<Position> {
        self.cache.get(pair).cloned()
    }

    /// Snapshot of all open positions.
    pub fn all_open(&self) -> HashMap<String, Position> {
        self.cache.clone()
    }

    pub fn count_open(&self) -> usize {
        self.cache.len()
    }

    /// Register a newly opened position. Store first, then cache.
    pub async fn open(&mut self, position: Position) -> Result<()> {
        if self.has_position(&position.pair) {
            return Err(MarlinError::InvariantViolation(format!(
                "Already have open position for {}",
                position.pair
            )));
        }

        if !position.is_open() {
            return Err(MarlinError::InvariantViolation(
                "Can only register positions with OPEN status".to_string(),
            ));
        }

        self.store.insert_position(&position).await?;
        info!(
            "Opened {} {} @ {} qty {} ({})",
            position.pair,
            position.direction,
            position.entry_price,
            position.quantity,
            position.strategy_name
        );
        self.cache.insert(position.pair.clone(), position);
        Ok(())
    }

    /// Close the open position for a pair.
    ///
    /// Produces the closed position and its trade record, persists both in
    /// one transaction, then evicts the cache entry. `fees` is the total
    /// commission for the round trip, subtracted from the trade's net P&L.
    pub async fn close(
        &mut self,
        pair: &str,
        exit_price: Decimal,
        fees: Decimal,
        reason: &str,
    ) -> Result<Position> {
        let position = self.cache.get(pair).ok_or_else(|| {
            MarlinError::InvariantViolation(format!("No open position for {pair}"))
        })?;

        let closed = position.close(exit_price, reason)?;
        let trade = Trade::from_closed(&closed, fees)?;

        self.store.close_position(&closed, &trade).await?;
        self.cache.remove(pair);

        info!(
            "Closed {} {} @ {} P&L {} ({})",
            closed.pair, closed.direction, exit_price, trade.pnl, reason
        );
        Ok(closed)
    }

    /// Total notional exposure across open positions with a known price.
    pub fn total_exposure(&self, current_prices: &HashMap<String, Decimal>) -> Decimal {
        self.cache
            .values()
            .filter(|p| current_prices.contains_key(&p.pair))
            .map(|p| p.entry_notional())
            .sum()
    }

    /// Total unrealized P&L across open positions, valued at the given
    /// prices. Pairs without a price contribute nothing.
    pub fn total_unrealized_pnl(&self, current_prices: &HashMap<String, Decimal>) -> Decimal {
        self.cache
            .values()
            .filter_map(|p| {
                current_prices
                    .get(&p.pair)
                    .and_then(|price| p.unrealized_pnl(*price).ok())
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::NewPosition;
    use crate::domain::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn long(pair: &str, entry: Decimal, qty: Decimal) -> Position {
        Position::open(NewPosition {
            pair: pair.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: qty,
            entry_time: Utc::now(),
            strategy_name: "test_strategy".to_string(),
            stop_loss_price: None,
            take_profit_price: None,
            signal_id: None,
        })
        .unwrap()
    }

    async fn registry() -> (Arc<SqliteStore>, PositionRegistry) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();
        (store, registry)
    }

    #[tokio::test]
    async fn open_then_query() {
        let (_store, mut registry) = registry().await;
        registry.open(long("BTC/USD", dec!(100), dec!(1))).await.unwrap();

        assert!(registry.has_position("BTC/USD"));
        assert_eq!(registry.count_open(), 1);
        assert_eq!(registry.get("BTC/USD").unwrap().entry_price, dec!(100));
    }

    #[tokio::test]
    async fn duplicate_pair_rejected() {
        let (_store, mut registry) = registry().await;
        registry.open(long("BTC/USD", dec!(100), dec!(1))).await.unwrap();

        let result = registry.open(long("BTC/USD", dec!(101), dec!(1))).await;
        assert!(matches!(result, Err(MarlinError::InvariantViolation(_))));
        assert_eq!(registry.count_open(), 1);
    }

    #[tokio::test]
    async fn close_produces_trade_and_evicts() {
        let (store, mut registry) = registry().await;
        registry.open(long("BTC/USD", dec!(100), dec!(2))).await.unwrap();

        let closed = registry
            .close("BTC/USD", dec!(105), dec!(0.5), "take profit")
            .await
            .unwrap();

        assert_eq!(closed.realized_pnl().unwrap(), dec!(10));
        assert!(!registry.has_position("BTC/USD"));

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].pnl, dec!(9.5));
        assert_eq!(trades[0].fees, dec!(0.5));
    }

    #[tokio::test]
    async fn close_without_position_fails() {
        let (_store, mut registry) = registry().await;
        let result = registry
            .close("BTC/USD", dec!(100), Decimal::ZERO, "nothing there")
            .await;
        assert!(matches!(result, Err(MarlinError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn cache_reconstructs_from_store() {
        let (store, mut registry) = registry().await;
        registry.open(long("BTC/USD", dec!(100), dec!(1))).await.unwrap();
        registry.open(long("ETH/USD", dec!(20), dec!(10))).await.unwrap();

        // Simulate a restart: fresh registry over the same store
        let reloaded = PositionRegistry::load(store).await.unwrap();
        assert_eq!(reloaded.count_open(), 2);
        assert!(reloaded.has_position("BTC/USD"));
        assert!(reloaded.has_position("ETH/USD"));
    }

    #[tokio::test]
    async fn aggregates_use_the_price_map() {
        let (_store, mut registry) = registry().await;
        registry.open(long("BTC/USD", dec!(100), dec!(2))).await.unwrap();
        registry.open(long("ETH/USD", dec!(20), dec!(10))).await.unwrap();

        let mut prices = HashMap::new();
        prices.insert("BTC/USD".to_string(), dec!(110));

        // Only the priced pair counts
        assert_eq!(registry.total_exposure(&prices), dec!(200));
        assert_eq!(registry.total_unrealized_pnl(&prices), dec!(20));

        prices.insert("ETH/USD".to_string(), dec!(19));
        assert_eq!(registry.total_exposure(&prices), dec!(400));
        assert_eq!(registry.total_unrealized_pnl(&prices), dec!(10));
    }
}
