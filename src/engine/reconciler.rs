//! Position reconciliation between the local registry and the broker.
//!
//! Computes a three-way diff of open positions:
//! - broker-only  -> adopt locally under the "EXTERNAL" strategy
//! - registry-only -> close locally as stale, at entry price
//! - both         -> matched, left untouched
//!
//! Every adopt/stale-close writes an audit row independent of the trades
//! table. A failure on one pair is logged and skipped so a single bad
//! symbol cannot block reconciliation of the rest.

use crate::broker::{BrokerClient, BrokerPosition};
use crate::domain::position::short_id;
use crate::domain::{NewPosition, Position};
use crate::engine::registry::PositionRegistry;
use crate::error::Result;
use crate::store::SqliteStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Strategy name assigned to adopted positions so every subsequent risk
/// rule applies to them like any other position.
pub const EXTERNAL_STRATEGY: &str = "EXTERNAL";

const STALE_CLOSE_REASON: &str = "Reconciliation: position not found on exchange";

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub adopted: Vec<String>,
    pub stale_closed: Vec<String>,
    pub matched: Vec<String>,
}

pub struct Reconciler {
    broker: Arc<dyn BrokerClient>,
    store: Arc<SqliteStore>,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn BrokerClient>, store: Arc<SqliteStore>) -> Self {
        Self { broker, store }
    }

    /// Run one full reconciliation pass against the registry.
    pub async fn reconcile(&self, registry: &mut PositionRegistry) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let broker_positions: HashMap<String, BrokerPosition> = self
            .broker
            .get_open_positions()
            .await?
            .into_iter()
            .map(|p| (p.pair.clone(), p))
            .collect();

        let local_positions = registry.all_open();

        // Broker-only: adopt
        let mut broker_only: Vec<&String> = broker_positions
            .keys()
            .filter(|pair| !local_positions.contains_key(*pair))
            .collect();
        broker_only.sort();

        for pair in broker_only {
            let reported = &broker_positions[pair];
            match self.adopt(registry, reported).await {
                Ok(()) => {
                    report.adopted.push(pair.clone());
                    info!("RECONCILE: adopted external position {pair}");
                }
                Err(e) => error!("RECONCILE: failed to adopt {pair}: {e}"),
            }
        }

        // Registry-only: close as stale
        let mut registry_only: Vec<&String> = local_positions
            .keys()
            .filter(|pair| !broker_positions.contains_key(*pair))
            .collect();
        registry_only.sort();

        for pair in registry_only {
            match self.close_stale(registry, &local_positions[pair]).await {
                Ok(()) => {
                    report.stale_closed.push(pair.clone());
                    info!("RECONCILE: closed stale position {pair} (not on exchange)");
                }
                Err(e) => error!("RECONCILE: failed to close stale {pair}: {e}"),
            }
        }

        // Present in both: matched, untouched
        for pair in local_positions.keys() {
            if broker_positions.contains_key(pair) {
                report.matched.push(pair.clone());
            }
        }
        report.matched.sort();

        Ok(report)
    }

    /// Insert a broker-reported position the registry doesn't know about.
    async fn adopt(
        &self,
        registry: &mut PositionRegistry,
        reported: &BrokerPosition,
    ) -> Result<()> {
        let position = Position::open_with_id(
            short_id("ext"),
            NewPosition {
                pair: reported.pair.clone(),
                direction: reported.direction,
                entry_price: reported.entry_price,
                quantity: reported.quantity,
                entry_time: Utc::now(),
                strategy_name: EXTERNAL_STRATEGY.to_string(),
                stop_loss_price: None,
                take_profit_price: None,
                signal_id: None,
            },
        )?;

        registry.open(position).await?;

        self.store
            .insert_reconciliation_log(
                "adopted",
                &reported.pair,
                &format!(
                    "Adopted external {} position qty={}",
                    reported.direction, reported.quantity
                ),
            )
            .await?;

        Ok(())
    }

    /// Close a local position the broker no longer reports. No market data
    /// is assumed available here, so the entry price stands in; the reason
    /// string marks it as a reconciliation-driven close, distinguishable
    /// from a market-priced one.
    async fn close_stale(
        &self,
        registry: &mut PositionRegistry,
        position: &Position,
    ) -> Result<()> {
        registry
            .close(
                &position.pair,
                position.entry_price,
                Decimal::ZERO,
                STALE_CLOSE_REASON,
            )
            .await?;

        self.store
            .insert_reconciliation_log(
                "stale_closed",
                &position.pair,
                "Position not found on exchange, closed locally",
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerAccount, BrokerOrder, OrderSide};
    use crate::domain::Direction;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FakeBroker {
        positions: Vec<BrokerPosition>,
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn get_account(&self) -> Result<BrokerAccount> {
            Ok(BrokerAccount {
                cash: dec!(1000),
                equity: dec!(1000),
            })
        }

        async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>> {
            Ok(self.positions.clone())
        }

        async fn place_market_order(
            &self,
            _pair: &str,
            _quantity: Decimal,
            _side: OrderSide,
        ) -> Result<Option<BrokerOrder>> {
            Ok(None)
        }

        async fn close_position(&self, _pair: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn broker_long(pair: &str, qty: Decimal, entry: Decimal) -> BrokerPosition {
        BrokerPosition {
            pair: pair.to_string(),
            quantity: qty,
            direction: Direction::Long,
            entry_price: entry,
            current_price: entry,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    fn local_long(pair: &str) -> Position {
        Position::open(NewPosition {
            pair: pair.to_string(),
            direction: Direction::Long,
            entry_price: dec!(100),
            quantity: dec!(1),
            entry_time: Utc::now(),
            strategy_name: "test_strategy".to_string(),
            stop_loss_price: None,
            take_profit_price: None,
            signal_id: None,
        })
        .unwrap()
    }

    async fn harness(
        broker_positions: Vec<BrokerPosition>,
    ) -> (Arc<SqliteStore>, PositionRegistry, Reconciler) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();
        let reconciler = Reconciler::new(
            Arc::new(FakeBroker {
                positions: broker_positions,
            }),
            Arc::clone(&store),
        );
        (store, registry, reconciler)
    }

    #[tokio::test]
    async fn broker_only_position_is_adopted() {
        let (store, mut registry, reconciler) =
            harness(vec![broker_long("BTC/USD", dec!(0.5), dec!(50000))]).await;

        let report = reconciler.reconcile(&mut registry).await.unwrap();
        assert_eq!(report.adopted, vec!["BTC/USD".to_string()]);
        assert!(report.stale_closed.is_empty());

        let adopted = registry.get("BTC/USD").unwrap();
        assert_eq!(adopted.strategy_name, EXTERNAL_STRATEGY);
        assert_eq!(adopted.quantity, dec!(0.5));
        assert!(adopted.id.starts_with("ext_"));

        let log = store.reconciliation_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "adopted");
    }

    #[tokio::test]
    async fn registry_only_position_is_stale_closed() {
        let (store, mut registry, reconciler) = harness(vec![]).await;
        registry.open(local_long("ETH/USD")).await.unwrap();

        let report = reconciler.reconcile(&mut registry).await.unwrap();
        assert_eq!(report.stale_closed, vec!["ETH/USD".to_string()]);
        assert!(!registry.has_position("ETH/USD"));

        // Closed at entry price with an explicit reconciliation reason
        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_price, dec!(100));
        assert!(trades[0].exit_reason.contains("not found on exchange"));
    }

    #[tokio::test]
    async fn matched_position_is_untouched() {
        let (_store, mut registry, reconciler) =
            harness(vec![broker_long("BTC/USD", dec!(1), dec!(100))]).await;
        let local = local_long("BTC/USD");
        let local_id = local.id.clone();
        registry.open(local).await.unwrap();

        let report = reconciler.reconcile(&mut registry).await.unwrap();
        assert_eq!(report.matched, vec!["BTC/USD".to_string()]);
        assert!(report.adopted.is_empty());
        assert!(report.stale_closed.is_empty());

        // Same position object, not re-created
        assert_eq!(registry.get("BTC/USD").unwrap().id, local_id);
    }

    #[tokio::test]
    async fn mixed_diff_handles_all_three_cases() {
        let (_store, mut registry, reconciler) =
            harness(vec![
                broker_long("BTC/USD", dec!(0.5), dec!(50000)),
                broker_long("SOL/USD", dec!(10), dec!(150)),
            ])
            .await;
        registry.open(local_long("ETH/USD")).await.unwrap();
        registry.open(local_long("SOL/USD")).await.unwrap();

        let report = reconciler.reconcile(&mut registry).await.unwrap();
        assert_eq!(report.adopted, vec!["BTC/USD".to_string()]);
        assert_eq!(report.stale_closed, vec!["ETH/USD".to_string()]);
        assert_eq!(report.matched, vec!["SOL/USD".to_string()]);
    }
}
