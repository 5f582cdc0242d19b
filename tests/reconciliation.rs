//! Startup reconciliation against a scripted broker: broker-only positions
//! are adopted under the EXTERNAL strategy, local-only positions are closed
//! as stale, and matched positions are left alone.

use async_trait::async_trait;
use chrono::Utc;
use marlin::broker::{BrokerAccount, BrokerClient, BrokerOrder, BrokerPosition, OrderSide};
use marlin::domain::{Direction, NewPosition, Position};
use marlin::engine::{PositionRegistry, Reconciler, EXTERNAL_STRATEGY};
use marlin::error::Result;
use marlin::store::SqliteStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct ScriptedBroker {
    positions: Vec<BrokerPosition>,
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn get_account(&self) -> Result<BrokerAccount> {
        Ok(BrokerAccount {
            cash: dec!(10000),
            equity: dec!(10000),
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

fn broker_position(pair: &str, direction: Direction, qty: Decimal) -> BrokerPosition {
    BrokerPosition {
        pair: pair.to_string(),
        quantity: qty,
        direction,
        entry_price: dec!(50000),
        current_price: dec!(50500),
        unrealized_pnl: dec!(250),
    }
}

fn local_position(pair: &str) -> Position {
    Position::open(NewPosition {
        pair: pair.to_string(),
        direction: Direction::Long,
        entry_price: dec!(2000),
        quantity: dec!(1),
        entry_time: Utc::now(),
        strategy_name: "momentum".to_string(),
        stop_loss_price: None,
        take_profit_price: None,
        signal_id: None,
    })
    .unwrap()
}

#[tokio::test]
async fn startup_reconciliation_resolves_broker_drift() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();

    // Local book: ETH only. Broker book: BTC only.
    registry.open(local_position("ETH/USD")).await.unwrap();

    let broker = Arc::new(ScriptedBroker {
        positions: vec![broker_position("BTC/USD", Direction::Long, dec!(0.5))],
    });
    let reconciler = Reconciler::new(broker, Arc::clone(&store));

    let report = reconciler.reconcile(&mut registry).await.unwrap();

    // Broker-only BTC adopted with the EXTERNAL strategy marker
    assert_eq!(report.adopted, vec!["BTC/USD".to_string()]);
    let adopted = registry.get("BTC/USD").unwrap();
    assert_eq!(adopted.strategy_name, EXTERNAL_STRATEGY);
    assert_eq!(adopted.quantity, dec!(0.5));
    assert_eq!(adopted.direction, Direction::Long);

    // Local-only ETH stale-closed with a reconciliation reason
    assert_eq!(report.stale_closed, vec!["ETH/USD".to_string()]);
    assert!(!registry.has_position("ETH/USD"));
    let trades = store.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert!(trades[0].exit_reason.contains("not found on exchange"));
    assert_eq!(trades[0].exit_price, dec!(2000));

    // Both actions are in the audit log, separate from the trades table
    let log = store.reconciliation_log().await.unwrap();
    let actions: Vec<&str> = log.iter().map(|(action, _, _)| action.as_str()).collect();
    assert!(actions.contains(&"adopted"));
    assert!(actions.contains(&"stale_closed"));
}

#[tokio::test]
async fn adopted_positions_face_normal_risk_rules() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();

    let broker = Arc::new(ScriptedBroker {
        positions: vec![broker_position("BTC/USD", Direction::Short, dec!(0.25))],
    });
    let reconciler = Reconciler::new(broker, Arc::clone(&store));
    reconciler.reconcile(&mut registry).await.unwrap();

    // The adopted short occupies the pair like any other position: a second
    // open for the same pair is an invariant violation.
    let result = registry.open(local_position("BTC/USD")).await;
    assert!(result.is_err());

    // And it can be closed through the normal registry path
    let closed = registry
        .close("BTC/USD", dec!(49000), Decimal::ZERO, "manual close")
        .await
        .unwrap();
    // Short closed below entry is a profit
    assert_eq!(closed.realized_pnl().unwrap(), dec!(250));
}

#[tokio::test]
async fn repeated_runs_are_stable() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut registry = PositionRegistry::load(Arc::clone(&store)).await.unwrap();

    let broker = Arc::new(ScriptedBroker {
        positions: vec![broker_position("BTC/USD", Direction::Long, dec!(1))],
    });
    let reconciler = Reconciler::new(broker, Arc::clone(&store));

    let first = reconciler.reconcile(&mut registry).await.unwrap();
    assert_eq!(first.adopted.len(), 1);

    // Second pass: the adopted position now matches the broker, nothing to do
    let second = reconciler.reconcile(&mut registry).await.unwrap();
    assert!(second.adopted.is_empty());
    assert!(second.stale_closed.is_empty());
    assert_eq!(second.matched, vec!["BTC/USD".to_string()]);
}
