//! Live execution: fills delegated to the broker.
//!
//! On a successful order the adapter reconstructs a local position mirror
//! from the fill, so entry price and time come from the broker, not the
//! signal. Account reads retry with bounded backoff; order placement never
//! does: a retried market order risks a double fill.

use crate::broker::{with_retry, Backoff, BrokerClient, OrderSide};
use crate::domain::position::NewPosition;
use crate::domain::{Direction, Position, Signal, SignalKind};
use crate::error::{MarlinError, Result};
use crate::execution::ExecutionAdapter;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LiveExecution {
    broker: Arc<dyn BrokerClient>,
    max_retries: u8,
    retry_base_delay: Duration,
}

impl LiveExecution {
    pub fn new(broker: Arc<dyn BrokerClient>, max_retries: u8, retry_base_delay: Duration) -> Self {
        warn!("LIVE TRADING MODE ENABLED - real orders will be placed");
        Self {
            broker,
            max_retries,
            retry_base_delay,
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.max_retries, self.retry_base_delay)
    }
}

#[async_trait]
impl ExecutionAdapter for LiveExecution {
    async fn account_value(&self) -> Result<Decimal> {
        let account = with_retry("get_account", self.backoff(), || {
            self.broker.get_account()
        })
        .await?;
        Ok(account.equity)
    }

    async fn cash_balance(&self) -> Result<Decimal> {
        let account = with_retry("get_account", self.backoff(), || {
            self.broker.get_account()
        })
        .await?;
        Ok(account.cash)
    }

    async fn execute_entry(
        &self,
        signal: &Signal,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<Position> {
        let direction = match signal.kind {
            SignalKind::EntryLong => Direction::Long,
            SignalKind::EntryShort => Direction::Short,
        };

        // Single attempt, no retry
        let order = self
            .broker
            .place_market_order(&signal.pair, quantity, OrderSide::to_open(direction))
            .await?
            .ok_or_else(|| {
                MarlinError::OrderRejected(format!("broker produced no order for {}", signal.pair))
            })?;

        // Mirror the fill locally; the broker's numbers are authoritative
        let entry_price = order.filled_avg_price.unwrap_or(price);
        let entry_time = order.filled_at.unwrap_or_else(Utc::now);

        info!(
            "Live entry filled: {} {} @ {} (order_id={})",
            signal.pair, direction, entry_price, order.id
        );

        Position::open(NewPosition {
            pair: signal.pair.clone(),
            direction,
            entry_price,
            quantity,
            entry_time,
            strategy_name: signal.strategy_name.clone(),
            stop_loss_price: signal.stop_loss_price,
            take_profit_price: signal.take_profit_price,
            signal_id: None,
        })
    }

    async fn execute_exit(&self, position: &Position, price: Decimal) -> Result<Position> {
        // Single attempt, no retry
        let closed = self.broker.close_position(&position.pair).await?;

        if closed {
            info!(
                "Live exit: closed {} {} near {}",
                position.pair, position.direction, price
            );
        } else {
            // Already flat at the broker; the reconciler owns the cleanup of
            // whichever side is stale
            warn!(
                "Broker had no position to close for {}, settling locally",
                position.pair
            );
        }

        Ok(position.clone())
    }

    async fn update_equity(&self, _unrealized_pnl: Decimal) -> Result<()> {
        // The broker tracks equity for live accounts
        Ok(())
    }
}
