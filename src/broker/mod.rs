//! Broker integration: the client contract the core trades against, plus
//! retry/rate-limit plumbing and the Alpaca REST connector.
//!
//! Read paths (account, positions, candles) are retried with bounded
//! backoff. Order placement is never blindly retried: a retried market
//! order risks a double fill, so a failed execution call surfaces and the
//! tick's action is skipped.

pub mod alpaca;
pub mod rate_limit;
pub mod retry;

pub use alpaca::AlpacaBroker;
pub use rate_limit::RateLimiter;
pub use retry::{with_retry, Backoff};

use crate::domain::Direction;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side for market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    /// Side that opens a position in the given direction.
    pub fn to_open(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that closes a position in the given direction.
    pub fn to_close(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

/// Account snapshot reported by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAccount {
    pub cash: Decimal,
    pub equity: Decimal,
}

/// Open position as the broker reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub pair: String,
    pub quantity: Decimal,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Result of a placed market order.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub id: String,
    pub status: String,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// The broker capability set the core depends on. Implementations own all
/// vendor specifics; the engine never sees a raw HTTP response.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<BrokerAccount>;

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Place a market order. Returns None when the broker acknowledged the
    /// request but produced no order (e.g., rejected for size).
    async fn place_market_order(
        &self,
        pair: &str,
        quantity: Decimal,
        side: OrderSide,
    ) -> Result<Option<BrokerOrder>>;

    /// Close the full position for a pair. Returns false if the broker had
    /// nothing to close.
    async fn close_position(&self, pair: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_sides_for_directions() {
        assert_eq!(OrderSide::to_open(Direction::Long), OrderSide::Buy);
        assert_eq!(OrderSide::to_open(Direction::Short), OrderSide::Sell);
        assert_eq!(OrderSide::to_close(Direction::Long), OrderSide::Sell);
        assert_eq!(OrderSide::to_close(Direction::Short), OrderSide::Buy);
    }
}
