use crate::domain::{Direction, Position};
use crate::error::{MarlinError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Append-only record of a completed round trip.
///
/// Created exactly once, when a position closes. `pnl` is net of fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub pair: String,
    pub strategy_name: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub quantity: Decimal,
    /// Realized P&L net of fees
    pub pnl: Decimal,
    pub fees: Decimal,
    pub exit_reason: String,
}

impl Trade {
    /// Derive the trade record from a closed position.
    pub fn from_closed(position: &Position, fees: Decimal) -> Result<Self> {
        let gross = position.realized_pnl()?;
        let exit_price = position.exit_price.ok_or_else(|| {
            MarlinError::InvariantViolation("closed position missing exit_price".to_string())
        })?;
        let exit_time = position.exit_time.ok_or_else(|| {
            MarlinError::InvariantViolation("closed position missing exit_time".to_string())
        })?;

        Ok(Self {
            id: position.id.clone(),
            pair: position.pair.clone(),
            strategy_name: position.strategy_name.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time,
            quantity: position.quantity,
            pnl: gross - fees,
            fees,
            exit_reason: position.exit_reason.clone(),
        })
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}
