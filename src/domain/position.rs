use crate::error::{MarlinError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = MarlinError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(MarlinError::Validation(format!(
                "invalid direction: {other}"
            ))),
        }
    }
}

/// Trading position with an explicit lifecycle.
///
/// Positions are created OPEN and transition to CLOSED exactly once, via
/// [`Position::close`], which returns a new value rather than mutating exit
/// fields in place. Entry time is captured at actual execution, not from
/// the signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pair: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub strategy_name: String,
    pub status: PositionStatus,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: String,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub signal_id: Option<i64>,
}

/// Inputs for opening a new position.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub pair: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub strategy_name: String,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub signal_id: Option<i64>,
}

impl Position {
    /// Open a new position with a generated id.
    pub fn open(params: NewPosition) -> Result<Self> {
        Self::open_with_id(short_id("pos"), params)
    }

    /// Open a new position with a caller-supplied id (reconciliation adopts
    /// external positions with an `ext_` prefix).
    pub fn open_with_id(id: String, params: NewPosition) -> Result<Self> {
        let position = Self {
            id,
            pair: params.pair,
            direction: params.direction,
            entry_price: params.entry_price,
            quantity: params.quantity,
            entry_time: params.entry_time,
            strategy_name: params.strategy_name,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_reason: String::new(),
            stop_loss_price: params.stop_loss_price,
            take_profit_price: params.take_profit_price,
            signal_id: params.signal_id,
        };
        position.validate()?;
        Ok(position)
    }

    /// Rehydrate a position from the durable store, re-checking invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: String,
        pair: String,
        direction: Direction,
        entry_price: Decimal,
        quantity: Decimal,
        entry_time: DateTime<Utc>,
        strategy_name: String,
        status: PositionStatus,
        exit_price: Option<Decimal>,
        exit_time: Option<DateTime<Utc>>,
        exit_reason: String,
        stop_loss_price: Option<Decimal>,
        take_profit_price: Option<Decimal>,
        signal_id: Option<i64>,
    ) -> Result<Self> {
        let position = Self {
            id,
            pair,
            direction,
            entry_price,
            quantity,
            entry_time,
            strategy_name,
            status,
            exit_price,
            exit_time,
            exit_reason,
            stop_loss_price,
            take_profit_price,
            signal_id,
        };
        position.validate()?;
        Ok(position)
    }

    fn validate(&self) -> Result<()> {
        if self.entry_price <= Decimal::ZERO {
            return Err(MarlinError::InvariantViolation(
                "entry_price must be positive".to_string(),
            ));
        }

        if self.quantity <= Decimal::ZERO {
            return Err(MarlinError::InvariantViolation(
                "quantity must be positive".to_string(),
            ));
        }

        if let Some(exit) = self.exit_price {
            if exit <= Decimal::ZERO {
                return Err(MarlinError::InvariantViolation(
                    "exit_price must be positive".to_string(),
                ));
            }
        }

        for (label, level) in [
            ("stop_loss_price", self.stop_loss_price),
            ("take_profit_price", self.take_profit_price),
        ] {
            if let Some(level) = level {
                if level <= Decimal::ZERO {
                    return Err(MarlinError::InvariantViolation(format!(
                        "{label} must be positive"
                    )));
                }
            }
        }

        match self.status {
            PositionStatus::Open => {
                if self.exit_price.is_some() || self.exit_time.is_some() {
                    return Err(MarlinError::InvariantViolation(
                        "Open position cannot have exit_time or exit_price".to_string(),
                    ));
                }
            }
            PositionStatus::Closed => {
                let (Some(_), Some(exit_time)) = (self.exit_price, self.exit_time) else {
                    return Err(MarlinError::InvariantViolation(
                        "Closed position must have exit_time and exit_price".to_string(),
                    ));
                };
                if exit_time < self.entry_time {
                    return Err(MarlinError::InvariantViolation(
                        "exit_time cannot be before entry_time".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Close the position, returning a new CLOSED value.
    ///
    /// Not idempotent by design: closing an already-closed position is an
    /// invariant violation and callers must guard with a registry lookup.
    pub fn close(&self, exit_price: Decimal, reason: impl Into<String>) -> Result<Self> {
        if self.status == PositionStatus::Closed {
            return Err(MarlinError::InvariantViolation(format!(
                "Position {} is already closed",
                self.id
            )));
        }

        let closed = Self {
            status: PositionStatus::Closed,
            exit_price: Some(exit_price),
            exit_time: Some(Utc::now()),
            exit_reason: reason.into(),
            ..self.clone()
        };
        closed.validate()?;
        Ok(closed)
    }

    /// Unrealized P&L at the given market price. Fails if CLOSED.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Result<Decimal> {
        if self.status == PositionStatus::Closed {
            return Err(MarlinError::InvariantViolation(
                "Cannot calculate unrealized P&L for closed position".to_string(),
            ));
        }

        Ok(match self.direction {
            Direction::Long => (current_price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - current_price) * self.quantity,
        })
    }

    /// Unrealized P&L as a percentage of entry value.
    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Result<Decimal> {
        let pnl = self.unrealized_pnl(current_price)?;
        let entry_value = self.entry_price * self.quantity;
        Ok(pnl / entry_value * Decimal::ONE_HUNDRED)
    }

    /// Realized P&L. Fails unless CLOSED.
    pub fn realized_pnl(&self) -> Result<Decimal> {
        if self.status != PositionStatus::Closed {
            return Err(MarlinError::InvariantViolation(
                "Cannot calculate realized P&L for open position".to_string(),
            ));
        }

        // validate() guarantees exit_price is present on CLOSED positions
        let exit_price = self.exit_price.ok_or_else(|| {
            MarlinError::InvariantViolation("closed position missing exit_price".to_string())
        })?;

        Ok(match self.direction {
            Direction::Long => (exit_price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - exit_price) * self.quantity,
        })
    }

    /// Realized P&L as a percentage of entry value.
    pub fn realized_pnl_pct(&self) -> Result<Decimal> {
        let pnl = self.realized_pnl()?;
        let entry_value = self.entry_price * self.quantity;
        Ok(pnl / entry_value * Decimal::ONE_HUNDRED)
    }

    /// Time between entry and exit. Fails unless CLOSED.
    pub fn duration(&self) -> Result<chrono::Duration> {
        let exit_time = self.exit_time.ok_or_else(|| {
            MarlinError::InvariantViolation(
                "Cannot calculate duration for open position".to_string(),
            )
        })?;
        Ok(exit_time - self.entry_time)
    }

    /// Notional value at entry.
    pub fn entry_notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

/// Short random id with a prefix, e.g. "pos_1a2b3c4d".
pub fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}
