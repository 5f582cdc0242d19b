use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Simulated account ledger, owned exclusively by the paper execution
/// adapter. Equity = cash + unrealized P&L of open positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub cash: Decimal,
    pub equity: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl AccountState {
    pub fn new(cash: Decimal, equity: Decimal) -> Self {
        Self {
            cash,
            equity,
            last_updated: Utc::now(),
        }
    }
}
