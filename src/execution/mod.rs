//! Order execution behind one contract: simulated fills against a durable
//! ledger, or live fills delegated to the broker.

mod live;
mod paper;

pub use live::LiveExecution;
pub use paper::PaperExecution;

use crate::domain::{Position, Signal};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Capability set the orchestrator trades through. Both variants create the
/// local [`Position`] on entry so the rest of the core is agnostic to which
/// one is active.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Current account equity.
    async fn account_value(&self) -> Result<Decimal>;

    /// Available cash.
    async fn cash_balance(&self) -> Result<Decimal>;

    /// Fill an entry at the given price and size, producing the new position.
    async fn execute_entry(
        &self,
        signal: &Signal,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<Position>;

    /// Fill the exit for an open position. The lifecycle transition itself
    /// happens in the registry; this settles the fill.
    async fn execute_exit(&self, position: &Position, price: Decimal) -> Result<Position>;

    /// Mark open-position P&L into account equity.
    async fn update_equity(&self, unrealized_pnl: Decimal) -> Result<()>;
}
