//! Paper execution: simulated fills against the durable account ledger.
//!
//! No real orders. Entries deduct the full notional from cash up front and
//! never partially fill; exits credit the notional back plus realized P&L.

use crate::domain::position::NewPosition;
use crate::domain::{Direction, Position, Signal, SignalKind};
use crate::error::{MarlinError, Result};
use crate::execution::ExecutionAdapter;
use crate::store::SqliteStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PaperExecution {
    store: Arc<SqliteStore>,
    initial_balance: Decimal,
}

impl PaperExecution {
    /// Create the adapter, seeding the account ledger on first run.
    pub async fn new(store: Arc<SqliteStore>, initial_balance: Decimal) -> Result<Self> {
        if store.get_account_state().await?.is_none() {
            store
                .save_account_state(initial_balance, initial_balance)
                .await?;
            info!("Paper account initialized with {initial_balance}");
        }

        Ok(Self {
            store,
            initial_balance,
        })
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecution {
    async fn account_value(&self) -> Result<Decimal> {
        Ok(self
            .store
            .get_account_state()
            .await?
            .map(|s| s.equity)
            .unwrap_or(self.initial_balance))
    }

    async fn cash_balance(&self) -> Result<Decimal> {
        Ok(self
            .store
            .get_account_state()
            .await?
            .map(|s| s.cash)
            .unwrap_or(self.initial_balance))
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

        let notional = price * quantity;
        let cash = self.cash_balance().await?;

        if cash < notional {
            return Err(MarlinError::InsufficientFunds {
                have: cash,
                need: notional,
            });
        }

        // Entry time is the actual fill time, not the signal timestamp
        let position = Position::open(NewPosition {
            pair: signal.pair.clone(),
            direction,
            entry_price: price,
            quantity,
            entry_time: Utc::now(),
            strategy_name: signal.strategy_name.clone(),
            stop_loss_price: signal.stop_loss_price,
            take_profit_price: signal.take_profit_price,
            signal_id: None,
        })?;

        let equity = self.account_value().await?;
        self.store
            .save_account_state(cash - notional, equity)
            .await?;

        debug!(
            "Paper entry: {} {} @ {} qty {} (cash {} -> {})",
            position.pair,
            direction,
            price,
            quantity,
            cash,
            cash - notional
        );
        Ok(position)
    }

    async fn execute_exit(&self, position: &Position, price: Decimal) -> Result<Position> {
        let pnl = position.unrealized_pnl(price)?;

        let cash = self.cash_balance().await?;
        let equity = self.account_value().await?;

        // Credit back the original notional plus realized P&L
        let new_cash = cash + position.entry_notional() + pnl;
        let new_equity = equity + pnl;

        self.store.save_account_state(new_cash, new_equity).await?;

        debug!(
            "Paper exit: {} @ {} P&L {} (cash {} -> {})",
            position.pair, price, pnl, cash, new_cash
        );
        Ok(position.clone())
    }

    async fn update_equity(&self, unrealized_pnl: Decimal) -> Result<()> {
        let cash = self.cash_balance().await?;
        self.store
            .save_account_state(cash, cash + unrealized_pnl)
            .await?;
        Ok(())
    }
}
