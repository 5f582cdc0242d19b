//! Strategy collaborators.
//!
//! The engine never inspects strategy internals: a strategy is anything that
//! can turn a candle window into an entry signal, with an optional exit hook
//! for positions it owns. Implementations live outside the core and are
//! wired in through the registry in configured order.

pub mod momentum;

pub use momentum::MomentumStrategy;

use crate::domain::{Candle, ExitSignal, Position, Signal};
use crate::error::{MarlinError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;

pub trait Strategy: Send + Sync {
    /// Stable name, used for position attribution and exit dispatch.
    fn name(&self) -> &str;

    /// Analyze a candle window (oldest first) and propose an entry, or None.
    fn analyze(&self, candles: &[Candle]) -> Option<Signal>;

    /// Strategy-specific exit logic for a position this strategy opened.
    /// Runs before the generic risk rules. Default: no opinion.
    fn should_exit(
        &self,
        _position: &Position,
        _candles: &[Candle],
        _current_price: Decimal,
    ) -> Option<ExitSignal> {
        None
    }
}

/// Ordered set of enabled strategies.
///
/// Order is fixed at construction and determines entry priority: per pair
/// per tick, the first strategy that returns a signal acts and the rest are
/// not consulted.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn in_order(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Build the registry from configured strategy names, preserving order.
pub fn build_registry(names: &[String]) -> Result<StrategyRegistry> {
    let mut strategies: Vec<Arc<dyn Strategy>> = Vec::with_capacity(names.len());

    for name in names {
        match name.as_str() {
            "momentum" => strategies.push(Arc::new(MomentumStrategy::default())),
            other => {
                return Err(MarlinError::Validation(format!(
                    "Unknown strategy '{other}' (available: momentum)"
                )))
            }
        }
    }

    Ok(StrategyRegistry::new(strategies))
}
