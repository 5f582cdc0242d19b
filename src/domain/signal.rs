use crate::error::{MarlinError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal kinds are entry-only.
///
/// Strategies do not generate standalone exit signals; exits go through the
/// risk policy or the strategy's `should_exit` hook on an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EntryLong,
    EntryShort,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::EntryLong => write!(f, "entry_long"),
            SignalKind::EntryShort => write!(f, "entry_short"),
        }
    }
}

/// Trading signal from strategy analysis.
///
/// Immutable once constructed. Represents a potential trade opportunity;
/// whether it becomes a position is the risk policy's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub kind: SignalKind,
    /// 0.0 to 1.0
    pub strength: Decimal,
    pub strategy_name: String,
    pub reasoning: String,
    /// From the triggering candle, for reference only
    pub timestamp: DateTime<Utc>,
    /// Indicator values at signal time (RSI, EMA, etc.)
    pub indicators: BTreeMap<String, Decimal>,
    /// Optional per-signal stop loss, overrides the generic percentage rule
    pub stop_loss_price: Option<Decimal>,
    /// Optional per-signal take profit, overrides the generic percentage rule
    pub take_profit_price: Option<Decimal>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: impl Into<String>,
        kind: SignalKind,
        strength: Decimal,
        strategy_name: impl Into<String>,
        reasoning: impl Into<String>,
        timestamp: DateTime<Utc>,
        indicators: BTreeMap<String, Decimal>,
        stop_loss_price: Option<Decimal>,
        take_profit_price: Option<Decimal>,
    ) -> Result<Self> {
        let pair = pair.into();
        let reasoning = reasoning.into();

        if strength < Decimal::ZERO || strength > Decimal::ONE {
            return Err(MarlinError::Validation(format!(
                "Signal strength must be between 0 and 1, got: {strength}"
            )));
        }

        if !pair.contains('/') {
            return Err(MarlinError::Validation(format!(
                "Pair must be in format 'BASE/QUOTE', got: {pair}"
            )));
        }

        if reasoning.trim().is_empty() {
            return Err(MarlinError::Validation(
                "Signal must include reasoning".to_string(),
            ));
        }

        if let Some(stop) = stop_loss_price {
            if stop <= Decimal::ZERO {
                return Err(MarlinError::Validation(
                    "stop_loss_price must be positive".to_string(),
                ));
            }
        }

        if let Some(target) = take_profit_price {
            if target <= Decimal::ZERO {
                return Err(MarlinError::Validation(
                    "take_profit_price must be positive".to_string(),
                ));
            }
        }

        Ok(Self {
            pair,
            kind,
            strength,
            strategy_name: strategy_name.into(),
            reasoning,
            timestamp,
            indicators,
            stop_loss_price,
            take_profit_price,
        })
    }

    pub fn is_long(&self) -> bool {
        self.kind == SignalKind::EntryLong
    }

    pub fn is_short(&self) -> bool {
        self.kind == SignalKind::EntryShort
    }
}

/// Strategy-specific request to close an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ExitSignal {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make(strength: Decimal, reasoning: &str) -> Result<Signal> {
        Signal::new(
            "BTC/USD",
            SignalKind::EntryLong,
            strength,
            "test_strategy",
            reasoning,
            Utc::now(),
            BTreeMap::new(),
            None,
            None,
        )
    }

    #[test]
    fn strength_bounds_enforced() {
        assert!(make(dec!(0), "ok").is_ok());
        assert!(make(dec!(1), "ok").is_ok());
        assert!(make(dec!(1.01), "ok").is_err());
        assert!(make(dec!(-0.1), "ok").is_err());
    }

    #[test]
    fn reasoning_required() {
        assert!(make(dec!(0.8), "").is_err());
        assert!(make(dec!(0.8), "   ").is_err());
    }

    #[test]
    fn per_signal_levels_must_be_positive() {
        let signal = Signal::new(
            "BTC/USD",
            SignalKind::EntryLong,
            dec!(0.8),
            "test_strategy",
            "breakout",
            Utc::now(),
            BTreeMap::new(),
            Some(dec!(0)),
            None,
        );
        assert!(signal.is_err());
    }

    #[test]
    fn kind_predicates() {
        let signal = make(dec!(0.8), "breakout").unwrap();
        assert!(signal.is_long());
        assert!(!signal.is_short());
    }
}
