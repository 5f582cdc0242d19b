//! Momentum strategy: rate-of-change breakouts with a volume filter.
//!
//! Reference built-in so the bot runs out of the box; real deployments are
//! expected to wire their own [`Strategy`] implementations.

use crate::domain::{Candle, Signal, SignalKind};
use crate::strategy::Strategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

pub struct MomentumStrategy {
    name: String,
    /// Lookback for the rate-of-change calculation
    roc_period: usize,
    /// Absolute ROC that triggers an entry (e.g., 0.02 = 2%)
    entry_threshold: Decimal,
    /// Last-candle volume must exceed this multiple of the average
    volume_multiplier: Decimal,
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self {
            name: "momentum".to_string(),
            roc_period: 10,
            entry_threshold: dec!(0.02),
            volume_multiplier: dec!(1.5),
        }
    }
}

impl MomentumStrategy {
    pub fn new(roc_period: usize, entry_threshold: Decimal, volume_multiplier: Decimal) -> Self {
        Self {
            name: "momentum".to_string(),
            roc_period,
            entry_threshold,
            volume_multiplier,
        }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn analyze(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < self.roc_period + 1 {
            return None;
        }

        let last = candles.last()?;
        let reference = &candles[candles.len() - 1 - self.roc_period];
        if reference.close <= Decimal::ZERO {
            return None;
        }

        let roc = (last.close - reference.close) / reference.close;

        // Thrust must come on expanding volume
        let window = &candles[candles.len() - 1 - self.roc_period..candles.len() - 1];
        let avg_volume: Decimal =
            window.iter().map(|c| c.volume).sum::<Decimal>() / Decimal::from(window.len());
        if avg_volume > Decimal::ZERO && last.volume < avg_volume * self.volume_multiplier {
            return None;
        }

        let kind = if roc >= self.entry_threshold {
            SignalKind::EntryLong
        } else if roc <= -self.entry_threshold {
            SignalKind::EntryShort
        } else {
            return None;
        };

        // Strength scales with how far past the threshold the move went
        let strength = (roc.abs() / (self.entry_threshold * dec!(2))).min(Decimal::ONE);

        let mut indicators = BTreeMap::new();
        indicators.insert("roc".to_string(), roc);
        indicators.insert("avg_volume".to_string(), avg_volume);

        Signal::new(
            last.pair.clone(),
            kind,
            strength,
            self.name.clone(),
            format!(
                "{}-candle ROC {:.2}% breached {:.2}% threshold on {:.1}x volume",
                self.roc_period,
                roc * Decimal::ONE_HUNDRED,
                self.entry_threshold * Decimal::ONE_HUNDRED,
                if avg_volume > Decimal::ZERO {
                    last.volume / avg_volume
                } else {
                    Decimal::ZERO
                }
            ),
            last.timestamp,
            indicators,
            None,
            None,
        )
        .ok()
    }
}
