use crate::config::RiskConfig;
use crate::domain::{Direction, Position, Signal};
use crate::error::Rejection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Risk policy: decides whether a signal becomes a trade, how large it is,
/// and when an open position must exit.
///
/// Stateless except for the trailing-stop high-water marks, which are keyed
/// by position id and must be cleared when a position closes.
pub struct RiskPolicy {
    config: RiskConfig,
    /// Best price seen since entry, per open position id.
    /// Longs track the maximum, shorts the minimum.
    high_water: HashMap<String, Decimal>,
}

impl RiskPolicy {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            high_water: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Admission check for a new entry.
    ///
    /// Rules run in order, first failure wins:
    /// 1. no second concurrent position per pair
    /// 2. open count below the configured maximum
    /// 3. signal strength at or above the configured floor
    pub fn can_open(
        &self,
        signal: &Signal,
        open_count: usize,
        has_position_for_pair: bool,
    ) -> Result<(), Rejection> {
        if has_position_for_pair {
            return Err(Rejection::DuplicatePosition {
                pair: signal.pair.clone(),
            });
        }

        if open_count >= self.config.max_positions {
            return Err(Rejection::MaxPositionsReached {
                max: self.config.max_positions,
            });
        }

        if signal.strength < self.config.min_signal_strength {
            return Err(Rejection::StrengthBelowFloor {
                strength: signal.strength,
                floor: self.config.min_signal_strength,
            });
        }

        Ok(())
    }

    /// Position size in base currency: a fixed fraction of account value
    /// divided by the entry price. Pure function.
    pub fn size_position(&self, account_value: Decimal, entry_price: Decimal) -> Decimal {
        account_value * self.config.max_position_size_pct / entry_price
    }

    /// Advance the trailing-stop high-water mark for a position.
    ///
    /// Must run every tick before [`RiskPolicy::should_close`], otherwise the
    /// trailing check sees a stale mark.
    pub fn update_high_water(&mut self, position: &Position, price: Decimal) {
        let mark = self
            .high_water
            .entry(position.id.clone())
            .or_insert(position.entry_price);

        match position.direction {
            Direction::Long => {
                if price > *mark {
                    *mark = price;
                }
            }
            Direction::Short => {
                if price < *mark {
                    *mark = price;
                }
            }
        }
    }

    /// Drop per-position trailing state once the position is closed.
    pub fn clear_position_state(&mut self, position_id: &str) {
        self.high_water.remove(position_id);
    }

    /// Evaluate exit conditions for an open position, in strict priority
    /// order: per-signal price overrides, then the trailing stop, then the
    /// generic percentage rules. All threshold comparisons are inclusive, so
    /// a price exactly at a level triggers the exit.
    ///
    /// Returns the close reason, or None to hold.
    pub fn should_close(&self, position: &Position, current_price: Decimal) -> Option<String> {
        if !position.is_open() {
            return None;
        }

        // 1. Per-signal stop/take-profit levels override the generic rules
        if let Some(reason) = self.check_signal_levels(position, current_price) {
            return Some(reason);
        }

        // 2. Trailing stop against the high-water mark
        if let Some(reason) = self.check_trailing_stop(position, current_price) {
            return Some(reason);
        }

        // 3. Generic percentage stop loss / take profit against entry
        self.check_percentage_levels(position, current_price)
    }

    fn check_signal_levels(&self, position: &Position, price: Decimal) -> Option<String> {
        if let Some(stop) = position.stop_loss_price {
            let hit = match position.direction {
                Direction::Long => price <= stop,
                Direction::Short => price >= stop,
            };
            if hit {
                return Some(format!("Signal stop loss hit at {price} (level {stop})"));
            }
        }

        if let Some(target) = position.take_profit_price {
            let hit = match position.direction {
                Direction::Long => price >= target,
                Direction::Short => price <= target,
            };
            if hit {
                return Some(format!(
                    "Signal take profit hit at {price} (level {target})"
                ));
            }
        }

        None
    }

    fn check_trailing_stop(&self, position: &Position, price: Decimal) -> Option<String> {
        let trailing_pct = self.config.trailing_stop_pct?;
        let mark = *self.high_water.get(&position.id)?;

        let (threshold, hit) = match position.direction {
            Direction::Long => {
                let threshold = mark * (Decimal::ONE - trailing_pct);
                (threshold, price <= threshold)
            }
            Direction::Short => {
                let threshold = mark * (Decimal::ONE + trailing_pct);
                (threshold, price >= threshold)
            }
        };

        if hit {
            debug!(
                "Trailing stop for {}: mark {} threshold {} price {}",
                position.id, mark, threshold, price
            );
            return Some(format!(
                "Trailing stop hit: retraced {:.2}% from {mark}",
                trailing_pct * Decimal::ONE_HUNDRED
            ));
        }

        None
    }

    fn check_percentage_levels(&self, position: &Position, price: Decimal) -> Option<String> {
        let pnl_pct = position.unrealized_pnl_pct(price).ok()?;

        if pnl_pct <= -self.config.stop_loss_pct * Decimal::ONE_HUNDRED {
            return Some(format!("Stop loss hit: {pnl_pct:.2}%"));
        }

        if pnl_pct >= self.config.take_profit_pct * Decimal::ONE_HUNDRED {
            return Some(format!("Take profit hit: {pnl_pct:.2}%"));
        }

        None
    }
}
