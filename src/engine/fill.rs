//! Fill model: slippage and commission for simulated executions.
//!
//! The orchestrator applies this before calling the execution adapter, so
//! the adapter only ever sees final fill prices. Buys fill above the
//! reference price, sells below it; commission is a percentage of notional
//! charged on both legs and subtracted from the closing P&L.

use crate::config::ExecutionConfig;
use crate::domain::Direction;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct FillModel {
    slippage_pct: Decimal,
    commission_pct: Decimal,
}

impl FillModel {
    pub fn new(slippage_pct: Decimal, commission_pct: Decimal) -> Self {
        Self {
            slippage_pct,
            commission_pct,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.slippage_pct, config.commission_pct)
    }

    /// Fill price when opening. Longs buy (pay up); shorts sell to open
    /// (receive less).
    pub fn entry_fill_price(&self, reference: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => reference * (Decimal::ONE + self.slippage_pct),
            Direction::Short => reference * (Decimal::ONE - self.slippage_pct),
        }
    }

    /// Fill price when closing. Longs sell; shorts buy back.
    pub fn exit_fill_price(&self, reference: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => reference * (Decimal::ONE - self.slippage_pct),
            Direction::Short => reference * (Decimal::ONE + self.slippage_pct),
        }
    }

    /// Commission for one leg.
    pub fn commission(&self, notional: Decimal) -> Decimal {
        notional * self.commission_pct
    }

    /// Total commission for both legs of a round trip.
    pub fn round_trip_fees(&self, entry_notional: Decimal, exit_notional: Decimal) -> Decimal {
        self.commission(entry_notional) + self.commission(exit_notional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_entry_pays_up() {
        let fill = FillModel::new(dec!(0.001), Decimal::ZERO);
        let price = fill.entry_fill_price(dec!(100), Direction::Long);
        assert_eq!(price, dec!(100.1));
        assert!(price >= dec!(100));
    }

    #[test]
    fn long_exit_receives_less() {
        let fill = FillModel::new(dec!(0.001), Decimal::ZERO);
        let price = fill.exit_fill_price(dec!(100), Direction::Long);
        assert_eq!(price, dec!(99.9));
        assert!(price <= dec!(100));
    }

    #[test]
    fn short_legs_are_mirrored() {
        let fill = FillModel::new(dec!(0.001), Decimal::ZERO);
        // Short entry sells: worse price is lower
        assert_eq!(fill.entry_fill_price(dec!(100), Direction::Short), dec!(99.9));
        // Short exit buys back: worse price is higher
        assert_eq!(fill.exit_fill_price(dec!(100), Direction::Short), dec!(100.1));
    }

    #[test]
    fn zero_slippage_fills_at_reference() {
        let fill = FillModel::new(Decimal::ZERO, Decimal::ZERO);
        assert_eq!(fill.entry_fill_price(dec!(100), Direction::Long), dec!(100));
        assert_eq!(fill.exit_fill_price(dec!(100), Direction::Short), dec!(100));
    }

    #[test]
    fn round_trip_fees_cover_both_legs() {
        let fill = FillModel::new(Decimal::ZERO, dec!(0.0004));
        let fees = fill.round_trip_fees(dec!(1000), dec!(1100));
        // 0.4 + 0.44
        assert_eq!(fees, dec!(0.8400));
    }
}
