use crate::error::{MarlinError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candle with strict validation.
///
/// Immutable once constructed; all prices are `Decimal` for precision and
/// timestamps carry an explicit UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Build a candle, validating price relationships and pair format.
    pub fn new(
        pair: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self> {
        let pair = pair.into();

        if !pair.contains('/') {
            return Err(MarlinError::InvalidMarketData(format!(
                "Pair must be in format 'BASE/QUOTE', got: {pair}"
            )));
        }

        if open <= Decimal::ZERO
            || high <= Decimal::ZERO
            || low <= Decimal::ZERO
            || close <= Decimal::ZERO
        {
            return Err(MarlinError::InvalidMarketData(
                "All prices must be positive".to_string(),
            ));
        }

        if volume < Decimal::ZERO {
            return Err(MarlinError::InvalidMarketData(
                "Volume cannot be negative".to_string(),
            ));
        }

        if high < low {
            return Err(MarlinError::InvalidMarketData(format!(
                "High ({high}) cannot be less than low ({low})"
            )));
        }

        if high < open || high < close {
            return Err(MarlinError::InvalidMarketData(format!(
                "High ({high}) must be >= open ({open}) and close ({close})"
            )));
        }

        if low > open || low > close {
            return Err(MarlinError::InvalidMarketData(format!(
                "Low ({low}) must be <= open ({open}) and close ({close})"
            )));
        }

        Ok(Self {
            pair,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}
