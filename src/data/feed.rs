use crate::domain::Candle;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of recent candle history, keyed by pair.
///
/// Implementations must return candles ordered oldest first with strictly
/// increasing timestamps. Pairs with no data are simply absent from the map.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn fetch_recent(
        &self,
        pairs: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<Candle>>>;
}

/// Fixed in-memory feed serving pre-loaded history. Used by tests and as a
/// building block for backtest replays.
pub struct ReplayFeed {
    candles_by_pair: HashMap<String, Vec<Candle>>,
}

impl ReplayFeed {
    pub fn new(candles_by_pair: HashMap<String, Vec<Candle>>) -> Self {
        Self { candles_by_pair }
    }
}

#[async_trait]
impl CandleFeed for ReplayFeed {
    async fn fetch_recent(
        &self,
        pairs: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<Candle>>> {
        let mut out = HashMap::new();
        for pair in pairs {
            if let Some(candles) = self.candles_by_pair.get(pair) {
                let start = candles.len().saturating_sub(limit);
                out.insert(pair.clone(), candles[start..].to_vec());
            }
        }
        Ok(out)
    }
}
