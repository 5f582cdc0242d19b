//! Alpaca REST connector for crypto trading and market data.
//!
//! Implements [`BrokerClient`] against the trading API (paper or live host)
//! and [`CandleFeed`] against the crypto data API. Crypto order symbols keep
//! the "BASE/QUOTE" slash format; position symbols come back flattened
//! ("ETHUSD") and are normalized to pair format.

use crate::broker::{BrokerAccount, BrokerClient, BrokerOrder, BrokerPosition, OrderSide};
use crate::data::CandleFeed;
use crate::domain::{Candle, Direction};
use crate::error::{MarlinError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

const LIVE_URL: &str = "https://api.alpaca.markets";
const PAPER_URL: &str = "https://paper-api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";

pub struct AlpacaBroker {
    client: reqwest::Client,
    base_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
    timeframe: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: String,
    equity: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    side: String,
    avg_entry_price: String,
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    unrealized_pl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: HashMap<String, Vec<Bar>>,
}

#[derive(Debug, Deserialize)]
struct Bar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl AlpacaBroker {
    /// Build a connector against the paper or live trading host.
    pub fn new(api_key: &str, secret_key: &str, paper: bool, timeframe: &str) -> Result<Self> {
        if api_key.is_empty() || secret_key.is_empty() {
            return Err(MarlinError::Validation(
                "ALPACA_API_KEY and ALPACA_SECRET_KEY are required".to_string(),
            ));
        }

        let base_url = if paper { PAPER_URL } else { LIVE_URL };
        info!("Alpaca connector initialized (paper={paper})");

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            data_url: DATA_URL.to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            timeframe: alpaca_timeframe(timeframe)?.to_string(),
        })
    }

    /// Point the connector at custom hosts (tests).
    pub fn with_urls(mut self, base_url: &str, data_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self.data_url = data_url.to_string();
        self
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Verify credentials and account status.
    pub async fn check_connection(&self) -> Result<()> {
        let account: AccountResponse = self
            .get(format!("{}/v2/account", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Connected to Alpaca, account status: {}", account.status);
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for AlpacaBroker {
    async fn get_account(&self) -> Result<BrokerAccount> {
        let account: AccountResponse = self
            .get(format!("{}/v2/account", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(BrokerAccount {
            cash: parse_decimal_field("cash", &account.cash)?,
            equity: parse_decimal_field("equity", &account.equity)?,
        })
    }

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>> {
        let raw: Vec<PositionResponse> = self
            .get(format!("{}/v2/positions", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut positions = Vec::with_capacity(raw.len());
        for pos in raw {
            let quantity = parse_decimal_field("qty", &pos.qty)?;
            let direction = if pos.side == "short" || quantity < Decimal::ZERO {
                Direction::Short
            } else {
                Direction::Long
            };

            positions.push(BrokerPosition {
                pair: pair_from_symbol(&pos.symbol),
                quantity: quantity.abs(),
                direction,
                entry_price: parse_decimal_field("avg_entry_price", &pos.avg_entry_price)?,
                current_price: pos
                    .current_price
                    .as_deref()
                    .map(|p| parse_decimal_field("current_price", p))
                    .transpose()?
                    .unwrap_or(Decimal::ZERO),
                unrealized_pnl: pos
                    .unrealized_pl
                    .as_deref()
                    .map(|p| parse_decimal_field("unrealized_pl", p))
                    .transpose()?
                    .unwrap_or(Decimal::ZERO),
            });
        }

        debug!("Fetched {} broker positions", positions.len());
        Ok(positions)
    }

    async fn place_market_order(
        &self,
        pair: &str,
        quantity: Decimal,
        side: OrderSide,
    ) -> Result<Option<BrokerOrder>> {
        let body = json!({
            "symbol": pair,
            "qty": quantity.to_string(),
            "side": side.as_str(),
            "type": "market",
            "time_in_force": "gtc",
        });

        let response = self
            .client
            .post(format!("{}/v2/orders", self.base_url))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let detail = response.text().await.unwrap_or_default();
            warn!("Order rejected for {pair}: {detail}");
            return Ok(None);
        }

        let order: OrderResponse = response.error_for_status()?.json().await?;
        info!(
            "Market order placed: {} {} {} (order_id={})",
            side.as_str(),
            quantity,
            pair,
            order.id
        );

        Ok(Some(BrokerOrder {
            id: order.id,
            status: order.status,
            filled_qty: order
                .filled_qty
                .as_deref()
                .map(|q| parse_decimal_field("filled_qty", q))
                .transpose()?
                .unwrap_or(Decimal::ZERO),
            filled_avg_price: order
                .filled_avg_price
                .as_deref()
                .map(|p| parse_decimal_field("filled_avg_price", p))
                .transpose()?,
            filled_at: order.filled_at,
        }))
    }

    async fn close_position(&self, pair: &str) -> Result<bool> {
        let response = self
            .client
            .delete(format!("{}/v2/positions/{pair}", self.base_url))
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        response.error_for_status()?;
        info!("Closed broker position for {pair}");
        Ok(true)
    }
}

#[async_trait]
impl CandleFeed for AlpacaBroker {
    async fn fetch_recent(
        &self,
        pairs: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<Candle>>> {
        let symbols = pairs.join(",");
        let url = format!(
            "{}/v1beta3/crypto/us/bars?symbols={}&timeframe={}&limit={}",
            self.data_url,
            urlencode(&symbols),
            self.timeframe,
            limit
        );

        let response: BarsResponse = self
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut out = HashMap::new();
        for (symbol, bars) in response.bars {
            let mut candles = Vec::with_capacity(bars.len());
            for bar in bars {
                match bar_to_candle(&symbol, &bar) {
                    Ok(candle) => candles.push(candle),
                    Err(e) => warn!("Skipping bad bar for {symbol} at {}: {e}", bar.t),
                }
            }
            candles.sort_by_key(|c| c.timestamp);
            out.insert(symbol, candles);
        }

        debug!("Fetched candles for {} pairs", out.len());
        Ok(out)
    }
}

fn bar_to_candle(pair: &str, bar: &Bar) -> Result<Candle> {
    let decimal = |label: &str, value: f64| -> Result<Decimal> {
        Decimal::from_f64(value).ok_or_else(|| {
            MarlinError::InvalidMarketData(format!("bar {label} is not a valid decimal: {value}"))
        })
    };

    Candle::new(
        pair,
        bar.t,
        decimal("open", bar.o)?,
        decimal("high", bar.h)?,
        decimal("low", bar.l)?,
        decimal("close", bar.c)?,
        decimal("volume", bar.v)?,
    )
}

fn parse_decimal_field(label: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| MarlinError::InvalidMarketData(format!("invalid {label}: {raw} ({e})")))
}

/// Convert a flattened broker symbol ("ETHUSD") back to pair format
/// ("ETH/USD"). Symbols already in pair format pass through.
pub fn pair_from_symbol(symbol: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_string();
    }
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}/{quote}");
            }
        }
    }
    symbol.to_string()
}

fn alpaca_timeframe(timeframe: &str) -> Result<&'static str> {
    Ok(match timeframe {
        "1m" => "1Min",
        "5m" => "5Min",
        "15m" => "15Min",
        "30m" => "30Min",
        "1h" => "1Hour",
        "4h" => "4Hour",
        "1d" => "1Day",
        other => {
            return Err(MarlinError::Validation(format!(
                "Unsupported timeframe: {other}"
            )))
        }
    })
}

fn urlencode(raw: &str) -> String {
    raw.replace('/', "%2F").replace(',', "%2C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalization() {
        assert_eq!(pair_from_symbol("ETHUSD"), "ETH/USD");
        assert_eq!(pair_from_symbol("BTCUSDT"), "BTC/USDT");
        assert_eq!(pair_from_symbol("BTC/USD"), "BTC/USD");
        assert_eq!(pair_from_symbol("USD"), "USD");
    }

    #[test]
    fn timeframe_mapping() {
        assert_eq!(alpaca_timeframe("15m").unwrap(), "15Min");
        assert_eq!(alpaca_timeframe("1h").unwrap(), "1Hour");
        assert!(alpaca_timeframe("2h").is_err());
    }

    #[test]
    fn missing_credentials_rejected() {
        assert!(AlpacaBroker::new("", "", true, "15m").is_err());
    }
}
