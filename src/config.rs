use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub paper: PaperConfig,
    pub database: DatabaseConfig,
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Pairs to trade, in "BASE/QUOTE" format (e.g., "BTC/USD")
    pub pairs: Vec<String>,
    /// Candle timeframe (e.g., "15m")
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Seconds between live ticks
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: u64,
    /// Candles fetched per pair per tick (enough history for indicators)
    #[serde(default = "default_candle_history")]
    pub candle_history: usize,
    /// Run reconciliation every N live ticks
    #[serde(default = "default_reconcile_every")]
    pub reconcile_every: u64,
    /// Record one equity-curve sample every N backtest ticks
    #[serde(default = "default_equity_sample_stride")]
    pub equity_sample_stride: usize,
    /// Strategies to run, in priority order (first signal wins)
    pub strategies: Vec<String>,
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_loop_interval() -> u64 {
    60
}

fn default_candle_history() -> usize {
    200
}

fn default_reconcile_every() -> u64 {
    10
}

fn default_equity_sample_stride() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum concurrent open positions
    pub max_positions: usize,
    /// Fraction of account value per position (0, 1]
    pub max_position_size_pct: Decimal,
    /// Generic stop loss as fraction of entry (e.g., 0.02 = 2%)
    pub stop_loss_pct: Decimal,
    /// Generic take profit as fraction of entry (e.g., 0.05 = 5%)
    pub take_profit_pct: Decimal,
    /// Trailing stop retracement from the high-water mark, if enabled
    #[serde(default)]
    pub trailing_stop_pct: Option<Decimal>,
    /// Minimum signal strength to admit an entry
    #[serde(default)]
    pub min_signal_strength: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Simulated slippage as a fraction of price (e.g., 0.0005 = 5 bps)
    #[serde(default)]
    pub slippage_pct: Decimal,
    /// Commission as a fraction of notional, charged on both legs
    #[serde(default)]
    pub commission_pct: Decimal,
    /// Maximum retry attempts for broker/data reads
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Data read rate limit: max requests per sliding window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,
    /// Data read rate limit window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_rate_limit_requests() -> usize {
    120
}

fn default_rate_limit_window() -> u64 {
    60
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_pct: Decimal::ZERO,
            commission_pct: Decimal::ZERO,
            max_retries: 3,
            retry_base_delay_ms: 500,
            rate_limit_requests: 120,
            rate_limit_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    /// Paper trading on (true) or live broker execution (false)
    pub enabled: bool,
    /// Starting cash balance for the simulated account
    pub starting_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g., "sqlite://data/marlin.db")
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyConfig {
    /// Consecutive losing trades before the stop trips
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: usize,
    /// Daily realized loss fraction before the stop trips (e.g., 0.03 = 3%)
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,
}

fn default_max_consecutive_losses() -> usize {
    5
}

fn default_max_daily_loss_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Append logs to this file in addition to stdout
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MARLIN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MARLIN_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("MARLIN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.pairs.is_empty() {
            errors.push("trading.pairs must not be empty".to_string());
        }

        for pair in &self.trading.pairs {
            if !pair.contains('/') {
                errors.push(format!("pair '{pair}' must be in BASE/QUOTE format"));
            }
        }

        if self.trading.strategies.is_empty() {
            errors.push("trading.strategies must not be empty".to_string());
        }

        if self.trading.loop_interval_secs == 0 {
            errors.push("trading.loop_interval_secs must be at least 1".to_string());
        }

        if self.trading.reconcile_every == 0 {
            errors.push("trading.reconcile_every must be at least 1".to_string());
        }

        if self.trading.equity_sample_stride == 0 {
            errors.push("trading.equity_sample_stride must be at least 1".to_string());
        }

        if self.risk.max_positions == 0 {
            errors.push("risk.max_positions must be at least 1".to_string());
        }

        if self.risk.max_position_size_pct <= Decimal::ZERO
            || self.risk.max_position_size_pct > Decimal::ONE
        {
            errors.push("risk.max_position_size_pct must be in (0, 1]".to_string());
        }

        if self.risk.stop_loss_pct <= Decimal::ZERO {
            errors.push("risk.stop_loss_pct must be positive".to_string());
        }

        if self.risk.take_profit_pct <= Decimal::ZERO {
            errors.push("risk.take_profit_pct must be positive".to_string());
        }

        if let Some(trailing) = self.risk.trailing_stop_pct {
            if trailing <= Decimal::ZERO || trailing >= Decimal::ONE {
                errors.push("risk.trailing_stop_pct must be between 0 and 1".to_string());
            }
        }

        if self.execution.slippage_pct < Decimal::ZERO {
            errors.push("execution.slippage_pct cannot be negative".to_string());
        }

        if self.execution.commission_pct < Decimal::ZERO {
            errors.push("execution.commission_pct cannot be negative".to_string());
        }

        if self.paper.enabled && self.paper.starting_balance <= Decimal::ZERO {
            errors.push("paper.starting_balance must be positive".to_string());
        }

        if self.emergency.max_daily_loss_pct <= Decimal::ZERO {
            errors.push("emergency.max_daily_loss_pct must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_config() -> AppConfig {
        AppConfig {
            trading: TradingConfig {
                pairs: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
                timeframe: "15m".to_string(),
                loop_interval_secs: 60,
                candle_history: 200,
                reconcile_every: 10,
                equity_sample_stride: 100,
                strategies: vec!["ema_crossover".to_string()],
            },
            risk: RiskConfig {
                max_positions: 3,
                max_position_size_pct: dec!(0.1),
                stop_loss_pct: dec!(0.02),
                take_profit_pct: dec!(0.05),
                trailing_stop_pct: Some(dec!(0.03)),
                min_signal_strength: dec!(0.5),
            },
            execution: ExecutionConfig::default(),
            paper: PaperConfig {
                enabled: true,
                starting_balance: dec!(10000),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 5,
            },
            emergency: EmergencyConfig {
                max_consecutive_losses: 5,
                max_daily_loss_pct: dec!(0.03),
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn bad_pair_format_rejected() {
        let mut cfg = valid_config();
        cfg.trading.pairs = vec!["BTCUSD".to_string()];
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("BASE/QUOTE")));
    }

    #[test]
    fn position_size_bounds_enforced() {
        let mut cfg = valid_config();
        cfg.risk.max_position_size_pct = dec!(1.5);
        assert!(cfg.validate().is_err());

        cfg.risk.max_position_size_pct = Decimal::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_collects_all_errors() {
        let mut cfg = valid_config();
        cfg.trading.pairs.clear();
        cfg.risk.max_positions = 0;
        cfg.risk.stop_loss_pct = Decimal::ZERO;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.len() >= 3);
    }
}
