use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum MarlinError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Broker communication error: {0}")]
    BrokerCommunication(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // Position lifecycle errors
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        have: rust_decimal::Decimal,
        need: rust_decimal::Decimal,
    },

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Reconciliation errors
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Emergency stop tripped: {0}")]
    EmergencyStop(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MarlinError
pub type Result<T> = std::result::Result<T, MarlinError>;

/// Reasons a signal is refused admission by the risk policy.
///
/// Each rule is independent so admission checks can be tested in isolation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Already have open position for {pair}")]
    DuplicatePosition { pair: String },

    #[error("Max open positions ({max}) reached")]
    MaxPositionsReached { max: usize },

    #[error("Signal strength too weak ({strength} < {floor})")]
    StrengthBelowFloor {
        strength: rust_decimal::Decimal,
        floor: rust_decimal::Decimal,
    },
}

impl From<Rejection> for MarlinError {
    fn from(err: Rejection) -> Self {
        MarlinError::RiskLimitExceeded(err.to_string())
    }
}
