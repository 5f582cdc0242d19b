pub mod broker;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod risk;
pub mod store;
pub mod strategy;

pub use config::AppConfig;
pub use domain::{
    AccountState, Candle, Direction, ExitSignal, Position, PositionStatus, Signal, SignalKind,
    Trade,
};
pub use engine::{
    BacktestEngine, BacktestReport, EmergencyStop, Orchestrator, PositionRegistry,
    ReconcileReport, Reconciler,
};
pub use error::{MarlinError, Rejection, Result};
pub use execution::{ExecutionAdapter, LiveExecution, PaperExecution};
pub use risk::RiskPolicy;
pub use store::SqliteStore;
pub use strategy::{Strategy, StrategyRegistry};
