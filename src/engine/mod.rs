//! Trading engine: position registry, tick orchestration, backtest replay,
//! reconciliation, and the emergency stop.

pub mod backtest;
pub mod emergency;
pub mod fill;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;

pub use backtest::{BacktestEngine, BacktestReport, StrategyPerformance};
pub use emergency::EmergencyStop;
pub use fill::FillModel;
pub use orchestrator::{EquityPoint, Orchestrator};
pub use reconciler::{ReconcileReport, Reconciler, EXTERNAL_STRATEGY};
pub use registry::PositionRegistry;
