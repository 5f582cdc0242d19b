//! Core domain types: candles, signals, positions, trades, account state.

mod account;
mod candle;
pub mod position;
mod signal;
mod trade;

pub use account::AccountState;
pub use candle::Candle;
pub use position::{Direction, NewPosition, Position, PositionStatus};
pub use signal::{ExitSignal, Signal, SignalKind};
pub use trade::Trade;
