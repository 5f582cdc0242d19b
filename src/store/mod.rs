//! Durable storage: positions, trades, account state, audit log.

mod sqlite;

pub use sqlite::{EquitySnapshot, SqliteStore};
