//! Market data interfaces.

mod feed;

pub use feed::{CandleFeed, ReplayFeed};
