pub mod klines;

// Re-export for convenient access (e.g. `use crate::market_data::Candle`).
pub use klines::{Candle, KlineFetcher};
