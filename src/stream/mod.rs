//! Live ticker prices over a single websocket session.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub mod feed;
pub mod frames;
pub mod listeners;

pub use feed::StreamingFeed;
pub use listeners::PriceListeners;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Which ticker field a price was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceSource {
    Index,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Decimal,
    pub source: PriceSource,
    pub received_at: DateTime<Utc>,
}

impl PriceUpdate {
    pub fn new(symbol: impl Into<String>, price: Decimal, source: PriceSource) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            source,
            received_at: Utc::now(),
        }
    }
}
