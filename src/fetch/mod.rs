use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::Result;

pub mod decode;
pub mod history;
pub mod request;

pub use decode::parse_kline_body;
pub use history::MarketDataClient;
pub use request::kline_url;

pub type FetchResult<T> = Result<T>;

/// Kline bucket size. The upstream tells minute buckets (`"60"`) apart from
/// calendar buckets (`"D"`, `"M"`), so the wire form is kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Minutes(u32),
    Daily,
    Monthly,
}

impl Interval {
    pub fn as_wire(&self) -> String {
        match self {
            Interval::Minutes(minutes) => minutes.to_string(),
            Interval::Daily => "D".to_string(),
            Interval::Monthly => "M".to_string(),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid interval `{0}`: expected minutes (e.g. 60), `D` or `M`")]
pub struct ParseIntervalError(String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim() {
            "D" | "d" => Ok(Interval::Daily),
            // Lowercase `m` would be ambiguous with minutes, so only `M` is monthly.
            "M" => Ok(Interval::Monthly),
            other => match other.parse::<u32>() {
                Ok(minutes) if minutes > 0 => Ok(Interval::Minutes(minutes)),
                _ => Err(ParseIntervalError(raw.to_string())),
            },
        }
    }
}

/// One OHLC bar. Prices are decimals so financial values never pick up
/// binary rounding drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    pub start_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Parameters of one historical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub symbol: String,
    pub interval: Interval,
    pub start: i64,
    pub end: i64,
}

impl SeriesQuery {
    pub fn new(symbol: impl Into<String>, interval: Interval, start: i64, end: i64) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            start,
            end,
        }
    }

    /// Pool key for this request, e.g. `fetch_BTCUSDT_60`.
    pub fn task_key(&self) -> String {
        format!("fetch_{}_{}", self.symbol, self.interval)
    }
}

/// Candles for one query, ascending by start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    query: SeriesQuery,
    candles: Vec<Candle>,
}

impl Series {
    pub fn new(query: SeriesQuery, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.start_time);
        Self { query, candles }
    }

    pub fn symbol(&self) -> &str {
        &self.query.symbol
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }
}
