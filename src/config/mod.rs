use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod loader;
pub mod validator;

pub use validator::validate_config;

/// Bybit v5 public kline endpoint.
pub const DEFAULT_KLINE_ENDPOINT: &str = "https://api.bybit.com/v5/market/kline";
/// Bybit v5 public stream for linear perpetuals.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.bybit.com/v5/public/linear";

const DEFAULT_USER_AGENT: &str = concat!("tickerdeck/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub market_data: MarketDataConfig,
    pub stream: StreamConfig,
}

/// Worker pool sizing. `capacity: None` means one slot per available core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: Option<usize>,
}

impl PoolConfig {
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or_else(default_parallelism)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub endpoint: String,
    pub category: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Optional `limit` query parameter; upstream caps it at 1000.
    pub limit: Option<u32>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_KLINE_ENDPOINT.to_string(),
            category: "linear".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            limit: None,
        }
    }
}

impl MarketDataConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    /// Upper bound for a reassembled message, fragments included.
    pub max_message_bytes: usize,
    /// Upstream rejects subscribe requests carrying more topics than this.
    pub max_args_per_frame: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            connect_timeout_secs: 10,
            max_message_bytes: 1 << 20,
            max_args_per_frame: 10,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    pub fn builtin() -> Self {
        Self::default()
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
