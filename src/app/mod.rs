use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::fetch::MarketDataClient;
use crate::stream::StreamingFeed;
use crate::tasks::{BoundedTaskPool, KeyedRequestRegistry};

pub mod bootstrap;

pub use bootstrap::{run, RunOptions};

/// The dashboard core: one pool, the REST client on top of it, and the
/// live feed, all under a single cancellation scope.
pub struct Engine {
    scope: CancellationToken,
    pool: BoundedTaskPool,
    market_data: MarketDataClient,
    feed: StreamingFeed,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self> {
        let scope = CancellationToken::new();
        let pool = BoundedTaskPool::from_config(&config.pool, scope.child_token());
        let registry = KeyedRequestRegistry::new(pool.clone());
        let market_data = MarketDataClient::new(config.market_data.clone(), registry)?;
        let feed = StreamingFeed::new(config.stream.clone(), scope.child_token());

        info!(
            "Engine ready: {} worker slot(s), klines from {}, stream at {}",
            pool.capacity(),
            config.market_data.endpoint,
            config.stream.url
        );

        Ok(Self {
            scope,
            pool,
            market_data,
            feed,
        })
    }

    pub fn pool(&self) -> &BoundedTaskPool {
        &self.pool
    }

    pub fn market_data(&self) -> &MarketDataClient {
        &self.market_data
    }

    pub fn feed(&self) -> &StreamingFeed {
        &self.feed
    }

    /// Stop the feed, cancel and wait out pooled work, then close the scope.
    pub async fn shutdown(&self) -> Result<()> {
        let stopped = self.feed.stop().await;
        self.pool.cancel_all();
        self.pool.drain().await;
        self.scope.cancel();
        info!("Engine shut down");
        stopped
    }
}
