use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::{header::ACCEPT, Client, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::MarketDataConfig;
use crate::error::{AppError, Context};
use crate::tasks::KeyedRequestRegistry;

use super::{parse_kline_body, request::kline_url, FetchResult, Interval, Series, SeriesQuery};

const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Historical candles over REST. Every pooled request is keyed
/// `fetch_{symbol}_{interval}` so the dashboard can cancel it by name.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    config: Arc<MarketDataConfig>,
    registry: KeyedRequestRegistry,
}

impl MarketDataClient {
    pub fn new(config: MarketDataConfig, registry: KeyedRequestRegistry) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to construct market data HTTP client")?;

        Ok(Self {
            client,
            config: Arc::new(config),
            registry,
        })
    }

    pub fn registry(&self) -> &KeyedRequestRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MarketDataConfig {
        &self.config
    }

    /// Fetch one series through the pool. `Ok(None)` means the upstream
    /// answered but had no candles to give.
    pub async fn fetch_series(&self, query: SeriesQuery) -> FetchResult<Option<Series>> {
        let key = query.task_key();
        let client = self.clone();
        self.registry
            .request(key, move |cancel| async move {
                client.fetch_series_with(&query, &cancel).await
            })
            .await
    }

    /// Fetch one series directly under a caller-owned token, bypassing the pool.
    pub async fn fetch_series_with(
        &self,
        query: &SeriesQuery,
        cancel: &CancellationToken,
    ) -> FetchResult<Option<Series>> {
        let url = kline_url(&self.config, query)?;
        debug!("Requesting klines: {}", url);

        let body = self.get_with_retry(&url, &query.symbol, cancel).await?;
        let candles = parse_kline_body(&body, &query.symbol)?;
        Ok(candles.map(|candles| Series::new(query.clone(), candles)))
    }

    /// Fetch several symbols concurrently. Symbols that failed, were
    /// cancelled, or had no data are left out of the map.
    pub async fn fetch_many(
        &self,
        symbols: &[String],
        interval: Interval,
        start: i64,
        end: i64,
    ) -> HashMap<String, Series> {
        let requests = symbols.iter().map(|symbol| {
            let query = SeriesQuery::new(symbol.clone(), interval, start, end);
            async move {
                let symbol = query.symbol.clone();
                (symbol, self.fetch_series(query).await)
            }
        });

        let mut series = HashMap::with_capacity(symbols.len());
        for (symbol, result) in join_all(requests).await {
            match result {
                Ok(Some(found)) => {
                    series.insert(symbol, found);
                }
                Ok(None) => debug!("No candles returned for {}", symbol),
                Err(err) if err.is_cancelled() => info!("History fetch for {} cancelled", symbol),
                Err(err) => warn!("History fetch for {} failed: {}", symbol, err),
            }
        }

        info!(
            "Fetched history for {}/{} symbols ({})",
            series.len(),
            symbols.len(),
            interval
        );
        series
    }

    async fn get_with_retry(
        &self,
        url: &Url,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> FetchResult<String> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                result = self.get_once(url) => result,
            };

            let err = match result {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            if attempt >= max_attempts || !is_retryable(&err) {
                return Err(AppError::Transport(err));
            }

            let delay = backoff_delay(self.config.retry_base_delay(), attempt);
            warn!(
                "Kline request for {} failed (attempt {}/{}): {}; retrying in {:?}",
                symbol, attempt, max_attempts, err, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn get_once(&self, url: &Url) -> reqwest::Result<String> {
        self.client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Client errors other than rate limiting will not improve on retry.
fn is_retryable(err: &reqwest::Error) -> bool {
    match err.status() {
        Some(StatusCode::TOO_MANY_REQUESTS) => true,
        Some(status) => !status.is_client_error(),
        None => true,
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(2_u32.pow(exponent))
}
