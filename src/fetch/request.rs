use url::Url;

use crate::config::MarketDataConfig;
use crate::error::Context;

use super::{FetchResult, SeriesQuery};

/// Query parameters of a kline request, in the order they are sent.
pub fn kline_params(cfg: &MarketDataConfig, query: &SeriesQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("category", cfg.category.clone()),
        ("symbol", query.symbol.clone()),
        ("interval", query.interval.as_wire()),
        ("start", query.start.to_string()),
        ("end", query.end.to_string()),
    ];
    if let Some(limit) = cfg.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

pub fn kline_url(cfg: &MarketDataConfig, query: &SeriesQuery) -> FetchResult<Url> {
    let url = Url::parse_with_params(&cfg.endpoint, kline_params(cfg, query))
        .with_context(|| format!("Invalid kline endpoint `{}`", cfg.endpoint))?;
    Ok(url)
}
