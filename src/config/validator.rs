use url::Url;

use crate::error::{AppError, Result};

use super::{Config, MarketDataConfig, PoolConfig, StreamConfig};

/// Validate the whole configuration and surface every issue at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_pool(&config.pool, &mut issues);
    validate_market_data(&config.market_data, &mut issues);
    validate_stream(&config.stream, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::Config(issues.join("\n  - ")))
    }
}

fn validate_pool(pool: &PoolConfig, issues: &mut Vec<String>) {
    if pool.capacity == Some(0) {
        issues.push("pool.capacity must be at least 1".to_string());
    }
}

fn validate_market_data(market_data: &MarketDataConfig, issues: &mut Vec<String>) {
    validate_url(
        "market_data.endpoint",
        &market_data.endpoint,
        &["http", "https"],
        issues,
    );

    if market_data.category.trim().is_empty() {
        issues.push("market_data.category must not be empty".to_string());
    }
    if market_data.timeout_secs == 0 {
        issues.push("market_data.timeout_secs must be greater than zero".to_string());
    }
    if let Some(limit) = market_data.limit {
        if limit == 0 || limit > 1000 {
            issues.push(format!(
                "market_data.limit must be between 1 and 1000, got {limit}"
            ));
        }
    }
}

fn validate_stream(stream: &StreamConfig, issues: &mut Vec<String>) {
    validate_url("stream.url", &stream.url, &["ws", "wss"], issues);

    if stream.connect_timeout_secs == 0 {
        issues.push("stream.connect_timeout_secs must be greater than zero".to_string());
    }
    if stream.max_message_bytes == 0 {
        issues.push("stream.max_message_bytes must be greater than zero".to_string());
    }
    if stream.max_args_per_frame == 0 {
        issues.push("stream.max_args_per_frame must be at least 1".to_string());
    }
}

fn validate_url(field: &str, value: &str, schemes: &[&str], issues: &mut Vec<String>) {
    if value.trim().is_empty() {
        issues.push(format!("{field} must not be empty"));
        return;
    }

    match Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => issues.push(format!(
            "{field} uses scheme `{}`, expected one of {}",
            url.scheme(),
            schemes.join(", ")
        )),
        Err(err) => issues.push(format!("{field} is not a valid URL: {err}")),
    }
}
