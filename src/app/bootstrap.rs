use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::{Interval, Series};
use crate::utils::{format_millis, millis_ago, normalize_symbols, now_millis};

use super::Engine;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub hours: u32,
    pub watch: Duration,
}

/// Fetch recent history for the requested symbols, then stream their prices
/// until the watch window ends or Ctrl-C arrives.
pub async fn run(options: RunOptions) -> Result<()> {
    let config = match &options.config_path {
        Some(path) => Config::load(path)?,
        None => Config::builtin(),
    };

    let symbols = normalize_symbols(&options.symbols);
    if symbols.is_empty() {
        return Err(AppError::message("no valid symbols given"));
    }

    let engine = Engine::new(&config)?;

    let end = now_millis();
    let start = millis_ago(options.hours);
    let history = engine
        .market_data()
        .fetch_many(&symbols, options.interval, start, end)
        .await;

    println!(
        "History ({} interval, last {}h):",
        options.interval, options.hours
    );
    for symbol in &symbols {
        match history.get(symbol) {
            Some(series) => println!("  {}", summarize(series)),
            None => println!("  {:<12} no data", symbol),
        }
    }

    let mut prices = engine.feed().subscribe_prices();
    if let Err(err) = engine.feed().start(&symbols).await {
        warn!("Live prices unavailable: {}", err);
        engine.shutdown().await?;
        return Err(err);
    }

    info!("Watching prices for {:?}", options.watch);
    let deadline = tokio::time::sleep(options.watch);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            update = prices.recv() => match update {
                Some(update) => println!(
                    "{} {:<12} {} ({:?})",
                    update.received_at.format("%H:%M:%S"),
                    update.symbol,
                    update.price,
                    update.source
                ),
                None => break,
            },
        }
    }

    engine.shutdown().await
}

fn summarize(series: &Series) -> String {
    match (series.candles().first(), series.latest()) {
        (Some(first), Some(last)) => format!(
            "{:<12} {:>4} candles  {} .. {}  close {}",
            series.symbol(),
            series.len(),
            format_millis(first.start_time),
            format_millis(last.start_time),
            last.close
        ),
        _ => format!("{:<12} empty", series.symbol()),
    }
}
