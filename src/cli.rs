use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tickerdeck::app::RunOptions;
use tickerdeck::fetch::Interval;

#[derive(Parser)]
#[command(name = "tickerdeck")]
#[command(about = "Recent candles and live ticker prices for Bybit linear contracts")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Symbols to follow, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
    pub symbols: Vec<String>,

    /// Kline interval: minutes (1, 5, 60, ...), D or M
    #[arg(short, long, default_value = "60")]
    pub interval: Interval,

    /// How far back to fetch history
    #[arg(long, default_value_t = 24)]
    pub hours: u32,

    /// How long to stream live prices
    #[arg(short, long, default_value_t = 30)]
    pub watch_secs: u64,
}

impl Cli {
    pub fn into_options(self) -> RunOptions {
        RunOptions {
            config_path: self.config,
            symbols: self.symbols,
            interval: self.interval,
            hours: self.hours,
            watch: Duration::from_secs(self.watch_secs),
        }
    }
}
