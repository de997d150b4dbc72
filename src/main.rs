mod cli;

use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> tickerdeck::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    tickerdeck::app::run(cli.into_options()).await
}
