mod bootstrap_helpers;
mod cli_args;
mod runtime_config;

use anyhow::Result;
use clap::Parser;

use bootstrap_helpers::init_tracing;
use cli_args::Cli;
use herald_runtime::run_mention_runtime;
use runtime_config::build_runtime_config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level)?;
    let config = build_runtime_config(&cli)?;
    run_mention_runtime(config).await
}
