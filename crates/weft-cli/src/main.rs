//! weft command-line entry point.
//!
//! Binary name: `weft`
//!
//! Parses CLI arguments, installs tracing, then dispatches to the workflow
//! command handlers.

mod cli;
mod config;

use clap::Parser;
use weft_observe::tracing_setup::{
    TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing,
};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions::new(filter_for_verbosity(cli.verbose, cli.quiet))
        .with_json(cli.log_json)
        .with_otel(cli.otel);
    init_tracing(&options)?;

    let output = cli::Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::validate(&file, output),
        Commands::Plan { file } => cli::workflow::plan(&file, output),
        Commands::Run {
            file,
            vars,
            execution_id,
        } => {
            let config = config::load_engine_config(cli.config.as_deref()).await;
            cli::workflow::run(&file, &vars, execution_id, config, output).await
        }
    };

    shutdown_tracing();
    result
}
