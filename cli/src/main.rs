use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod engine;
mod error;

use cli::{Cli, Commands};
use config::{load_config, merge_config};
use error::{CliResult, to_exit_code};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the protocol, so diagnostics go to stderr
    let filter = if cli.verbose {
        "muzzle=debug,muzzle_cli=debug"
    } else {
        "muzzle=warn,muzzle_cli=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let result = smol::block_on(async_main(cli));
    to_exit_code(result)
}

async fn async_main(cli: Cli) -> CliResult<()> {
    let file_config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let config = merge_config(file_config, &args.common)?;
            commands::serve::execute(args, config).await
        }
        Commands::Single(args) => {
            let config = merge_config(file_config, &args.common)?;
            commands::single::execute(args, config).await
        }
    }
}
