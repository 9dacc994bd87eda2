use muzzle::EngineMode;

use crate::cli::ServeArgs;
use crate::config::MergedConfig;
use crate::engine::create_server;
use crate::error::{CliResult, check_outcome};

pub async fn execute(_args: ServeArgs, config: MergedConfig) -> CliResult<()> {
    let mut server = create_server(&config, EngineMode::Multi)?;
    let outcome = server.serve_stdio().await?;
    check_outcome(outcome)
}
