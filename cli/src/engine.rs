use anyhow::Result;

use muzzle::{
    AllowAll, AllowList, DenyAll, EngineConfig, EngineConfigBuilder, EngineMode, NetworkPolicy,
    ServeOutcome, Server,
};

use crate::cli::NetworkMode;
use crate::config::MergedConfig;

/// Type-erased engine server for CLI use
///
/// Bridges the runtime `--network` choice to the library's compile-time
/// network policy generic.
pub enum EngineHandle {
    DenyAll(Server<DenyAll>),
    AllowAll(Server<AllowAll>),
    AllowList(Server<AllowList>),
}

impl EngineHandle {
    /// Serve requests on stdin/stdout until kill or end of input
    pub async fn serve_stdio(&mut self) -> muzzle::Result<ServeOutcome> {
        match self {
            Self::DenyAll(s) => s.serve_stdio().await,
            Self::AllowAll(s) => s.serve_stdio().await,
            Self::AllowList(s) => s.serve_stdio().await,
        }
    }
}

/// Create an engine server from merged configuration
pub fn create_server(config: &MergedConfig, mode: EngineMode) -> Result<EngineHandle> {
    match config.network_mode {
        NetworkMode::Deny => {
            let engine_config = build_config(EngineConfig::builder(), config, mode)?;
            Ok(EngineHandle::DenyAll(Server::new(engine_config)))
        }
        NetworkMode::Allow => {
            let engine_config = build_config(EngineConfig::builder().network(AllowAll), config, mode)?;
            Ok(EngineHandle::AllowAll(Server::new(engine_config)))
        }
        NetworkMode::AllowList => {
            if config.allow_domains.is_empty() {
                anyhow::bail!("--network allow-list requires at least one --allow-domain");
            }
            let policy = AllowList::new(config.allow_domains.iter().cloned());
            let engine_config = build_config(EngineConfig::builder().network(policy), config, mode)?;
            Ok(EngineHandle::AllowList(Server::new(engine_config)))
        }
    }
}

/// Build an EngineConfig from merged CLI/file configuration
fn build_config<N: NetworkPolicy>(
    builder: EngineConfigBuilder<N>,
    config: &MergedConfig,
    mode: EngineMode,
) -> Result<EngineConfig<N>> {
    let builder = builder
        .capabilities(config.capabilities.clone())
        .limits(config.limits.clone())
        .fetch_timeout(config.fetch_timeout)
        .max_request_bytes(config.max_request_bytes)
        .mode(mode);

    Ok(builder.build()?)
}
