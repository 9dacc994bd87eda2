use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use muzzle::{
    CapabilitySet, CapabilitySetBuilder, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_REQUEST_BYTES,
    ResourceLimits,
};

use crate::cli::{CommonArgs, NetworkMode};

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Network settings
    pub network: NetworkSection,

    /// Capabilities visible to scripts
    pub capabilities: CapabilitiesSection,

    /// Resource limits
    pub limits: LimitsSection,

    /// Transport settings
    pub transport: TransportSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Network policy: "deny", "allow", or "allow-list"
    pub policy: Option<String>,
    /// Domains to allow (for allow-list policy)
    pub allow_domains: Option<Vec<String>>,
    /// Function granted network access; empty disables the grant
    pub grant_function: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSection {
    pub console: Option<bool>,
    pub timers: Option<bool>,
    pub text_codec: Option<bool>,
    pub modules: Option<Vec<String>>,
    pub deny_globals: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_memory: Option<usize>,
    pub max_stack: Option<usize>,
    pub max_execution_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub max_request_bytes: Option<usize>,
}

/// Merged configuration from file + CLI
pub struct MergedConfig {
    pub network_mode: NetworkMode,
    pub allow_domains: Vec<String>,
    pub capabilities: CapabilitySet,
    pub limits: ResourceLimits,
    pub fetch_timeout: Duration,
    pub max_request_bytes: usize,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: FileConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FileConfig::default()),
    }
}

/// Merge file config with CLI args (CLI takes precedence)
pub fn merge_config(file: FileConfig, cli: &CommonArgs) -> Result<MergedConfig> {
    // Network mode: CLI > file > default (deny)
    let network_mode = if cli.network != NetworkMode::Deny {
        cli.network
    } else if let Some(ref policy) = file.network.policy {
        match policy.as_str() {
            "deny" => NetworkMode::Deny,
            "allow" => NetworkMode::Allow,
            "allow-list" => NetworkMode::AllowList,
            other => anyhow::bail!("invalid network policy in config: {}", other),
        }
    } else {
        NetworkMode::Deny
    };

    // Allow domains: merge CLI + file
    let mut allow_domains = file.network.allow_domains.clone().unwrap_or_default();
    allow_domains.extend(cli.allow_domains.iter().cloned());

    let capabilities = build_capabilities(&file, cli).context("invalid capability settings")?;
    let limits = build_resource_limits(&file.limits, cli);

    let fetch_timeout = cli
        .fetch_timeout_secs
        .or(file.network.fetch_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_FETCH_TIMEOUT);

    let max_request_bytes = cli
        .max_request_bytes
        .or(file.transport.max_request_bytes)
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);

    Ok(MergedConfig {
        network_mode,
        allow_domains,
        capabilities,
        limits,
        fetch_timeout,
        max_request_bytes,
    })
}

fn build_capabilities(file: &FileConfig, cli: &CommonArgs) -> Result<CapabilitySet> {
    let section = &file.capabilities;
    let mut builder = CapabilitySetBuilder::default();

    // Apply file config first, then CLI overrides

    // console
    if let Some(v) = section.console {
        builder = builder.console(v);
    }
    if cli.console {
        builder = builder.console(true);
    } else if cli.no_console {
        builder = builder.console(false);
    }

    // timers
    let timers = if cli.timers {
        Some(true)
    } else if cli.no_timers {
        Some(false)
    } else {
        section.timers
    };
    if let Some(v) = timers {
        builder = builder.timers(v);
    }

    // text codec
    if let Some(v) = section.text_codec {
        builder = builder.text_codec(v);
    }
    if cli.text_codec {
        builder = builder.text_codec(true);
    } else if cli.no_text_codec {
        builder = builder.text_codec(false);
    }

    // Modules: CLI > file > default; the timers module goes with the timers capability
    let modules = if !cli.modules.is_empty() {
        Some(cli.modules.clone())
    } else {
        section.modules.clone()
    };
    match modules {
        Some(modules) => builder = builder.modules(modules),
        None if timers == Some(false) => builder = builder.modules(["util"]),
        None => {}
    }

    // Denied globals: merge CLI + file
    builder = builder.deny_globals(section.deny_globals.iter().flatten().cloned());
    builder = builder.deny_globals(cli.deny_globals.iter().cloned());

    // Network grant: CLI > file; an empty name disables it
    if cli.no_network_grant {
        builder = builder.no_network_grant();
    } else if let Some(function) = cli
        .grant_function
        .as_ref()
        .or(file.network.grant_function.as_ref())
    {
        builder = if function.is_empty() {
            builder.no_network_grant()
        } else {
            builder.network_grant(function.clone())
        };
    }

    Ok(builder.build()?)
}

fn build_resource_limits(file: &LimitsSection, cli: &CommonArgs) -> ResourceLimits {
    let mut builder = ResourceLimits::builder();

    // CLI > file for each limit
    if let Some(v) = cli.max_memory.or(file.max_memory) {
        builder = builder.max_memory_bytes(v);
    }

    if let Some(v) = cli.max_stack.or(file.max_stack) {
        builder = builder.max_stack_bytes(v);
    }

    if let Some(v) = cli.max_execution_ms.or(file.max_execution_ms) {
        builder = builder.max_execution_time(Duration::from_millis(v));
    }

    builder.build()
}
