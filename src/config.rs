use std::time::Duration;

use crate::capability::CapabilitySet;
use crate::error::{EngineError, EngineResult};
use crate::network::{DenyAll, NetworkPolicy};
use crate::script::ScriptSource;

/// Default maximum size of one request line (16 MiB)
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// Default timeout for a single granted `fetch`
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource limits applied to every script context
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    max_memory_bytes: Option<usize>,
    max_stack_bytes: Option<usize>,
    max_execution_time: Option<Duration>,
}

impl ResourceLimits {
    /// Create a new builder for resource limits
    pub fn builder() -> ResourceLimitsBuilder {
        ResourceLimitsBuilder::default()
    }

    pub fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_bytes
    }

    pub fn max_stack_bytes(&self) -> Option<usize> {
        self.max_stack_bytes
    }

    /// Cooperative deadline for a single command; `None` means no limit
    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time
    }
}

/// Builder for ResourceLimits
#[derive(Debug, Default)]
pub struct ResourceLimitsBuilder {
    inner: ResourceLimits,
}

impl ResourceLimitsBuilder {
    pub fn max_memory_bytes(mut self, bytes: usize) -> Self {
        self.inner.max_memory_bytes = Some(bytes);
        self
    }

    pub fn max_stack_bytes(mut self, bytes: usize) -> Self {
        self.inner.max_stack_bytes = Some(bytes);
        self
    }

    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.inner.max_execution_time = Some(limit);
        self
    }

    pub fn build(self) -> ResourceLimits {
        self.inner
    }
}

/// How the engine maps requests to script contexts
#[derive(Debug, Clone, Default)]
pub enum EngineMode {
    /// Sessions are loaded and unloaded explicitly by id
    #[default]
    Multi,
    /// One implicit session, compiled from this script on first use
    Single(ScriptSource),
}

impl EngineMode {
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

/// Configuration for an engine instance
///
/// The type parameter is the network policy consulted when the granted
/// function calls `fetch`.
#[derive(Debug)]
pub struct EngineConfig<N: NetworkPolicy = DenyAll> {
    network: N,
    capabilities: CapabilitySet,
    limits: ResourceLimits,
    mode: EngineMode,
    max_request_bytes: usize,
    fetch_timeout: Duration,
}

impl EngineConfig<DenyAll> {
    /// Multi-session configuration with the standard capability set
    pub fn new() -> EngineResult<Self> {
        EngineConfigBuilder::default().build()
    }

    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder<DenyAll> {
        EngineConfigBuilder::default()
    }
}

impl<N: NetworkPolicy> EngineConfig<N> {
    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn mode(&self) -> &EngineMode {
        &self.mode
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub(crate) fn into_parts(
        self,
    ) -> (N, CapabilitySet, ResourceLimits, EngineMode, Duration) {
        (
            self.network,
            self.capabilities,
            self.limits,
            self.mode,
            self.fetch_timeout,
        )
    }
}

/// Builder for EngineConfig
#[derive(Debug)]
pub struct EngineConfigBuilder<N: NetworkPolicy = DenyAll> {
    network: N,
    capabilities: CapabilitySet,
    limits: ResourceLimits,
    mode: EngineMode,
    max_request_bytes: usize,
    fetch_timeout: Duration,
}

impl Default for EngineConfigBuilder<DenyAll> {
    fn default() -> Self {
        Self {
            network: DenyAll,
            capabilities: CapabilitySet::standard(),
            limits: ResourceLimits::default(),
            mode: EngineMode::Multi,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl<N: NetworkPolicy> EngineConfigBuilder<N> {
    /// Set the network policy (changes the generic type)
    pub fn network<M: NetworkPolicy>(self, policy: M) -> EngineConfigBuilder<M> {
        EngineConfigBuilder {
            network: policy,
            capabilities: self.capabilities,
            limits: self.limits,
            mode: self.mode,
            max_request_bytes: self.max_request_bytes,
            fetch_timeout: self.fetch_timeout,
        }
    }

    /// Set the capabilities visible to scripts
    pub fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run a single implicit session compiled from `script`
    pub fn single(self, script: ScriptSource) -> Self {
        self.mode(EngineMode::Single(script))
    }

    pub fn max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn build(self) -> EngineResult<EngineConfig<N>> {
        if self.max_request_bytes == 0 {
            return Err(EngineError::ConfigError(
                "max_request_bytes must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(EngineError::ConfigError(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_execution_time().is_some_and(|t| t.is_zero()) {
            return Err(EngineError::ConfigError(
                "max_execution_time must be greater than zero".to_string(),
            ));
        }

        Ok(EngineConfig {
            network: self.network,
            capabilities: self.capabilities,
            limits: self.limits,
            mode: self.mode,
            max_request_bytes: self.max_request_bytes,
            fetch_timeout: self.fetch_timeout,
        })
    }
}
