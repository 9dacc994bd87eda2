//! Capability configuration for script contexts
//!
//! A [`CapabilitySet`] is the closed list of primitives visible inside every
//! execution environment. It is fixed when the engine starts; every
//! capability is either present by construction or replaced by a stub that
//! throws a descriptive error when touched.
//!
//! # Presets
//!
//! - `CapabilitySet::standard()` - console, timers, UTF-8 text codec, the
//!   `util` and `timers` modules, and a network grant for `testConnection` (default)
//! - `CapabilitySet::minimal()` - console only
//!
//! # Custom Configuration
//!
//! ```rust,ignore
//! use muzzle::CapabilitySet;
//!
//! let capabilities = CapabilitySet::builder()
//!     .timers(false)
//!     .modules(["util"])
//!     .deny_global("Intl")
//!     .network_grant("ping")
//!     .build()?;
//! ```

mod prelude;

use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult};

pub use prelude::{
    HARNESS, HOST_CANCEL, HOST_EVAL, HOST_FETCH, HOST_LOG, HOST_TIMER, INTERNAL_PREFIX,
    generate_prelude,
};

/// Built-in modules `require` can hand out
pub const KNOWN_MODULES: &[&str] = &["util", "timers"];

/// Globals stubbed out in every context unless the builder says otherwise
pub const DEFAULT_DENIED_GLOBALS: &[&str] = &[
    "process",
    "Deno",
    "Bun",
    "XMLHttpRequest",
    "WebSocket",
    "importScripts",
    "std",
    "os",
];

/// Function name granted network access by convention
pub const DEFAULT_GRANT_FUNCTION: &str = "testConnection";

/// Globals the prelude defines itself and that cannot be denied
const RESERVED_GLOBALS: &[&str] = &["require", "fetch", "module", "exports", HARNESS];

/// A toggleable capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `console.*`, routed to the command's log buffer
    Console,
    /// `setTimeout` / `clearTimeout`
    Timers,
    /// `TextEncoder` / `TextDecoder`
    TextCodec,
}

impl Capability {
    /// Globals this capability provides
    pub fn globals(self) -> &'static [&'static str] {
        match self {
            Self::Console => &["console"],
            Self::Timers => &["setTimeout", "clearTimeout"],
            Self::TextCodec => &["TextEncoder", "TextDecoder"],
        }
    }
}

/// The closed set of primitives visible to sandboxed scripts
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    console: bool,
    timers: bool,
    text_codec: bool,
    modules: BTreeSet<String>,
    denied_globals: BTreeSet<String>,
    network_grant: Option<String>,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::standard()
    }
}

impl CapabilitySet {
    /// Standard preset (default)
    pub fn standard() -> Self {
        Self {
            console: true,
            timers: true,
            text_codec: true,
            modules: KNOWN_MODULES.iter().map(|m| m.to_string()).collect(),
            denied_globals: DEFAULT_DENIED_GLOBALS
                .iter()
                .map(|g| g.to_string())
                .collect(),
            network_grant: Some(DEFAULT_GRANT_FUNCTION.to_string()),
        }
    }

    /// Minimal preset - console only, no modules, no network grant
    pub fn minimal() -> Self {
        Self {
            console: true,
            timers: false,
            text_codec: false,
            modules: BTreeSet::new(),
            denied_globals: DEFAULT_DENIED_GLOBALS
                .iter()
                .map(|g| g.to_string())
                .collect(),
            network_grant: None,
        }
    }

    /// Create a builder starting from the standard preset
    pub fn builder() -> CapabilitySetBuilder {
        CapabilitySetBuilder::default()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Console => self.console,
            Capability::Timers => self.timers,
            Capability::TextCodec => self.text_codec,
        }
    }

    /// Modules `require` will resolve
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }

    /// Explicitly denied globals
    pub fn denied_globals(&self) -> impl Iterator<Item = &str> {
        self.denied_globals.iter().map(String::as_str)
    }

    /// Denied globals plus the globals of every disabled capability
    pub fn effective_denied_globals(&self) -> Vec<&str> {
        let mut denied: BTreeSet<&str> = self.denied_globals().collect();
        for capability in [Capability::Console, Capability::Timers, Capability::TextCodec] {
            if !self.allows(capability) {
                denied.extend(capability.globals().iter().copied());
            }
        }
        denied.into_iter().collect()
    }

    /// Function name that receives temporary network access, if any
    pub fn network_grant(&self) -> Option<&str> {
        self.network_grant.as_deref()
    }

    /// Whether invoking `function` should hold the network grant
    pub fn grants_network(&self, function: &str) -> bool {
        !function.is_empty() && self.network_grant() == Some(function)
    }

    /// Render the prelude evaluated into every context
    pub fn prelude(&self) -> String {
        generate_prelude(self)
    }
}

/// Builder for CapabilitySet
#[derive(Debug, Clone)]
pub struct CapabilitySetBuilder {
    config: CapabilitySet,
}

impl Default for CapabilitySetBuilder {
    fn default() -> Self {
        Self {
            config: CapabilitySet::standard(),
        }
    }
}

impl CapabilitySetBuilder {
    /// Start from the minimal preset
    pub fn from_minimal() -> Self {
        Self {
            config: CapabilitySet::minimal(),
        }
    }

    pub fn console(mut self, enabled: bool) -> Self {
        self.config.console = enabled;
        self
    }

    pub fn timers(mut self, enabled: bool) -> Self {
        self.config.timers = enabled;
        self
    }

    pub fn text_codec(mut self, enabled: bool) -> Self {
        self.config.text_codec = enabled;
        self
    }

    /// Replace the module allow-list
    pub fn modules(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_module(mut self, module: impl Into<String>) -> Self {
        self.config.modules.insert(module.into());
        self
    }

    pub fn deny_global(mut self, name: impl Into<String>) -> Self {
        self.config.denied_globals.insert(name.into());
        self
    }

    pub fn deny_globals(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config
            .denied_globals
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Grant temporary network access to the function with this name
    pub fn network_grant(mut self, function: impl Into<String>) -> Self {
        self.config.network_grant = Some(function.into());
        self
    }

    /// Never grant network access
    pub fn no_network_grant(mut self) -> Self {
        self.config.network_grant = None;
        self
    }

    /// Validate and build the capability set
    pub fn build(self) -> EngineResult<CapabilitySet> {
        let config = self.config;

        for module in &config.modules {
            if !KNOWN_MODULES.contains(&module.as_str()) {
                return Err(EngineError::UnknownModule(module.clone()));
            }
        }

        if config.modules.contains("timers") && !config.timers {
            return Err(EngineError::InvalidCapabilities(
                "module `timers` requires the timers capability".to_string(),
            ));
        }

        for name in &config.denied_globals {
            if !is_identifier(name) {
                return Err(EngineError::InvalidCapabilities(format!(
                    "`{name}` is not a valid global name"
                )));
            }
            if RESERVED_GLOBALS.contains(&name.as_str()) {
                return Err(EngineError::InvalidCapabilities(format!(
                    "`{name}` is provided by the engine and cannot be denied"
                )));
            }
            for capability in [Capability::Console, Capability::Timers, Capability::TextCodec] {
                if config.allows(capability) && capability.globals().contains(&name.as_str()) {
                    return Err(EngineError::InvalidCapabilities(format!(
                        "`{name}` is denied but its capability is enabled"
                    )));
                }
            }
        }

        if let Some(function) = &config.network_grant {
            if !is_identifier(function) {
                return Err(EngineError::InvalidCapabilities(format!(
                    "network grant `{function}` is not a valid function name"
                )));
            }
        }

        Ok(config)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_allows_everything_but_network() {
        let set = CapabilitySet::standard();

        assert!(set.allows(Capability::Console));
        assert!(set.allows(Capability::Timers));
        assert!(set.allows(Capability::TextCodec));
        assert_eq!(set.modules().collect::<Vec<_>>(), ["timers", "util"]);
        assert_eq!(set.network_grant(), Some("testConnection"));
        assert!(set.denied_globals().any(|g| g == "process"));
    }

    #[test]
    fn test_minimal_denies_disabled_capability_globals() {
        let set = CapabilitySet::minimal();
        let denied = set.effective_denied_globals();

        assert!(denied.contains(&"setTimeout"));
        assert!(denied.contains(&"TextEncoder"));
        assert!(!denied.contains(&"console"));
        assert_eq!(set.network_grant(), None);
    }

    #[test]
    fn test_grants_network_only_to_named_function() {
        let set = CapabilitySet::standard();

        assert!(set.grants_network("testConnection"));
        assert!(!set.grants_network("transform"));
        assert!(!set.grants_network(""));
    }

    #[test]
    fn test_unknown_module_rejected() {
        let err = CapabilitySet::builder().allow_module("fs").build().unwrap_err();
        assert!(matches!(err, EngineError::UnknownModule(ref m) if m == "fs"));
    }

    #[test]
    fn test_timers_module_requires_timers() {
        let result = CapabilitySet::builder().timers(false).build();
        assert!(matches!(result, Err(EngineError::InvalidCapabilities(_))));

        let set = CapabilitySet::builder()
            .timers(false)
            .modules(["util"])
            .build()
            .unwrap();
        assert!(!set.allows(Capability::Timers));
    }

    #[test]
    fn test_cannot_deny_engine_globals() {
        assert!(CapabilitySet::builder().deny_global("require").build().is_err());
        assert!(CapabilitySet::builder().deny_global("console").build().is_err());
        assert!(CapabilitySet::builder().deny_global("not valid").build().is_err());

        let set = CapabilitySet::builder().deny_global("Intl").build().unwrap();
        assert!(set.denied_globals().any(|g| g == "Intl"));
    }

    #[test]
    fn test_builder_from_minimal() {
        let set = CapabilitySetBuilder::from_minimal()
            .network_grant("ping")
            .build()
            .unwrap();

        assert!(set.grants_network("ping"));
        assert!(!set.allows(Capability::Timers));
    }
}
