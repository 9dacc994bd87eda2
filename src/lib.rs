//! Muzzle - sandboxed script execution engine
//!
//! This library runs untrusted JavaScript transformation code inside an
//! embedded QuickJS engine. Scripts see only an explicit set of
//! capabilities; there is no filesystem, process, or module access, and
//! network access exists only for one designated function while it runs.
//!
//! The engine is meant to run as a subprocess speaking newline-delimited
//! JSON over stdio. The host sends `load`, `describe`, `execute`, `unload`
//! and `kill` requests and receives exactly one response per request,
//! carrying the result, the script's captured log output, and a stack trace
//! expressed in the coordinates of the user's own source.
//!
//! # Example
//!
//! ```rust,ignore
//! use muzzle::{EngineConfig, Server};
//!
//! fn main() -> muzzle::Result<()> {
//!     let config = EngineConfig::builder().build()?;
//!     let mut server = Server::new(config);
//!     smol::block_on(server.serve_stdio())?;
//!     Ok(())
//! }
//! ```
//!
//! # Network Policies
//!
//! The granted function's requests are still checked against a policy:
//!
//! - [`DenyAll`] - Deny all network access (default)
//! - [`AllowAll`] - Allow all network access
//! - [`AllowList`] - Allow access to specific domains
//!
//! # Operating Modes
//!
//! - [`EngineMode::Multi`] - many sessions, loaded and unloaded by id
//! - [`EngineMode::Single`] - one implicit session compiled on first use

mod capability;
mod config;
mod engine;
mod error;
pub mod ipc;
mod network;
mod script;
mod session;
pub mod stack;

// Re-export public types
pub use capability::{Capability, CapabilitySet, CapabilitySetBuilder, KNOWN_MODULES};
pub use config::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_REQUEST_BYTES, EngineConfig, EngineConfigBuilder,
    EngineMode, ResourceLimits, ResourceLimitsBuilder,
};
pub use engine::{Engine, Flow, SINGLE_SESSION_LABEL};
pub use error::{EngineError, EngineResult, Error, Result};
pub use ipc::{ClientError, EngineProcess, ProtocolError, Request, Response, ServeOutcome, Server};
pub use network::{AllowAll, AllowList, DenyAll, DomainRequest, FetchError, NetworkPolicy};
pub use script::{LogEntry, ScriptContext, ScriptError, ScriptExports, ScriptSource};
pub use session::SessionRegistry;
