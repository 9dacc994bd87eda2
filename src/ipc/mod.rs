//! Line-delimited JSON IPC between the host and the engine
//!
//! The engine side is a [`Server`] reading requests from stdin and writing
//! responses to stdout. The host side is an [`EngineProcess`] that spawns
//! the engine and exchanges one line per request.
//!
//! # Example
//!
//! ```rust,ignore
//! use muzzle::ipc::{EngineProcess, Request};
//! use muzzle::ScriptSource;
//!
//! let mut engine = EngineProcess::spawn("muzzle", ["serve"])?
//!     .with_timeout(Duration::from_secs(5));
//!
//! let script = ScriptSource::new("module.exports = { greet: (n) => 'hi ' + n }");
//! engine.call(&Request::load("s1", &script)).await;
//! let response = engine
//!     .call(&Request::execute(Some("s1"), Some("greet"), vec!["bob".into()]))
//!     .await;
//! assert_eq!(response.result, "hi bob");
//! ```

mod client;
mod protocol;
mod server;

pub use client::{ClientError, EngineProcess};
pub use protocol::{
    Command, CommandKind, ExecutePayload, LoadPayload, ProtocolError, Request, Response,
    SessionPayload,
};
pub use server::{ServeOutcome, Server};
