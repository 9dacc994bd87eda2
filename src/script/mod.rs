//! Script contexts: loading user code and running it to completion
//!
//! A [`ScriptLoader`] turns a [`ScriptSource`] into a [`ScriptContext`]:
//! a private QuickJS runtime with the capability prelude installed, the
//! caller's variables injected, and the export shape fixed. Executing a
//! function runs the engine's job queue and timers until the returned
//! value settles.

mod context;
mod error;
mod exports;
mod harness;
mod loader;
mod logs;
mod timers;

pub use context::ScriptContext;
pub use error::ScriptError;
pub use exports::ScriptExports;
pub use loader::{ScriptLoader, ScriptSource};
pub use logs::{LogCapture, LogEntry};
pub use timers::TimerQueue;
