//! Per-command capture of sandbox log output

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// One call to the sandbox logging primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
        }
    }
}

/// Buffer shared between the dispatcher and every script context
///
/// Entries are only kept between [`begin`](Self::begin) and
/// [`finish`](Self::finish); anything logged outside that span is dropped.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Rc<RefCell<Option<Vec<LogEntry>>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing for a new command, discarding any stale entries
    pub fn begin(&self) {
        *self.buffer.borrow_mut() = Some(Vec::new());
    }

    pub fn record(&self, level: impl Into<String>, message: impl Into<String>) {
        match self.buffer.borrow_mut().as_mut() {
            Some(entries) => entries.push(LogEntry::new(level, message)),
            None => {
                let level = level.into();
                tracing::trace!(level = %level, "dropping log entry outside of a command");
            }
        }
    }

    /// Stop capturing and return the entries in call order
    pub fn finish(&self) -> Vec<LogEntry> {
        self.buffer.borrow_mut().take().unwrap_or_default()
    }
}
