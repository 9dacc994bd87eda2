//! Session registry for multi-session mode

use std::collections::HashMap;

use crate::ipc::ProtocolError;
use crate::script::ScriptContext;

/// Loaded script contexts keyed by caller-chosen session id
///
/// Only the dispatcher touches the registry, one command at a time, so it
/// holds contexts directly without any locking.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ScriptContext>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a context, returning the one it replaces
    pub fn insert(&mut self, id: impl Into<String>, context: ScriptContext) -> Option<ScriptContext> {
        self.sessions.insert(id.into(), context)
    }

    pub fn get(&self, id: &str) -> Result<&ScriptContext, ProtocolError> {
        self.sessions
            .get(id)
            .ok_or_else(|| ProtocolError::SessionNotInitialized(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> Result<ScriptContext, ProtocolError> {
        self.sessions
            .remove(id)
            .ok_or_else(|| ProtocolError::SessionNotInitialized(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capability::CapabilitySet;
    use crate::config::ResourceLimits;
    use crate::network::DenyAll;
    use crate::script::{LogCapture, ScriptLoader, ScriptSource};

    fn context(source: &str) -> ScriptContext {
        ScriptLoader::new(
            CapabilitySet::standard(),
            ResourceLimits::default(),
            Arc::new(DenyAll),
            Duration::from_secs(1),
            LogCapture::new(),
        )
        .load("test", &ScriptSource::new(source))
        .unwrap()
    }

    #[test]
    fn test_unknown_session_is_an_error() {
        let mut registry = SessionRegistry::new();

        assert_eq!(
            registry.get("nope").unwrap_err().to_string(),
            "session nope is not initialized"
        );
        assert!(registry.remove("nope").is_err());
    }

    #[test]
    fn test_insert_replace_remove() {
        let mut registry = SessionRegistry::new();
        assert!(registry.insert("s1", context("module.exports = { a: 1 };")).is_none());
        assert!(registry.insert("s1", context("module.exports = { b: 2 };")).is_some());

        assert_eq!(registry.get("s1").unwrap().exports().names(), ["b"]);
        assert_eq!(registry.len(), 1);

        registry.remove("s1").unwrap();
        assert!(!registry.contains("s1"));
        assert!(registry.is_empty());
    }
}
