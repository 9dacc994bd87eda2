//! Generation of the JavaScript prelude evaluated into every script context
//!
//! The prelude runs once per context before any user code. It receives the
//! raw host functions, wraps the ones the [`CapabilitySet`] allows, installs
//! throwing stubs for everything denied, and publishes the `__muzzle`
//! harness the engine drives scripts through. The raw host functions are
//! removed from the global object before user code can see them.

use crate::capability::{Capability, CapabilitySet};

/// Prefix shared by every function the prelude defines
///
/// Stack frames from functions carrying this prefix belong to the engine,
/// never to user code.
pub const INTERNAL_PREFIX: &str = "__muzzle";

/// Global names under which the raw host functions are registered
pub const HOST_LOG: &str = "__muzzle_host_log";
pub const HOST_TIMER: &str = "__muzzle_host_timer";
pub const HOST_CANCEL: &str = "__muzzle_host_cancel";
pub const HOST_EVAL: &str = "__muzzle_host_eval";
pub const HOST_FETCH: &str = "__muzzle_host_fetch";

/// Property of the prelude's `host` object each raw function lands on
const HOST_FUNCTIONS: [(&str, &str); 5] = [
    ("log", HOST_LOG),
    ("timer", HOST_TIMER),
    ("cancel", HOST_CANCEL),
    ("eval", HOST_EVAL),
    ("fetch", HOST_FETCH),
];

/// Global name of the frozen harness object
pub const HARNESS: &str = "__muzzle";

const CORE: &str = include_str!("js/core.js");
const CONSOLE: &str = include_str!("js/console.js");
const TIMERS: &str = include_str!("js/timers.js");
const TEXT: &str = include_str!("js/text.js");
const FETCH: &str = include_str!("js/fetch.js");
const REQUIRE: &str = include_str!("js/require.js");
const DENY: &str = include_str!("js/deny.js");
const HARNESS_JS: &str = include_str!("js/harness.js");

/// Generate the prelude source for a capability set
pub fn generate_prelude(capabilities: &CapabilitySet) -> String {
    let mut prelude = String::new();

    prelude.push_str("(function __muzzle_bootstrap(global, host) {\n");
    prelude.push_str(CORE);

    if capabilities.allows(Capability::Console) {
        tracing::debug!("prelude: console enabled");
        prelude.push_str(CONSOLE);
    }

    if capabilities.allows(Capability::Timers) {
        tracing::debug!("prelude: timers enabled");
        prelude.push_str(TIMERS);
    }

    if capabilities.allows(Capability::TextCodec) {
        tracing::debug!("prelude: text codec enabled");
        prelude.push_str(TEXT);
    }

    // fetch is always present; the host side enforces the grant
    prelude.push_str(FETCH);

    let modules: Vec<&str> = capabilities.modules().collect();
    prelude.push_str(&format!(
        "const allowedModules = {};\n",
        js_string_array(&modules)
    ));
    prelude.push_str(REQUIRE);

    let denied = capabilities.effective_denied_globals();
    tracing::debug!(denied = ?denied, "prelude: denied globals");
    prelude.push_str(&format!(
        "const deniedGlobals = {};\n",
        js_string_array(&denied)
    ));
    prelude.push_str(DENY);

    prelude.push_str(HARNESS_JS);
    let host: Vec<String> = HOST_FUNCTIONS
        .iter()
        .map(|(property, name)| format!("{property}: {name}"))
        .collect();
    prelude.push_str(&format!("}})(globalThis, {{ {} }});\n", host.join(", ")));

    for (_, name) in HOST_FUNCTIONS {
        prelude.push_str(&format!("delete globalThis.{name};\n"));
    }

    prelude
}

fn js_string_array(items: &[&str]) -> String {
    // JSON string arrays are valid JavaScript literals
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_prelude_includes_enabled_capabilities() {
        let prelude = generate_prelude(&CapabilitySet::standard());

        assert!(prelude.contains("global.setTimeout = __muzzle_set_timeout"));
        assert!(prelude.contains("global.TextEncoder = TextEncoder"));
        assert!(prelude.contains(r#"const allowedModules = ["timers","util"];"#));
        assert!(prelude.contains(r#""process""#));
        assert!(prelude.trim_end().ends_with("delete globalThis.__muzzle_host_fetch;"));
    }

    #[test]
    fn test_every_host_function_is_handed_over_and_removed() {
        let prelude = generate_prelude(&CapabilitySet::standard());

        assert!(prelude.contains(
            "cancel: __muzzle_host_cancel, eval: __muzzle_host_eval, fetch: __muzzle_host_fetch }"
        ));
        for (_, name) in HOST_FUNCTIONS {
            assert!(prelude.contains(&format!("delete globalThis.{name};")));
        }
    }

    #[test]
    fn test_disabled_capabilities_become_denied_globals() {
        let capabilities = CapabilitySet::builder()
            .timers(false)
            .text_codec(false)
            .modules(["util"])
            .build()
            .unwrap();
        let prelude = generate_prelude(&capabilities);

        assert!(!prelude.contains("global.setTimeout = __muzzle_set_timeout"));
        assert!(!prelude.contains("class TextEncoder"));
        assert!(prelude.contains(r#""setTimeout""#));
        assert!(prelude.contains(r#""TextDecoder""#));
        assert!(prelude.contains(r#"const allowedModules = ["util"];"#));
    }

    #[test]
    fn test_every_prelude_function_is_prefixed() {
        let prelude = generate_prelude(&CapabilitySet::standard());

        for line in prelude.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix("function ") {
                assert!(rest.starts_with(INTERNAL_PREFIX), "unprefixed function: {line}");
            }
        }
    }
}
