//! Wire protocol types
//!
//! Wire format, one JSON object per line in each direction:
//! ```text
//! Request:
//!   {"command": "load"|"describe"|"execute"|"unload"|"kill", "payload": {...}}\n
//!
//! Response:
//!   {"ok": bool, "result": any, "error": string|null, "stack": string|null,
//!    "log": [{"level": string, "message": string}]}\n
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::script::{LogEntry, ScriptError, ScriptSource};

/// Errors in decoding a request or in the session state it targets
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request is missing a command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid {command} payload: {reason}")]
    InvalidPayload {
        command: CommandKind,
        reason: String,
    },

    #[error("request exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("session {0} is not initialized")]
    SessionNotInitialized(String),

    #[error("{0} requires a session")]
    MissingSession(CommandKind),

    #[error("{0} is not supported in single-shot mode")]
    UnsupportedInMode(CommandKind),
}

/// Name of a protocol command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Load,
    Describe,
    Execute,
    Unload,
    Kill,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Describe => "describe",
            Self::Execute => "execute",
            Self::Unload => "unload",
            Self::Kill => "kill",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "load" => Some(Self::Load),
            "describe" => Some(Self::Describe),
            "execute" => Some(Self::Execute),
            "unload" => Some(Self::Unload),
            "kill" => Some(Self::Kill),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request line as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    pub fn new(command: CommandKind, payload: Value) -> Self {
        Self {
            command: Some(command.as_str().to_string()),
            payload,
        }
    }

    /// Parse one request line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn load(session: impl Into<String>, script: &ScriptSource) -> Self {
        Self::new(
            CommandKind::Load,
            json!({
                "session": session.into(),
                "source": script.source,
                "includes": script.includes,
                "variables": script.variables,
            }),
        )
    }

    pub fn describe(session: Option<&str>) -> Self {
        Self::new(CommandKind::Describe, json!({ "session": session }))
    }

    pub fn execute(session: Option<&str>, function: Option<&str>, args: Vec<Value>) -> Self {
        Self::new(
            CommandKind::Execute,
            json!({ "session": session, "function": function, "args": args }),
        )
    }

    pub fn unload(session: &str) -> Self {
        Self::new(CommandKind::Unload, json!({ "session": session }))
    }

    pub fn kill() -> Self {
        Self::new(CommandKind::Kill, json!({}))
    }

    /// Serialize to a single line without the terminator
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of `load`
#[derive(Debug, Clone, Deserialize)]
pub struct LoadPayload {
    pub session: String,
    pub source: String,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub includes: Option<Vec<String>>,
}

impl LoadPayload {
    pub fn into_source(self) -> (String, ScriptSource) {
        let script = ScriptSource {
            source: self.source,
            includes: self.includes.unwrap_or_default(),
            variables: self.variables.unwrap_or_default(),
        };
        (self.session, script)
    }
}

/// Payload of `describe`, `unload` and `kill`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPayload {
    #[serde(default)]
    pub session: Option<String>,
}

/// Payload of `execute`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutePayload {
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<Value>>,
}

/// A decoded, typed command
#[derive(Debug, Clone)]
pub enum Command {
    Load(LoadPayload),
    Describe(SessionPayload),
    Execute(ExecutePayload),
    Unload(SessionPayload),
    Kill(SessionPayload),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Load(_) => CommandKind::Load,
            Self::Describe(_) => CommandKind::Describe,
            Self::Execute(_) => CommandKind::Execute,
            Self::Unload(_) => CommandKind::Unload,
            Self::Kill(_) => CommandKind::Kill,
        }
    }
}

impl TryFrom<Request> for Command {
    type Error = ProtocolError;

    fn try_from(request: Request) -> Result<Self, Self::Error> {
        let name = request.command.ok_or(ProtocolError::MissingCommand)?;
        let kind =
            CommandKind::parse(&name).ok_or_else(|| ProtocolError::UnknownCommand(name.clone()))?;

        let payload = match request.payload {
            Value::Null => Value::Object(Map::new()),
            payload => payload,
        };

        Ok(match kind {
            CommandKind::Load => Self::Load(decode(kind, payload)?),
            CommandKind::Describe => Self::Describe(decode(kind, payload)?),
            CommandKind::Execute => Self::Execute(decode(kind, payload)?),
            CommandKind::Unload => Self::Unload(decode(kind, payload)?),
            CommandKind::Kill => Self::Kill(decode(kind, payload)?),
        })
    }
}

fn decode<T: DeserializeOwned>(command: CommandKind, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        command,
        reason: e.to_string(),
    })
}

/// Response to exactly one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result,
            error: None,
            stack: None,
            log: Vec::new(),
        }
    }

    /// Success without a result
    pub fn empty() -> Self {
        Self::success(Value::Null)
    }

    pub fn failure(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            ok: false,
            result: Value::Null,
            error: Some(message.into()),
            stack,
            log: Vec::new(),
        }
    }

    pub fn with_log(mut self, log: Vec<LogEntry>) -> Self {
        self.log = log;
        self
    }

    /// Serialize to a single line without the terminator
    ///
    /// Never fails: if the response cannot be encoded, a minimal error
    /// response is produced instead.
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                json!({
                    "ok": false,
                    "result": null,
                    "error": format!("response could not be encoded: {e}"),
                    "stack": null,
                    "log": [],
                })
                .to_string()
            }
        }
    }

    /// Parse a response line
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

impl From<ScriptError> for Response {
    fn from(error: ScriptError) -> Self {
        let stack = error.stack().map(str::to_string);
        Self::failure(error.to_string(), stack)
    }
}

impl From<ProtocolError> for Response {
    fn from(error: ProtocolError) -> Self {
        Self::failure(error.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execute_request() {
        let request = Request::parse(
            r#"{"command":"execute","payload":{"session":"s1","function":"greet","args":["bob"]}}"#,
        )
        .unwrap();

        let Command::Execute(payload) = Command::try_from(request).unwrap() else {
            panic!("expected execute");
        };
        assert_eq!(payload.session.as_deref(), Some("s1"));
        assert_eq!(payload.function.as_deref(), Some("greet"));
        assert_eq!(payload.args, Some(vec![json!("bob")]));
    }

    #[test]
    fn test_missing_payload_is_empty_object() {
        let request = Request::parse(r#"{"command":"kill"}"#).unwrap();
        assert!(matches!(Command::try_from(request), Ok(Command::Kill(_))));
    }

    #[test]
    fn test_malformed_and_unknown_requests() {
        assert!(matches!(
            Request::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Request::parse("[1, 2]"),
            Err(ProtocolError::Malformed(_))
        ));

        let missing = Request::parse(r#"{"payload":{}}"#).unwrap();
        assert!(matches!(
            Command::try_from(missing),
            Err(ProtocolError::MissingCommand)
        ));

        let unknown = Request::parse(r#"{"command":"reboot"}"#).unwrap();
        assert_eq!(
            Command::try_from(unknown).unwrap_err().to_string(),
            "unknown command: reboot"
        );
    }

    #[test]
    fn test_load_payload_requires_source() {
        let request = Request::parse(r#"{"command":"load","payload":{"session":"s1"}}"#).unwrap();
        let err = Command::try_from(request).unwrap_err();

        assert!(err.to_string().starts_with("invalid load payload"));
    }

    #[test]
    fn test_load_constructor_round_trips() {
        let script = ScriptSource::new("C").include("A").variable("x", json!(1));
        let request = Request::parse(&Request::load("s1", &script).to_line().unwrap()).unwrap();

        let Command::Load(payload) = Command::try_from(request).unwrap() else {
            panic!("expected load");
        };
        assert_eq!(payload.into_source(), ("s1".to_string(), script));
    }

    #[test]
    fn test_response_line_always_has_every_field() {
        let line = Response::empty().to_line();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(
            value,
            json!({"ok": true, "result": null, "error": null, "stack": null, "log": []})
        );
    }

    #[test]
    fn test_script_error_keeps_stack() {
        let response = Response::from(ScriptError::Thrown {
            message: "boom".into(),
            stack: Some("Error: boom\n    at f (s1:1:1)".into()),
        });

        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert!(response.stack.is_some());
    }
}
