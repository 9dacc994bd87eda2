use thiserror::Error;

/// Outcome of a failed load, describe or execute inside a script context
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script threw, rejected, or failed to compile
    #[error("{message}")]
    Thrown {
        message: String,
        stack: Option<String>,
    },

    #[error("function {0} does not exist")]
    MissingFunction(String),

    #[error("export {0} is not a function")]
    NotAFunction(String),

    #[error("named exports but anonymous invocation requested")]
    AnonymousInvocation,

    #[error("script exports an anonymous function but function {0} was requested")]
    NamedInvocation(String),

    #[error("result is not serializable: {0}")]
    Unserializable(String),

    #[error("function returned a promise that never settled")]
    NeverSettled,

    #[error("execution exceeded the time limit of {0}ms")]
    TimedOut(u128),

    #[error("arguments could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("script engine failure: {0}")]
    Engine(String),
}

impl ScriptError {
    /// Rewritten stack trace, when the failure came from script code
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Thrown { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
