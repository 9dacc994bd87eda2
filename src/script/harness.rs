//! Rust side of the `__muzzle` harness object installed by the prelude
//!
//! Every value crossing the boundary is a JSON string, so the reports
//! below are plain serde types.

use rquickjs::function::IntoArgs;
use rquickjs::{CatchResultExt, Context, FromJs, Function, Object};
use serde::Deserialize;
use serde_json::Value;

use crate::capability::HARNESS;
use crate::script::ScriptError;
use crate::stack::{FrameTranslator, rewrite_stack};

/// Call a method of the harness object
pub(crate) fn call<A, R>(context: &Context, method: &str, args: A) -> Result<R, ScriptError>
where
    A: for<'js> IntoArgs<'js>,
    R: for<'js> FromJs<'js>,
{
    context.with(|ctx| {
        let result = ctx
            .globals()
            .get::<_, Object>(HARNESS)
            .and_then(|harness| harness.get::<_, Function>(method))
            .and_then(|function| function.call::<A, R>(args));
        result
            .catch(&ctx)
            .map_err(|e| ScriptError::Engine(e.to_string()))
    })
}

/// Call a harness method returning a JSON report
pub(crate) fn call_json<A, T>(context: &Context, method: &str, args: A) -> Result<T, ScriptError>
where
    A: for<'js> IntoArgs<'js>,
    T: for<'de> Deserialize<'de>,
{
    let raw: String = call(context, method, args)?;
    serde_json::from_str(&raw)
        .map_err(|e| ScriptError::Engine(format!("malformed harness report from `{method}`: {e}")))
}

/// An error value as seen from inside the script
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorInfo {
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Convert into a script error with its trace rewritten for `label`
    pub fn into_error(self, translator: &dyn FrameTranslator, label: &str) -> ScriptError {
        let header = match &self.name {
            Some(name) => format!("{name}: {}", self.message),
            None => self.message.clone(),
        };
        let stack = self
            .stack
            .map(|stack| rewrite_stack(&header, &stack, translator, label));
        ScriptError::Thrown {
            message: self.message,
            stack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Shape {
    Callable,
    Namespace,
}

/// Result of `__muzzle.load`
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum LoadReport {
    Loaded { shape: Shape, names: Vec<String> },
    Failed { error: ErrorInfo },
}

/// Result of `__muzzle.take`
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum TaskReport {
    Idle,
    Pending,
    Fulfilled { value: Value },
    Rejected { error: ErrorInfo },
    Unserializable { error: ErrorInfo },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::SourceOffsetTranslator;

    #[test]
    fn test_task_reports_decode() {
        let report: TaskReport =
            serde_json::from_str(r#"{"status":"fulfilled","value":{"a":1}}"#).unwrap();
        assert!(matches!(report, TaskReport::Fulfilled { value } if value["a"] == 1));

        let report: TaskReport = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert!(matches!(report, TaskReport::Pending));
    }

    #[test]
    fn test_load_report_decodes_shape() {
        let report: LoadReport =
            serde_json::from_str(r#"{"status":"loaded","shape":"namespace","names":["a"]}"#)
                .unwrap();
        assert!(matches!(
            report,
            LoadReport::Loaded { shape: Shape::Namespace, ref names } if names == &["a"]
        ));
    }

    #[test]
    fn test_error_info_without_stack() {
        let info = ErrorInfo {
            name: None,
            message: "plain value".into(),
            stack: None,
        };
        let error = info.into_error(&SourceOffsetTranslator::new(None), "s1");

        assert_eq!(error.to_string(), "plain value");
        assert_eq!(error.stack(), None);
    }

    #[test]
    fn test_error_info_rewrites_stack() {
        let info = ErrorInfo {
            name: Some("TypeError".into()),
            message: "bad".into(),
            stack: Some("    at run (<muzzle-script>:4:2)\n    at __muzzle_call (eval_script:1:1)".into()),
        };
        let translator = SourceOffsetTranslator::new(Some("<muzzle-script>".into())).include_lines(1);
        let error = info.into_error(&translator, "s1");

        assert_eq!(error.stack(), Some("TypeError: bad\n    at run (s1:3:2)"));
    }
}
