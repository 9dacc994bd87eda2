//! Export shape of a loaded script

use crate::script::ScriptError;

/// What a script exposes to `describe` and `execute`, fixed at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptExports {
    /// The script itself is a function (`module.exports = fn` or a
    /// function-valued completion)
    Callable,
    /// Named exports, in definition order
    Namespace(Vec<String>),
}

impl ScriptExports {
    /// Resolve the requested function against the export shape
    ///
    /// Returns the name to invoke, with `""` standing for the script's
    /// default callable.
    pub fn resolve<'a>(&self, function: Option<&'a str>) -> Result<&'a str, ScriptError> {
        let requested = function.filter(|name| !name.is_empty());
        match (self, requested) {
            (Self::Callable, None) => Ok(""),
            (Self::Callable, Some(name)) => Err(ScriptError::NamedInvocation(name.to_string())),
            (Self::Namespace(_), None) => Err(ScriptError::AnonymousInvocation),
            (Self::Namespace(names), Some(name)) => {
                if names.iter().any(|export| export == name) {
                    Ok(name)
                } else {
                    Err(ScriptError::MissingFunction(name.to_string()))
                }
            }
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Callable)
    }

    pub fn names(&self) -> &[String] {
        match self {
            Self::Callable => &[],
            Self::Namespace(names) => names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callable_accepts_only_default_invocation() {
        let exports = ScriptExports::Callable;

        assert_eq!(exports.resolve(None).unwrap(), "");
        assert_eq!(exports.resolve(Some("")).unwrap(), "");
        assert!(matches!(
            exports.resolve(Some("run")),
            Err(ScriptError::NamedInvocation(name)) if name == "run"
        ));
    }

    #[test]
    fn test_namespace_requires_existing_name() {
        let exports = ScriptExports::Namespace(vec!["greet".into()]);

        assert_eq!(exports.resolve(Some("greet")).unwrap(), "greet");
        assert_eq!(
            exports.resolve(Some("missing")).unwrap_err().to_string(),
            "function missing does not exist"
        );
        assert_eq!(
            exports.resolve(None).unwrap_err().to_string(),
            "named exports but anonymous invocation requested"
        );
    }
}
