use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{CatchResultExt, Context, Ctx, Exception, Function, Module, Runtime, qjs};
use serde_json::{Map, Value};

use crate::capability::{
    CapabilitySet, HOST_CANCEL, HOST_EVAL, HOST_FETCH, HOST_LOG, HOST_TIMER,
};
use crate::config::ResourceLimits;
use crate::network::{FetchRequest, NetworkGate, NetworkGrant, NetworkPolicy};
use crate::script::harness::{self, LoadReport, Shape};
use crate::script::{LogCapture, ScriptContext, ScriptError, ScriptExports, TimerQueue};
use crate::stack::{SourceOffsetTranslator, include_line_count};

/// File name user code is compiled under
///
/// Only frames in this file survive stack rewriting, so it must not match
/// any name the engine uses for its own code or for `JSON.parse` input.
const SCRIPT_FILE: &CStr = c"<muzzle-script>";

/// Source of one script: the user body, fragments evaluated before it,
/// and globals injected ahead of both
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptSource {
    pub source: String,
    pub includes: Vec<String>,
    pub variables: Map<String, Value>,
}

impl ScriptSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn include(mut self, fragment: impl Into<String>) -> Self {
        self.includes.push(fragment.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// The text actually evaluated: includes joined by newlines, then the source
    pub fn combined(&self) -> String {
        if self.includes.is_empty() {
            return self.source.clone();
        }
        let mut code = self.includes.join("\n");
        code.push('\n');
        code.push_str(&self.source);
        code
    }
}

/// Builds isolated script contexts
///
/// Every call to [`load`](Self::load) creates a fresh QuickJS runtime, so
/// contexts never share a heap, globals, or timers.
pub struct ScriptLoader<N: NetworkPolicy> {
    prelude: String,
    capabilities: CapabilitySet,
    limits: ResourceLimits,
    policy: Arc<N>,
    fetch_timeout: Duration,
    logs: LogCapture,
}

impl<N: NetworkPolicy + 'static> ScriptLoader<N> {
    pub fn new(
        capabilities: CapabilitySet,
        limits: ResourceLimits,
        policy: Arc<N>,
        fetch_timeout: Duration,
        logs: LogCapture,
    ) -> Self {
        Self {
            prelude: capabilities.prelude(),
            capabilities,
            limits,
            policy,
            fetch_timeout,
            logs,
        }
    }

    /// Compile `script` into a new context; `label` names it in stack traces
    pub fn load(&self, label: &str, script: &ScriptSource) -> Result<ScriptContext, ScriptError> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Engine(e.to_string()))?;
        runtime.set_loader(DeniedModules, DeniedModules);
        if let Some(bytes) = self.limits.max_memory_bytes() {
            runtime.set_memory_limit(bytes);
        }
        if let Some(bytes) = self.limits.max_stack_bytes() {
            runtime.set_max_stack_size(bytes);
        }

        let deadline: Rc<Cell<Option<Instant>>> = Rc::default();
        let interrupt = Rc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            interrupt.get().is_some_and(|due| Instant::now() >= due)
        })));

        let context = Context::full(&runtime).map_err(|e| ScriptError::Engine(e.to_string()))?;
        let timers = TimerQueue::new();
        let grant = NetworkGrant::new();
        let gate = NetworkGate::new(Arc::clone(&self.policy), grant.clone(), self.fetch_timeout);

        context.with(|ctx| {
            install_host(&ctx, self.logs.clone(), timers.clone(), gate)
                .and_then(|()| ctx.eval::<(), _>(self.prelude.as_str()))
                .catch(&ctx)
                .map_err(|e| ScriptError::Engine(format!("prelude failed: {e}")))
        })?;

        let translator = SourceOffsetTranslator::new(Some(SCRIPT_FILE.to_string_lossy().into_owned()))
            .include_lines(include_line_count(&script.includes));

        if let Some(limit) = self.limits.max_execution_time() {
            deadline.set(Some(Instant::now() + limit));
        }
        let report = self.evaluate(&context, script);
        let expired = deadline.get().is_some_and(|due| Instant::now() >= due);
        deadline.set(None);
        timers.clear();

        if expired {
            return Err(ScriptError::TimedOut(
                self.limits.max_execution_time().unwrap_or_default().as_millis(),
            ));
        }

        let exports = match report? {
            LoadReport::Loaded {
                shape: Shape::Callable,
                ..
            } => ScriptExports::Callable,
            LoadReport::Loaded {
                shape: Shape::Namespace,
                names,
            } => ScriptExports::Namespace(names),
            LoadReport::Failed { error } => {
                tracing::debug!(label, message = %error.message, "script failed to compile");
                return Err(error.into_error(&translator, label));
            }
        };

        tracing::debug!(label, exports = ?exports, "script loaded");

        Ok(ScriptContext {
            label: label.to_string(),
            runtime,
            context,
            exports,
            translator,
            timers,
            deadline,
            time_limit: self.limits.max_execution_time(),
            grant,
            capabilities: self.capabilities.clone(),
        })
    }

    fn evaluate(&self, context: &Context, script: &ScriptSource) -> Result<LoadReport, ScriptError> {
        if !script.variables.is_empty() {
            let variables = serde_json::to_string(&script.variables)?;
            // injected names colliding with denied globals throw here
            harness::call::<_, ()>(context, "inject", (variables,)).map_err(|e| match e {
                ScriptError::Engine(message) => ScriptError::Thrown {
                    message,
                    stack: None,
                },
                other => other,
            })?;
        }
        harness::call_json(context, "load", (script.combined(),))
    }
}

/// Compile and run `code` as a global script named [`SCRIPT_FILE`]
///
/// Returns the completion value, like an indirect `eval`.
fn eval_script<'js>(ctx: &Ctx<'js>, code: String) -> rquickjs::Result<rquickjs::Value<'js>> {
    let code = CString::new(code)
        .map_err(|_| Exception::throw_syntax(ctx, "script contains a NUL character"))?;

    // SAFETY: both strings are NUL-terminated and outlive the call, and the
    // returned value is owned by the new `Value`.
    let value = unsafe {
        let raw = qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            code.as_ptr(),
            code.as_bytes().len() as _,
            SCRIPT_FILE.as_ptr(),
            qjs::JS_EVAL_TYPE_GLOBAL as _,
        );
        rquickjs::Value::from_raw(ctx.clone(), raw)
    };

    if value.is_exception() {
        return Err(rquickjs::Error::Exception);
    }
    Ok(value)
}

/// Resolver and loader for `import`, refusing every module
struct DeniedModules;

impl DeniedModules {
    fn deny(ctx: &Ctx<'_>, name: &str) -> rquickjs::Error {
        let name = name.strip_prefix("node:").unwrap_or(name);
        Exception::throw_message(
            ctx,
            &format!("access to module `{name}` is denied in the sandbox"),
        )
    }
}

impl Resolver for DeniedModules {
    fn resolve<'js>(&mut self, ctx: &Ctx<'js>, _base: &str, name: &str) -> rquickjs::Result<String> {
        Err(Self::deny(ctx, name))
    }
}

impl Loader for DeniedModules {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        Err(Self::deny(ctx, name))
    }
}

/// Register the raw host functions the prelude wraps and then removes
fn install_host<'js, N: NetworkPolicy + 'static>(
    ctx: &Ctx<'js>,
    logs: LogCapture,
    timers: TimerQueue,
    gate: NetworkGate<N>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        HOST_LOG,
        Function::new(ctx.clone(), move |level: String, message: String| {
            logs.record(level, message)
        })?,
    )?;

    let scheduler = timers.clone();
    globals.set(
        HOST_TIMER,
        Function::new(ctx.clone(), move |delay: f64| scheduler.schedule(delay))?,
    )?;

    globals.set(
        HOST_CANCEL,
        Function::new(ctx.clone(), move |id: u32| timers.cancel(id))?,
    )?;

    globals.set(
        HOST_EVAL,
        Function::new(ctx.clone(), |ctx: Ctx<'js>, code: String| eval_script(&ctx, code))?,
    )?;

    globals.set(
        HOST_FETCH,
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, request: String| -> rquickjs::Result<String> {
                let request: FetchRequest = serde_json::from_str(&request).map_err(|e| {
                    Exception::throw_message(&ctx, &format!("invalid fetch request: {e}"))
                })?;
                let response = gate
                    .fetch(request)
                    .map_err(|e| Exception::throw_message(&ctx, &e.to_string()))?;
                serde_json::to_string(&response)
                    .map_err(|e| Exception::throw_message(&ctx, &e.to_string()))
            },
        )?,
    )?;

    Ok(())
}
