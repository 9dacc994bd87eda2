use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_io::Timer;
use rquickjs::{Context, Runtime};
use serde_json::Value;

use crate::capability::CapabilitySet;
use crate::network::{GrantGuard, NetworkGrant};
use crate::script::harness::{self, TaskReport};
use crate::script::{ScriptError, ScriptExports, TimerQueue};
use crate::stack::SourceOffsetTranslator;

/// A loaded script, owned by exactly one session
///
/// Holds its own QuickJS runtime; nothing in here is shared with other
/// sessions. Not `Send`: contexts live on the dispatcher thread.
pub struct ScriptContext {
    pub(super) label: String,
    pub(super) runtime: Runtime,
    pub(super) context: Context,
    pub(super) exports: ScriptExports,
    pub(super) translator: SourceOffsetTranslator,
    pub(super) timers: TimerQueue,
    pub(super) deadline: Rc<Cell<Option<Instant>>>,
    pub(super) time_limit: Option<Duration>,
    pub(super) grant: NetworkGrant,
    pub(super) capabilities: CapabilitySet,
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("label", &self.label)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl ScriptContext {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn exports(&self) -> &ScriptExports {
        &self.exports
    }

    /// Exported names with their `typeof`, plus the value for non-functions
    pub fn describe(&self) -> Result<Value, ScriptError> {
        self.arm_deadline();
        let result = harness::call_json::<_, Value>(&self.context, "describe", ());
        let expired = self.deadline_passed();
        self.deadline.set(None);
        if expired {
            return Err(self.timed_out());
        }
        result
    }

    /// Invoke `function` (or the default callable) and wait for it to settle
    pub async fn execute(
        &self,
        function: Option<&str>,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        let name = self.exports.resolve(function)?;
        if !name.is_empty() {
            let kind: String = harness::call(&self.context, "kind", (name.to_string(),))?;
            if kind != "function" {
                return Err(ScriptError::NotAFunction(name.to_string()));
            }
        }

        let _guard = self.grant_for(name);
        self.arm_deadline();

        let mut result = self.run(name, args).await;
        if self.deadline_passed() {
            result = Err(self.timed_out());
        }

        self.deadline.set(None);
        self.timers.clear();
        if let Err(e) = harness::call::<_, ()>(&self.context, "reset", ()) {
            tracing::warn!(label = %self.label, error = %e, "failed to reset script state");
        }

        result
    }

    async fn run(&self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let args = serde_json::to_string(args)?;
        harness::call::<_, ()>(&self.context, "invoke", (name.to_string(), args))?;

        loop {
            self.drain_jobs()?;

            match harness::call_json::<_, TaskReport>(&self.context, "take", ())? {
                TaskReport::Pending => {}
                TaskReport::Fulfilled { value } => return Ok(value),
                TaskReport::Rejected { error } => {
                    return Err(error.into_error(&self.translator, &self.label));
                }
                TaskReport::Unserializable { error } => {
                    return Err(ScriptError::Unserializable(error.message));
                }
                TaskReport::Idle => {
                    return Err(ScriptError::Engine("no invocation in progress".to_string()));
                }
            }

            let Some(due) = self.timers.next_due() else {
                return Err(ScriptError::NeverSettled);
            };

            match self.deadline.get() {
                Some(deadline) if deadline < due => {
                    Timer::at(deadline).await;
                    return Err(self.timed_out());
                }
                _ => {
                    Timer::at(due).await;
                }
            }

            while let Some(id) = self.timers.pop_due(Instant::now()) {
                let fired: bool = harness::call(&self.context, "fireTimer", (id,))?;
                if !fired {
                    tracing::trace!(label = %self.label, id, "timer was cleared before firing");
                }
            }
        }
    }

    fn drain_jobs(&self) -> Result<(), ScriptError> {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(exception) => {
                    // The job's context comes back without a reference of its own.
                    // SAFETY: the pointer belongs to a live context of this runtime and
                    // the added reference is released when `exception` drops.
                    unsafe { rquickjs::qjs::JS_DupContext(exception.0.as_raw().as_ptr()) };
                    exception.0.with(|ctx| drop(ctx.catch()));
                    drop(exception);

                    if self.deadline_passed() {
                        return Err(self.timed_out());
                    }
                    return Err(ScriptError::Engine(
                        "uncaught exception in a pending job".to_string(),
                    ));
                }
            }
        }
    }

    fn grant_for(&self, name: &str) -> Option<GrantGuard> {
        self.capabilities
            .grants_network(name)
            .then(|| self.grant.grant(name))
    }

    fn arm_deadline(&self) {
        if let Some(limit) = self.time_limit {
            self.deadline.set(Some(Instant::now() + limit));
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline
            .get()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn timed_out(&self) -> ScriptError {
        ScriptError::TimedOut(self.time_limit.unwrap_or_default().as_millis())
    }
}
