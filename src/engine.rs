//! Command dispatcher
//!
//! The [`Engine`] decodes one request at a time, routes it to the session
//! state it targets, and always produces exactly one [`Response`]. Log
//! output captured while the command runs is attached to that response.

use std::sync::Arc;

use crate::config::{EngineConfig, EngineMode};
use crate::ipc::{Command, CommandKind, ExecutePayload, ProtocolError, Request, Response};
use crate::network::NetworkPolicy;
use crate::script::{LogCapture, ScriptContext, ScriptError, ScriptLoader, ScriptSource};
use crate::session::SessionRegistry;

/// Label used in stack traces for the implicit single-shot session
pub const SINGLE_SESSION_LABEL: &str = "script";

/// Whether the server keeps reading after a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

enum Sessions {
    Multi(SessionRegistry),
    Single(SingleShot),
}

/// The implicit session of single-shot mode
struct SingleShot {
    script: ScriptSource,
    context: Option<ScriptContext>,
}

impl SingleShot {
    /// Compile on first use; a failed compile is retried on the next call
    fn context<N: NetworkPolicy + 'static>(
        &mut self,
        loader: &ScriptLoader<N>,
    ) -> Result<&ScriptContext, ScriptError> {
        if self.context.is_none() {
            let context = loader.load(SINGLE_SESSION_LABEL, &self.script)?;
            tracing::info!("single-shot script compiled");
            self.context = Some(context);
        }
        self.context
            .as_ref()
            .ok_or_else(|| ScriptError::Engine("single-shot context missing".to_string()))
    }
}

/// Dispatches protocol commands against loaded script contexts
pub struct Engine<N: NetworkPolicy + 'static> {
    loader: ScriptLoader<N>,
    sessions: Sessions,
    logs: LogCapture,
}

impl<N: NetworkPolicy + 'static> Engine<N> {
    pub fn new(config: EngineConfig<N>) -> Self {
        let (network, capabilities, limits, mode, fetch_timeout) = config.into_parts();
        let logs = LogCapture::new();
        let loader = ScriptLoader::new(
            capabilities,
            limits,
            Arc::new(network),
            fetch_timeout,
            logs.clone(),
        );
        let sessions = match mode {
            EngineMode::Multi => Sessions::Multi(SessionRegistry::new()),
            EngineMode::Single(script) => Sessions::Single(SingleShot {
                script,
                context: None,
            }),
        };

        Self {
            loader,
            sessions,
            logs,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self.sessions, Sessions::Single(_))
    }

    /// Handle one raw request line
    pub async fn handle_line(&mut self, line: &str) -> (Response, Flow) {
        match Request::parse(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed request");
                (Response::from(e), Flow::Continue)
            }
        }
    }

    /// Handle one decoded request
    pub async fn dispatch(&mut self, request: Request) -> (Response, Flow) {
        let command = match Command::try_from(request) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting request");
                return (Response::from(e), Flow::Continue);
            }
        };

        let kind = command.kind();
        tracing::debug!(command = %kind, "dispatching");

        self.logs.begin();
        let (response, flow) = self.run(command).await;
        let log = self.logs.finish();

        if !response.ok {
            tracing::debug!(command = %kind, error = ?response.error, "command failed");
        }
        (response.with_log(log), flow)
    }

    async fn run(&mut self, command: Command) -> (Response, Flow) {
        let response = match command {
            Command::Load(payload) => {
                let (session, script) = payload.into_source();
                self.load(session, &script)
            }
            Command::Describe(payload) => {
                match self.context(CommandKind::Describe, payload.session) {
                    Ok(context) => context
                        .describe()
                        .map_or_else(Response::from, Response::success),
                    Err(response) => response,
                }
            }
            Command::Execute(payload) => self.execute(payload).await,
            Command::Unload(payload) => self.unload(payload.session),
            Command::Kill(_) => {
                tracing::info!("kill requested, terminating");
                return (Response::empty(), Flow::Terminate);
            }
        };
        (response, Flow::Continue)
    }

    fn load(&mut self, session: String, script: &ScriptSource) -> Response {
        let Sessions::Multi(registry) = &mut self.sessions else {
            return ProtocolError::UnsupportedInMode(CommandKind::Load).into();
        };

        match self.loader.load(&session, script) {
            Ok(context) => {
                if registry.insert(session.clone(), context).is_some() {
                    tracing::info!(session = %session, "session reloaded");
                } else {
                    tracing::info!(session = %session, "session loaded");
                }
                Response::empty()
            }
            Err(e) => {
                // a failed reload must not leave the previous script running
                if registry.remove(&session).is_ok() {
                    tracing::info!(session = %session, "previous session discarded after failed load");
                }
                Response::from(e)
            }
        }
    }

    async fn execute(&mut self, payload: ExecutePayload) -> Response {
        let ExecutePayload {
            session,
            function,
            args,
        } = payload;
        let args = args.unwrap_or_default();

        let context = match self.context(CommandKind::Execute, session) {
            Ok(context) => context,
            Err(response) => return response,
        };

        match context.execute(function.as_deref(), &args).await {
            Ok(value) => Response::success(value),
            Err(e) => Response::from(e),
        }
    }

    fn unload(&mut self, session: Option<String>) -> Response {
        let Sessions::Multi(registry) = &mut self.sessions else {
            return ProtocolError::UnsupportedInMode(CommandKind::Unload).into();
        };
        let Some(session) = session else {
            return ProtocolError::MissingSession(CommandKind::Unload).into();
        };

        match registry.remove(&session) {
            Ok(_) => {
                tracing::info!(session = %session, "session unloaded");
                Response::empty()
            }
            Err(e) => e.into(),
        }
    }

    /// Resolve the context a command targets
    fn context(
        &mut self,
        kind: CommandKind,
        session: Option<String>,
    ) -> Result<&ScriptContext, Response> {
        match &mut self.sessions {
            Sessions::Multi(registry) => {
                let session = session.ok_or(ProtocolError::MissingSession(kind))?;
                Ok(registry.get(&session)?)
            }
            Sessions::Single(single) => Ok(single.context(&self.loader)?),
        }
    }
}
