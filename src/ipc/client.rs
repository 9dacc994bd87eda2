//! Host-side client for an engine subprocess
//!
//! The host owns the external deadline: if a response does not arrive in
//! time the subprocess is killed and the outstanding request counts as
//! failed.

use std::ffi::OsStr;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use async_io::Timer;
use futures_lite::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use smol::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;

use crate::ipc::protocol::{Request, Response};

/// Errors talking to an engine subprocess
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn engine: {0}")]
    Spawn(#[source] io::Error),

    #[error("request could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("engine I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("engine {0} pipe is not available")]
    MissingPipe(&'static str),

    #[error("engine exited before responding")]
    Exited,

    #[error("engine did not respond within {0:?}")]
    TimedOut(Duration),

    #[error("invalid response from engine: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// A running engine subprocess with piped stdio
pub struct EngineProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    timeout: Option<Duration>,
}

impl EngineProcess {
    /// Launch `program` with `args`; stderr is inherited so engine logs stay visible
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClientError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ClientError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ClientError::MissingPipe("stdout"))?;

        tracing::debug!(pid = child.id(), "engine process spawned");

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            timeout: None,
        })
    }

    /// Deadline for each request; on expiry the subprocess is killed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Send one request and wait for its response
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let mut line = request.to_line().map_err(ClientError::Encode)?;
        line.push('\n');

        let stdin = self.stdin.as_mut().ok_or(ClientError::MissingPipe("stdin"))?;
        let stdout = &mut self.stdout;
        let exchange = exchange(stdin, stdout, &line);

        let result = match self.timeout {
            Some(timeout) => {
                futures_lite::future::or(exchange, async {
                    Timer::after(timeout).await;
                    Err(ClientError::TimedOut(timeout))
                })
                .await
            }
            None => exchange.await,
        };

        if let Err(ClientError::TimedOut(timeout)) = &result {
            tracing::warn!(pid = self.child.id(), ?timeout, "engine timed out, killing it");
            if let Err(e) = self.child.kill() {
                tracing::debug!(error = %e, "failed to kill engine process");
            }
        }
        result
    }

    /// Like [`request`](Self::request), but folds every failure into an
    /// `ok:false` response
    pub async fn call(&mut self, request: &Request) -> Response {
        match self.request(request).await {
            Ok(response) => response,
            Err(e) => Response::failure(e.to_string(), None),
        }
    }

    /// Close the engine's stdin, which ends its serve loop
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Forcefully terminate the subprocess
    pub fn kill(&mut self) -> Result<(), ClientError> {
        self.child.kill()?;
        Ok(())
    }

    /// Wait for the subprocess to exit
    pub async fn wait(&mut self) -> Result<ExitStatus, ClientError> {
        Ok(self.child.status().await?)
    }
}

async fn exchange(
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    line: &str,
) -> Result<Response, ClientError> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;

    let mut reply = String::new();
    if stdout.read_line(&mut reply).await? == 0 {
        return Err(ClientError::Exited);
    }
    Ok(Response::parse(reply.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_missing_binary_fails() {
        let result = EngineProcess::spawn("/nonexistent/muzzle-engine", ["serve"]);
        assert!(matches!(result, Err(ClientError::Spawn(_))));
    }

    #[test]
    fn test_client_errors_render() {
        assert_eq!(
            ClientError::Exited.to_string(),
            "engine exited before responding"
        );
        assert_eq!(
            ClientError::TimedOut(Duration::from_millis(5)).to_string(),
            "engine did not respond within 5ms"
        );
    }
}
