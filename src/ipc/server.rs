//! Newline-delimited JSON server
//!
//! Reads one request line, dispatches it, writes and flushes one response
//! line, and only then reads the next. Nothing is pipelined.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;

use futures_lite::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use futures_lite::FutureExt;

use crate::config::EngineConfig;
use crate::engine::{Engine, Flow};
use crate::error::EngineResult;
use crate::ipc::protocol::{ProtocolError, Response};
use crate::network::NetworkPolicy;

/// Why the serve loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// A `kill` request was answered
    Killed,
    /// The host closed its end of the stream
    EndOfInput,
    /// The dispatcher panicked; a best-effort error response was written
    Crashed,
}

/// Bytes read per step while skipping the rest of an oversize line
const DRAIN_CHUNK: u64 = 8 * 1024;

enum Frame {
    Line,
    TooLarge,
    Eof,
}

/// Engine server speaking the line protocol over any async byte stream
pub struct Server<N: NetworkPolicy + 'static> {
    engine: Engine<N>,
    max_request_bytes: usize,
}

impl<N: NetworkPolicy + 'static> Server<N> {
    pub fn new(config: EngineConfig<N>) -> Self {
        let max_request_bytes = config.max_request_bytes();
        Self {
            engine: Engine::new(config),
            max_request_bytes,
        }
    }

    /// Serve on the process's stdin and stdout
    pub async fn serve_stdio(&mut self) -> EngineResult<ServeOutcome> {
        let stdin = BufReader::new(blocking::Unblock::new(io::stdin()));
        let stdout = blocking::Unblock::new(io::stdout());
        self.serve(stdin, stdout).await
    }

    /// Serve requests from `reader`, answering on `writer`
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> EngineResult<ServeOutcome>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            single = self.engine.is_single(),
            max_request_bytes = self.max_request_bytes,
            "engine server started"
        );

        let mut buf = Vec::new();
        loop {
            match read_frame(&mut reader, &mut buf, self.max_request_bytes).await? {
                Frame::Eof => {
                    tracing::info!("end of input, shutting down");
                    return Ok(ServeOutcome::EndOfInput);
                }
                Frame::TooLarge => {
                    tracing::warn!(limit = self.max_request_bytes, "request line too large");
                    let response = Response::from(ProtocolError::TooLarge {
                        limit: self.max_request_bytes,
                    });
                    write_response(&mut writer, &response).await?;
                }
                Frame::Line => {
                    let line = match std::str::from_utf8(&buf) {
                        Ok(line) => line.trim_end_matches('\r'),
                        Err(e) => {
                            let response = Response::from(ProtocolError::Malformed(e.to_string()));
                            write_response(&mut writer, &response).await?;
                            continue;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let outcome = AssertUnwindSafe(self.engine.handle_line(line))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok((response, flow)) => {
                            write_response(&mut writer, &response).await?;
                            if flow == Flow::Terminate {
                                return Ok(ServeOutcome::Killed);
                            }
                        }
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            tracing::error!(message = %message, "dispatcher panicked");
                            let response =
                                Response::failure(format!("internal engine error: {message}"), None);
                            write_response(&mut writer, &response).await?;
                            return Ok(ServeOutcome::Crashed);
                        }
                    }
                }
            }
        }
    }
}

/// Read one `\n`-terminated frame into `buf`, without the terminator
///
/// A line longer than `limit` is consumed in full but not buffered.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<Frame> {
    buf.clear();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', buf)
        .await?;

    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(Frame::Line);
    }
    if buf.len() <= limit {
        // final line without a terminator
        return Ok(Frame::Line);
    }

    buf.clear();
    let mut rest = Vec::new();
    loop {
        rest.clear();
        let read = (&mut *reader)
            .take(DRAIN_CHUNK)
            .read_until(b'\n', &mut rest)
            .await?;
        if read == 0 || rest.last() == Some(&b'\n') {
            return Ok(Frame::TooLarge);
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> io::Result<()> {
    let mut line = response.to_line();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use futures_lite::io::Cursor;
    use serde_json::json;

    use super::*;
    use crate::script::ScriptSource;

    async fn run(config: EngineConfig, input: &str) -> (ServeOutcome, Vec<Response>) {
        serve_from(config, Cursor::new(input.as_bytes().to_vec())).await
    }

    async fn serve_from<R: AsyncBufRead + Unpin>(
        config: EngineConfig,
        reader: R,
    ) -> (ServeOutcome, Vec<Response>) {
        let mut server = Server::new(config);
        let mut output = Vec::new();
        let outcome = server.serve(reader, &mut output).await.unwrap();

        let responses = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| Response::parse(line).unwrap())
            .collect();
        (outcome, responses)
    }

    fn unblocked(input: &str) -> BufReader<blocking::Unblock<std::io::Cursor<Vec<u8>>>> {
        BufReader::new(blocking::Unblock::new(std::io::Cursor::new(
            input.as_bytes().to_vec(),
        )))
    }

    #[tokio::test]
    async fn test_one_response_per_request_in_order() {
        let input = concat!(
            r#"{"command":"load","payload":{"session":"s1","source":"module.exports = { add: (a, b) => a + b }"}}"#,
            "\n",
            r#"{"command":"execute","payload":{"session":"s1","function":"add","args":[2,3]}}"#,
            "\n",
            r#"{"command":"execute","payload":{"session":"s2","args":[]}}"#,
            "\n",
        );
        let (outcome, responses) = run(EngineConfig::new().unwrap(), input).await;

        assert_eq!(outcome, ServeOutcome::EndOfInput);
        assert_eq!(responses.len(), 3);
        assert!(responses[0].ok);
        assert_eq!(responses[1].result, json!(5));
        assert!(!responses[2].ok);
    }

    #[tokio::test]
    async fn test_kill_stops_reading() {
        let input = concat!(
            r#"{"command":"kill"}"#,
            "\n",
            r#"{"command":"describe","payload":{"session":"s1"}}"#,
            "\n",
        );
        let (outcome, responses) = run(EngineConfig::new().unwrap(), input).await;

        assert_eq!(outcome, ServeOutcome::Killed);
        assert_eq!(responses.len(), 1);
        assert!(responses[0].ok);
    }

    #[tokio::test]
    async fn test_blank_lines_ignored_and_garbage_answered() {
        let input = "\n   \r\nnot json\n{\"command\":\"kill\"}";
        let (outcome, responses) = run(EngineConfig::new().unwrap(), input).await;

        assert_eq!(outcome, ServeOutcome::Killed);
        assert_eq!(responses.len(), 2);
        assert!(!responses[0].ok);
        assert!(responses[1].ok);
    }

    #[tokio::test]
    async fn test_oversize_line_is_rejected_and_skipped() {
        let config = EngineConfig::builder().max_request_bytes(64).build().unwrap();
        let big = format!(
            r#"{{"command":"describe","payload":{{"session":"{}"}}}}"#,
            "x".repeat(200)
        );
        let input = format!("{big}\n{{\"command\":\"kill\"}}\n");
        let (outcome, responses) = run(config, &input).await;

        assert_eq!(outcome, ServeOutcome::Killed);
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0].error.as_deref(),
            Some("request exceeds the maximum size of 64 bytes")
        );
    }

    #[tokio::test]
    async fn test_single_shot_over_the_wire() {
        let config = EngineConfig::builder()
            .single(ScriptSource::new("(event) => { console.log('seen', event.id); return event.id * 10; }"))
            .build()
            .unwrap();
        let input = concat!(
            r#"{"command":"execute","payload":{"args":[{"id":4}]}}"#,
            "\n"
        );
        let (_, responses) = run(config, input).await;

        assert_eq!(responses[0].result, json!(40));
        assert_eq!(responses[0].log[0].message, "seen 4");
    }

    #[tokio::test]
    async fn test_blocking_stdin_reader_reaches_end_of_input() {
        let input = concat!(
            r#"{"command":"load","payload":{"session":"s1","source":"module.exports = { add: (a, b) => a + b }"}}"#,
            "\n",
            r#"{"command":"execute","payload":{"session":"s1","function":"add","args":[1,2]}}"#,
            "\n",
        );
        let (outcome, responses) = serve_from(EngineConfig::new().unwrap(), unblocked(input)).await;

        assert_eq!(outcome, ServeOutcome::EndOfInput);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].result, json!(3));
    }

    #[tokio::test]
    async fn test_blocking_reader_with_oversize_and_unterminated_lines() {
        let config = EngineConfig::builder().max_request_bytes(64).build().unwrap();
        let input = format!(
            "{}\n{}",
            "y".repeat(20_000),
            r#"{"command":"describe","payload":{"session":"s1"}}"#
        );
        let (outcome, responses) = serve_from(config, unblocked(&input)).await;

        assert_eq!(outcome, ServeOutcome::EndOfInput);
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0].error.as_deref(),
            Some("request exceeds the maximum size of 64 bytes")
        );
        assert_eq!(
            responses[1].error.as_deref(),
            Some("session s1 is not initialized")
        );
    }

    #[tokio::test]
    async fn test_read_frame_boundaries() {
        let mut reader = unblocked("abcd\nabcde\nabc");
        let mut buf = Vec::new();

        assert!(matches!(read_frame(&mut reader, &mut buf, 4).await.unwrap(), Frame::Line));
        assert_eq!(buf, b"abcd");
        assert!(matches!(
            read_frame(&mut reader, &mut buf, 4).await.unwrap(),
            Frame::TooLarge
        ));
        assert!(matches!(read_frame(&mut reader, &mut buf, 4).await.unwrap(), Frame::Line));
        assert_eq!(buf, b"abc");
        assert!(matches!(read_frame(&mut reader, &mut buf, 4).await.unwrap(), Frame::Eof));
        assert!(matches!(read_frame(&mut reader, &mut buf, 4).await.unwrap(), Frame::Eof));
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
