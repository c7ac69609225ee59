//! Tools backed by an external process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::debug;

use crate::descriptor::InvocationMode;
use crate::schema::ValueType;
use crate::sink::{Chunk, ChunkKind, ChunkSink};
use crate::tool::{Tool, ToolError, ToolResult};

/// Runs a program per invocation.
///
/// The validated arguments are written to stdin as one JSON object. In
/// synchronous mode the whole of stdout is the result; in streaming mode each
/// stdout line is a chunk. The child is killed if the invocation is dropped.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: PathBuf,
    mode: InvocationMode,
    returns: ValueType,
}

/// Structured line a streaming process may print.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamLine {
    Chunk(Chunk),
    Result { result: Value },
}

impl CommandTool {
    /// Creates a command tool running `program` from `working_dir`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: working_dir.into(),
            mode: InvocationMode::Synchronous,
            returns: ValueType::Any,
        }
    }

    /// Sets the program arguments.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds environment variables for the child.
    #[must_use]
    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Sets the invocation mode.
    #[must_use]
    pub fn mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the declared result type, which controls stdout decoding.
    #[must_use]
    pub fn returns(mut self, returns: ValueType) -> Self {
        self.returns = returns;
        self
    }

    fn decode(&self, stdout: &str) -> ToolResult<Value> {
        let trimmed = stdout.trim_end_matches(['\n', '\r']);
        match self.returns {
            ValueType::String => Ok(Value::String(trimmed.to_owned())),
            ValueType::Any if trimmed.trim().is_empty() => Ok(Value::Null),
            ValueType::Any => Ok(serde_json::from_str(trimmed)
                .unwrap_or_else(|_| Value::String(trimmed.to_owned()))),
            _ => serde_json::from_str(trimmed)
                .map_err(|err| ToolError::internal(format!("process printed invalid JSON: {err}"))),
        }
    }

    async fn read_streaming(&self, stdout: ChildStdout, sink: &ChunkSink) -> ToolResult<Value> {
        let mut lines = BufReader::new(stdout).lines();
        let mut collected = String::new();
        let mut result = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| ToolError::internal(format!("failed to read stdout: {err}")))?
        {
            match serde_json::from_str::<StreamLine>(&line) {
                Ok(StreamLine::Chunk(chunk)) => {
                    if chunk.kind == ChunkKind::OutputDelta {
                        collected.push_str(&chunk.delta);
                    }
                    sink.emit(chunk).await?;
                }
                Ok(StreamLine::Result { result: value }) => result = Some(value),
                Err(_) => {
                    let delta = format!("{line}\n");
                    collected.push_str(&delta);
                    sink.output_delta(delta).await?;
                }
            }
        }

        Ok(result.unwrap_or(Value::String(collected)))
    }
}

async fn read_stdout(mut stdout: ChildStdout) -> ToolResult<String> {
    let mut bytes = Vec::new();
    stdout
        .read_to_end(&mut bytes)
        .await
        .map_err(|err| ToolError::internal(format!("failed to read stdout: {err}")))?;
    String::from_utf8(bytes).map_err(|err| {
        ToolError::internal(format!("process wrote invalid UTF-8 to stdout: {err}"))
    })
}

/// Best-effort read used for stderr, which only feeds logs.
async fn drain<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = String::new();
    if let Err(err) = reader.read_to_string(&mut buf).await {
        debug!(error = %err, "failed to drain process output");
    }
    buf
}

#[async_trait]
impl Tool for CommandTool {
    async fn invoke(&self, input: Value, sink: ChunkSink) -> ToolResult<Value> {
        let program = self.program.display().to_string();
        let payload = serde_json::to_vec(&input)
            .map_err(|err| ToolError::internal(format!("failed to encode arguments: {err}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ToolError::internal(format!("failed to spawn `{program}`: {err}")))?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ToolError::internal("process pipes unavailable"));
        };

        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });
        let stderr = tokio::spawn(drain(stderr));

        let output = match self.mode {
            InvocationMode::Synchronous => {
                read_stdout(stdout).await.and_then(|text| self.decode(&text))
            }
            InvocationMode::Streaming => self.read_streaming(stdout, &sink).await,
        };

        if output.is_err() {
            // Stops a child whose consumer vanished mid-stream.
            let _ = child.start_kill();
        }

        let status = child
            .wait()
            .await
            .map_err(|err| ToolError::internal(format!("failed to wait for `{program}`: {err}")))?;

        if let Ok(Err(err)) = writer.await {
            debug!(program = %program, error = %err, "process did not consume its input");
        }
        let stderr = stderr.await.unwrap_or_default();
        if !stderr.trim().is_empty() {
            debug!(program = %program, stderr = %stderr.trim_end(), "tool process stderr");
        }

        let output = output?;
        if !status.success() {
            return Err(ToolError::internal(format!("`{program}` exited with {status}")));
        }
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::num::NonZeroUsize;
    use std::time::Duration;

    use serde_json::json;

    fn sh(script: &str) -> CommandTool {
        CommandTool::new("sh", std::env::temp_dir()).args(vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn passes_arguments_on_stdin() {
        let tool = sh("cat").returns(ValueType::Object);
        let output = tool
            .invoke(json!({ "location": "London" }), ChunkSink::discard())
            .await
            .unwrap();
        assert_eq!(output, json!({ "location": "London" }));
    }

    #[tokio::test]
    async fn string_results_are_trimmed_text() {
        let tool = sh("echo 'The weather in London is sunny'").returns(ValueType::String);
        let output = tool.invoke(json!({}), ChunkSink::discard()).await.unwrap();
        assert_eq!(output, json!("The weather in London is sunny"));
    }

    #[tokio::test]
    async fn typed_results_require_json() {
        let tool = sh("echo not-json").returns(ValueType::Integer);
        let err = tool.invoke(json!({}), ChunkSink::discard()).await.unwrap_err();
        assert!(matches!(err, ToolError::Internal { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_output_is_internal_failure() {
        for returns in [ValueType::String, ValueType::Any] {
            let tool = sh(r"printf 'London \377\376 sunny'").returns(returns);
            let err = tool.invoke(json!({}), ChunkSink::discard()).await.unwrap_err();
            assert!(matches!(err, ToolError::Internal { .. }), "{returns:?}: {err:?}");
        }
    }

    fn process_running(pid: &str) -> bool {
        let output = std::process::Command::new("ps")
            .args(["-o", "stat=", "-p", pid])
            .output()
            .unwrap();
        let stat = String::from_utf8_lossy(&output.stdout);
        let stat = stat.trim();
        !stat.is_empty() && !stat.starts_with('Z')
    }

    #[tokio::test]
    async fn timed_out_invocation_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let tool = sh(&format!("echo $$ > '{}'; exec sleep 30", pidfile.display()));

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            tool.invoke(json!({}), ChunkSink::discard()),
        )
        .await;
        assert!(outcome.is_err());

        let pid = std::fs::read_to_string(&pidfile).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());

        let mut attempts = 0;
        while process_running(pid) {
            attempts += 1;
            assert!(attempts < 100, "process {pid} still running");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn non_zero_exit_is_internal_failure() {
        let tool = sh("echo secret-detail >&2; exit 3");
        let err = tool.invoke(json!({}), ChunkSink::discard()).await.unwrap_err();
        match err {
            ToolError::Internal { reason } => assert!(!reason.contains("secret-detail")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_lines_become_chunks() {
        let script = r#"
echo '{"kind":"output_delta","delta":"A"}'
echo '{"kind":"tool_argument_delta","delta":"{}"}'
echo plain
echo '{"result":{"ok":true}}'
"#;
        let tool = sh(script).mode(InvocationMode::Streaming);
        let (sink, mut rx) = ChunkSink::channel(NonZeroUsize::new(8).unwrap());

        let output = tool.invoke(json!({}), sink).await.unwrap();
        assert_eq!(output, json!({ "ok": true }));

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                Chunk::output("A"),
                Chunk::tool_argument("{}"),
                Chunk::output("plain\n"),
            ]
        );
    }

    #[tokio::test]
    async fn streaming_without_result_returns_collected_text() {
        let tool = sh("echo one; echo two").mode(InvocationMode::Streaming);
        let (sink, _rx) = ChunkSink::channel(NonZeroUsize::new(8).unwrap());
        let output = tool.invoke(json!({}), sink).await.unwrap();
        assert_eq!(output, json!("one\ntwo\n"));
    }
}
