//! Real subprocess invocation

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

use super::{ToolInvoker, ToolOutput, DEFAULT_TOOL};
use crate::error::{WorkerError, GENERIC_FAILURE};

/// Exit code reported when the tool is killed after its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Spawns the tool binary, stdin inherited, stdout/stderr streamed per line
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the tool when it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

#[async_trait]
impl ToolInvoker for ProcessRunner {
    #[instrument(skip_all, fields(program = %self.program, command = ?args.first()))]
    async fn run(&self, args: &[String], output: &mut dyn ToolOutput) -> Result<(), WorkerError> {
        let command = args.first().cloned().unwrap_or_else(|| self.program.clone());

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::tool_spawn(e, command.as_str(), args))?;
        debug!(pid = ?child.id(), "tool started");

        let status = match self.timeout {
            None => stream(&mut child, output).await,
            Some(limit) => match tokio::time::timeout(limit, stream(&mut child, output)).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill timed out tool");
                    }
                    return Err(WorkerError::tool_invocation(TIMEOUT_EXIT_CODE, command.as_str(), args)
                        .with_message(format!(
                            "command '{}' timed out after {}s",
                            command,
                            limit.as_secs()
                        )));
                }
            },
        }
        .map_err(|e| WorkerError::tool_spawn(e, command.as_str(), args))?;

        let code = exit_code(&status);
        debug!(code, "tool exited");
        if status.success() {
            Ok(())
        } else {
            Err(WorkerError::tool_invocation(code, command, args))
        }
    }
}

/// Forward both pipes until they close, then reap the child
async fn stream(child: &mut Child, output: &mut dyn ToolOutput) -> std::io::Result<ExitStatus> {
    let mut stdout = child.stdout.take().map(OutputPipe::new);
    let mut stderr = child.stderr.take().map(OutputPipe::new);

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => output.stdout(&line),
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Some(line) => output.stderr(&line),
                None => stderr = None,
            },
        }
    }

    child.wait().await
}

async fn next_line<R: AsyncRead + Unpin>(pipe: &mut Option<OutputPipe<R>>) -> Option<String> {
    pipe.as_mut()?.next_line().await
}

/// Line reader over a tool pipe.
///
/// Bytes are decoded lossily. The pipe stays open until EOF so the tool
/// never writes into a closed pipe.
struct OutputPipe<R> {
    reader: BufReader<R>,
    // survives a cancelled read inside select!
    pending: Vec<u8>,
    broken: bool,
}

impl<R: AsyncRead + Unpin> OutputPipe<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            broken: false,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        loop {
            if self.broken {
                if let Err(e) = tokio::io::copy_buf(&mut self.reader, &mut tokio::io::sink()).await {
                    debug!(error = %e, "tool output drain ended");
                }
                return None;
            }
            match self.reader.read_until(b'\n', &mut self.pending).await {
                Ok(0) if self.pending.is_empty() => return None,
                Ok(_) => return Some(self.take_line()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "unreadable tool output, discarding the rest");
                    self.pending.clear();
                    self.broken = true;
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

/// Exit code, or 128 + signal when the tool was killed by a signal
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    GENERIC_FAILURE
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, SPAWN_FAILURE};
    use crate::process::CapturedOutput;

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_string(), body.to_string()]
    }

    #[tokio::test]
    async fn streams_both_pipes() {
        let runner = ProcessRunner::new("sh");
        let mut output = CapturedOutput::default();
        runner
            .run(&script("echo one; echo two >&2; echo three"), &mut output)
            .await
            .unwrap();
        assert_eq!(output.stdout, ["one", "three"]);
        assert_eq!(output.stderr, ["two"]);
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_break_the_pipe() {
        let runner = ProcessRunner::new("sh");
        let mut output = CapturedOutput::default();
        let body = "printf 'ok\\n\\377\\n'; sleep 0.3; \
                    i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done; exit 0";
        runner.run(&script(body), &mut output).await.unwrap();

        assert_eq!(output.stdout.len(), 2002);
        assert_eq!(output.stdout[0], "ok");
        assert_eq!(output.stdout[1], "\u{FFFD}");
        assert_eq!(output.stdout[2001], "line1999");
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_code_and_args() {
        let runner = ProcessRunner::new("sh");
        let args = script("exit 7");
        let err = runner.run(&args, &mut CapturedOutput::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
        assert_eq!(err.exit_code(), Some(7));
        assert_eq!(err.command(), Some("-c"));
        assert_eq!(err.args(), args.as_slice());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        let runner = ProcessRunner::new("monocf-no-such-tool");
        let err = runner
            .run(&["dev".to_string()], &mut CapturedOutput::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolSpawn);
        assert_eq!(err.exit_code(), Some(SPAWN_FAILURE));
        assert_eq!(err.command(), Some("dev"));
    }

    #[tokio::test]
    async fn timeout_kills_the_tool() {
        let runner = ProcessRunner::new("sh").with_timeout(Some(Duration::from_millis(200)));
        let err = runner
            .run(&script("sleep 5"), &mut CapturedOutput::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
        assert_eq!(err.exit_code(), Some(TIMEOUT_EXIT_CODE));
        assert!(err.message().contains("timed out"));
    }
}
