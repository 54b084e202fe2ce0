//! Mock invoker for testing
//!
//! Records every call instead of spawning a process. Exit codes can be
//! queued per call, and an inspection hook sees the call while the
//! ephemeral files of the invocation still exist.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ToolInvoker, ToolOutput};
use crate::error::WorkerError;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub args: Vec<String>,
}

impl ToolCall {
    /// First argument (`dev`, `deploy`, `secret`, ...)
    pub fn command(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Values following each `-c`
    pub fn configs(&self) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|pair| pair[0] == "-c")
            .map(|pair| pair[1].as_str())
            .collect()
    }
}

type Hook = Arc<dyn Fn(&ToolCall) + Send + Sync>;

/// Records calls and returns queued exit codes (0 when the queue is empty)
#[derive(Clone, Default)]
pub struct MockInvoker {
    exit_codes: Arc<Mutex<VecDeque<i32>>>,
    calls: Arc<Mutex<Vec<ToolCall>>>,
    stdout: Vec<String>,
    hook: Option<Hook>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue exit codes for the next calls, in order
    pub fn with_exit_codes(self, codes: impl IntoIterator<Item = i32>) -> Self {
        lock(&self.exit_codes).extend(codes);
        self
    }

    /// Lines written to stdout on every call
    pub fn with_stdout(mut self, lines: &[&str]) -> Self {
        self.stdout = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Run `hook` during each call
    pub fn with_hook(mut self, hook: impl Fn(&ToolCall) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        lock(&self.calls).clone()
    }

    pub fn last_call(&self) -> Option<ToolCall> {
        lock(&self.calls).last().cloned()
    }
}

impl std::fmt::Debug for MockInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInvoker")
            .field("calls", &lock(&self.calls).len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    async fn run(&self, args: &[String], output: &mut dyn ToolOutput) -> Result<(), WorkerError> {
        let call = ToolCall { args: args.to_vec() };
        if let Some(hook) = &self.hook {
            hook(&call);
        }
        lock(&self.calls).push(call);

        for line in &self.stdout {
            output.stdout(line);
        }

        let code = lock(&self.exit_codes).pop_front().unwrap_or(0);
        if code == 0 {
            return Ok(());
        }
        let command = args.first().map(String::as_str).unwrap_or("mock");
        Err(WorkerError::tool_invocation(code, command, args))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
