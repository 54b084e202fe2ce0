//! External tool invocation
//!
//! The deployment tool is an opaque subprocess behind the [`ToolInvoker`]
//! trait:
//! - [`ProcessRunner`] spawns the real binary and streams its output
//! - [`MockInvoker`] records calls and returns scripted exit codes
//!
//! Argument lists are built by the `*_args` helpers so every caller speaks
//! the same CLI dialect.

mod mock;
mod runner;

pub use mock::{MockInvoker, ToolCall};
pub use runner::{ProcessRunner, TIMEOUT_EXIT_CODE};

use std::path::Path;

use async_trait::async_trait;

use crate::error::WorkerError;

/// Tool binary used when none is configured
pub const DEFAULT_TOOL: &str = "wrangler";

/// Receives tool output line by line as it arrives
pub trait ToolOutput: Send {
    fn stdout(&mut self, line: &str);
    fn stderr(&mut self, line: &str);
}

/// Forwards tool output to this process's stdout/stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ToolOutput for Passthrough {
    fn stdout(&mut self, line: &str) {
        println!("{}", line);
    }

    fn stderr(&mut self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Keeps tool output in memory
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ToolOutput for CapturedOutput {
    fn stdout(&mut self, line: &str) {
        self.stdout.push(line.to_string());
    }

    fn stderr(&mut self, line: &str) {
        self.stderr.push(line.to_string());
    }
}

/// Runs the deployment tool
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run with `args`; `Ok` only on exit code 0
    async fn run(&self, args: &[String], output: &mut dyn ToolOutput) -> Result<(), WorkerError>;
}

/// Tool subcommand for a worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Dev,
    Deploy,
}

impl RunCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunCommand::Dev => "dev",
            RunCommand::Deploy => "deploy",
        }
    }
}

/// `<dev|deploy> -c <cfg>... [--env <env>]`
pub fn run_args<P: AsRef<Path>>(command: RunCommand, configs: &[P], env: Option<&str>) -> Vec<String> {
    let mut args = vec![command.as_str().to_string()];
    for config in configs {
        args.push("-c".to_string());
        args.push(config.as_ref().display().to_string());
    }
    if let Some(env) = env {
        args.push("--env".to_string());
        args.push(env.to_string());
    }
    args
}

/// `secret bulk <file> --config <cfg> --env <env>`
pub fn secret_bulk_args(secrets_file: &Path, config: &Path, env: &str) -> Vec<String> {
    vec![
        "secret".to_string(),
        "bulk".to_string(),
        secrets_file.display().to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--env".to_string(),
        env.to_string(),
    ]
}

pub fn whoami_args() -> Vec<String> {
    vec!["whoami".to_string()]
}
