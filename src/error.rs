//! Error type with fix suggestions
//!
//! Every failure is a [`WorkerError`] tagged with an [`ErrorKind`]. Tool
//! failures also carry the exit code, command and arguments so the CLI can
//! exit with the tool's own code.

use std::fmt;

use thiserror::Error;

/// Exit code used for every failure that is not a tool failure
pub const GENERIC_FAILURE: i32 = 1;

/// Exit code recorded when the tool process could not be started
pub const SPAWN_FAILURE: i32 = -1;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing CLI/project inputs
    Configuration,
    /// Reading, writing or deleting a config or env artifact failed
    FileOperation,
    /// A declared dependency worker (or its config) is missing, or bindings form a cycle
    ServiceBinding,
    /// Composition or merge failure not otherwise classified
    WorkerCommand,
    /// The tool exited with a nonzero code
    ToolInvocation,
    /// The tool could not be started at all
    ToolSpawn,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::FileOperation => write!(f, "File Operation Error"),
            ErrorKind::ServiceBinding => write!(f, "Service Binding Error"),
            ErrorKind::WorkerCommand => write!(f, "Worker Command Error"),
            ErrorKind::ToolInvocation | ErrorKind::ToolSpawn => write!(f, "Tool Error"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct WorkerError {
    kind: ErrorKind,
    message: String,
    exit_code: Option<i32>,
    command: Option<String>,
    args: Vec<String>,
}

impl WorkerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            command: None,
            args: Vec::new(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn file_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileOperation, message)
    }

    pub fn service_binding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceBinding, message)
    }

    pub fn worker_command(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerCommand, message)
    }

    /// Tool ran and exited with `exit_code`
    pub fn tool_invocation(exit_code: i32, command: impl Into<String>, args: &[String]) -> Self {
        let command = command.into();
        Self {
            kind: ErrorKind::ToolInvocation,
            message: format!("command '{}' failed with exit code {}", command, exit_code),
            exit_code: Some(exit_code),
            command: Some(command),
            args: args.to_vec(),
        }
    }

    /// Tool could not be started
    pub fn tool_spawn(
        cause: impl fmt::Display,
        command: impl Into<String>,
        args: &[String],
    ) -> Self {
        Self {
            kind: ErrorKind::ToolSpawn,
            message: format!("failed to start tool: {}", cause),
            exit_code: Some(SPAWN_FAILURE),
            command: Some(command.into()),
            args: args.to_vec(),
        }
    }

    /// Replace the message, keeping kind and tool payload
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Reclassify, keeping message and tool payload
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Exit code the process should terminate with
    pub fn process_exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::ToolInvocation | ErrorKind::ToolSpawn => {
                self.exit_code.unwrap_or(GENERIC_FAILURE)
            }
            // Secret upload failures are reported as worker command errors
            // but still carry the tool's code.
            ErrorKind::WorkerCommand => self.exit_code.unwrap_or(GENERIC_FAILURE),
            ErrorKind::Configuration | ErrorKind::FileOperation | ErrorKind::ServiceBinding => {
                GENERIC_FAILURE
            }
        }
    }
}

impl FixSuggestion for WorkerError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self.kind {
            ErrorKind::Configuration => {
                Some("Pass a worker name or --all (not both) and check worker.config.json")
            }
            ErrorKind::FileOperation => Some("Check file paths and permissions"),
            ErrorKind::ServiceBinding => Some(
                "Each services[].service must name a directory in the workers root containing wrangler.jsonc",
            ),
            ErrorKind::WorkerCommand => None,
            ErrorKind::ToolInvocation => Some("See the tool output above"),
            ErrorKind::ToolSpawn => Some("Check that the tool is installed and on PATH (--tool)"),
        }
    }
}
