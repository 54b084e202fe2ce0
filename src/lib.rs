//! MonoCF - worker monorepo orchestrator for the wrangler CLI

pub mod artifacts;
pub mod bindings;
pub mod command;
pub mod compose;
pub mod config;
pub mod env_session;
pub mod error;
pub mod jsonc;
pub mod placeholder;
pub mod process;
pub mod project;
pub mod release;
pub mod sanitize;

pub use artifacts::TempArtifacts;
pub use bindings::{BindingResolver, ResolvedBinding};
pub use command::{CommandParams, Invocation, WorkerOrchestrator, WorkerSelection};
pub use compose::{compose, ComposeOptions, ComposedConfig, WorkerDescriptor};
pub use env_session::{EnvironmentSession, UndoLog};
pub use error::{ErrorKind, FixSuggestion, WorkerError};
pub use placeholder::Variables;
pub use process::{MockInvoker, ProcessRunner, ToolInvoker};
pub use project::{ProjectSettings, SettingsOverrides};
pub use release::ReleaseInfo;
pub use sanitize::sanitize;
