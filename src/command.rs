//! Worker command orchestration
//!
//! One worker invocation runs inside an [`Invocation`] scope that owns the
//! temp-artifact tracker, the env undo log and the secret upload copy. The
//! scope is always finished after the command body, success or failure,
//! and as a last resort when dropped.
//!
//! `--all` runs workers one after another: each worker is composed, run and
//! cleaned up before the next one starts.

use std::path::PathBuf;

use colored::Colorize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::TempArtifacts;
use crate::bindings::BindingResolver;
use crate::compose::{compose, ComposeOptions, ComposedConfig, WorkerDescriptor};
use crate::env_session::{EnvironmentSession, UndoLog, UploadCopy};
use crate::error::{ErrorKind, WorkerError};
use crate::process::{self, RunCommand, ToolInvoker, ToolOutput};
use crate::project::ProjectSettings;
use crate::release::ReleaseInfo;

/// Parameters of a worker command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandParams {
    Dev,
    Deploy { deploy_secrets: bool },
}

impl CommandParams {
    pub fn run_command(&self) -> RunCommand {
        match self {
            CommandParams::Dev => RunCommand::Dev,
            CommandParams::Deploy { .. } => RunCommand::Deploy,
        }
    }
}

/// Which workers a command targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSelection {
    Named(String),
    All,
}

impl WorkerSelection {
    /// Validate a worker name against the `--all` flag
    pub fn from_args(
        params: CommandParams,
        name: Option<String>,
        all: bool,
    ) -> Result<Self, WorkerError> {
        let name = name.filter(|n| !n.is_empty());
        match (name, all) {
            (Some(_), true) => Err(WorkerError::configuration(
                "Worker name is not allowed when using --all flag",
            )),
            (Some(name), false) => Ok(WorkerSelection::Named(name)),
            (None, true) => Ok(WorkerSelection::All),
            (None, false) => Err(WorkerError::configuration(match params {
                CommandParams::Dev => "Worker name is required for dev command",
                CommandParams::Deploy { .. } => "Worker name is required",
            })),
        }
    }
}

/// State owned by one worker invocation
#[derive(Debug, Default)]
pub struct Invocation {
    artifacts: TempArtifacts,
    undo: UndoLog,
    upload: Option<UploadCopy>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll back env mutations, then delete every ephemeral file.
    /// Failures are returned as warnings.
    pub fn finish(mut self) -> Vec<WorkerError> {
        self.release()
    }

    fn release(&mut self) -> Vec<WorkerError> {
        let undo = std::mem::take(&mut self.undo);
        let mut warnings = EnvironmentSession::rollback(undo, self.upload.take());
        warnings.extend(self.artifacts.cleanup());
        warnings
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.undo.is_empty() && self.upload.is_none() && self.artifacts.is_empty() {
            return;
        }
        for warning in self.release() {
            warn!(error = %warning, "cleanup failed");
        }
    }
}

/// Runs worker commands against one project
pub struct WorkerOrchestrator<I> {
    settings: ProjectSettings,
    invoker: I,
    env: Option<String>,
    session: EnvironmentSession,
    status_lines: bool,
}

impl<I: ToolInvoker> WorkerOrchestrator<I> {
    pub fn new(settings: ProjectSettings, invoker: I, env: Option<String>) -> Self {
        let session = EnvironmentSession::new(&settings.root_dir);
        Self {
            settings,
            invoker,
            env: env.filter(|e| !e.is_empty()),
            session,
            status_lines: false,
        }
    }

    /// Print a status line per worker
    pub fn with_status_lines(mut self, enabled: bool) -> Self {
        self.status_lines = enabled;
        self
    }

    /// Run `params` for the selected workers, sequentially
    #[instrument(skip_all, fields(command = ?params, env = ?self.env))]
    pub async fn execute(
        &self,
        params: CommandParams,
        selection: &WorkerSelection,
        output: &mut dyn ToolOutput,
    ) -> Result<(), WorkerError> {
        self.settings.validate_workers_root()?;

        match selection {
            WorkerSelection::Named(name) => {
                let worker = self.settings.worker(name)?;
                self.run_worker(&worker, params, output).await
            }
            WorkerSelection::All => {
                let workers = self.settings.discover_workers()?;
                if workers.is_empty() {
                    warn!(root = %self.settings.workers_root().display(), "no workers found");
                }
                for worker in &workers {
                    self.run_worker(worker, params, output).await?;
                }
                Ok(())
            }
        }
    }

    /// Run one worker inside its own invocation scope
    pub async fn run_worker(
        &self,
        worker: &WorkerDescriptor,
        params: CommandParams,
        output: &mut dyn ToolOutput,
    ) -> Result<(), WorkerError> {
        if self.status_lines {
            println!(
                "\n{} {} {}",
                "→".cyan(),
                params.run_command().as_str().bold(),
                worker.name
            );
        }

        let mut invocation = Invocation::new();
        let result = match params {
            CommandParams::Dev => self.dev(worker, &mut invocation, output).await,
            CommandParams::Deploy { deploy_secrets } => {
                self.deploy(worker, deploy_secrets, &mut invocation, output)
                    .await
            }
        };

        for warning in invocation.finish() {
            warn!(worker = %worker.name, error = %warning, "cleanup failed");
            eprintln!("{} {}", "Warning:".yellow().bold(), warning);
        }

        if self.status_lines && result.is_ok() {
            println!("  {} {}", "✓".green(), worker.name);
        }
        result
    }

    /// Compose, resolve bindings recursively, patch the live env file and
    /// run the tool with the worker's config followed by its dependencies'
    #[instrument(skip_all, fields(worker = %worker.name))]
    async fn dev(
        &self,
        worker: &WorkerDescriptor,
        invocation: &mut Invocation,
        output: &mut dyn ToolOutput,
    ) -> Result<(), WorkerError> {
        let env = self.env.as_deref();
        let release = ReleaseInfo::detect(&worker.dir, &self.settings.root_dir);
        let options = self.compose_options(&release);

        let mut composed = compose(worker, &options, &mut invocation.artifacts)?;
        let resolver = BindingResolver::new(self.settings.workers_root(), options);
        let dependencies = resolver.prepare(&mut composed, &mut invocation.artifacts)?;

        self.session
            .patch_live(&worker.dir, env, &mut invocation.undo)?;

        let mut configs: Vec<PathBuf> = vec![composed.path().to_path_buf()];
        for dependency in dependencies {
            if !configs.contains(&dependency.config_path) {
                configs.push(dependency.config_path);
            }
        }

        let args = process::run_args(RunCommand::Dev, &configs, env);
        info!(worker = %worker.name, configs = configs.len(), "starting dev");
        self.invoker.run(&args, output).await
    }

    /// Compose, apply deployed binding names, deploy, then upload secrets
    #[instrument(skip_all, fields(worker = %worker.name))]
    async fn deploy(
        &self,
        worker: &WorkerDescriptor,
        deploy_secrets: bool,
        invocation: &mut Invocation,
        output: &mut dyn ToolOutput,
    ) -> Result<(), WorkerError> {
        let env = self.env.as_deref();
        let release = ReleaseInfo::detect(&worker.dir, &self.settings.root_dir);
        let options = self.compose_options(&release);

        let mut composed = compose(worker, &options, &mut invocation.artifacts)?;
        BindingResolver::new(self.settings.workers_root(), options)
            .apply(&mut composed, &mut invocation.artifacts)?;

        let args = process::run_args(RunCommand::Deploy, &[composed.path()], env);
        info!(worker = %worker.name, "starting deploy");
        self.invoker.run(&args, output).await?;

        if !deploy_secrets {
            return Ok(());
        }
        match env {
            Some(env) => self.upload_secrets(worker, &composed, env, invocation, output).await,
            None => {
                warn!(worker = %worker.name, "secret upload needs an environment, skipping");
                Ok(())
            }
        }
    }

    async fn upload_secrets(
        &self,
        worker: &WorkerDescriptor,
        composed: &ComposedConfig,
        env: &str,
        invocation: &mut Invocation,
        output: &mut dyn ToolOutput,
    ) -> Result<(), WorkerError> {
        let copy = self
            .session
            .prepare_upload_copy(&worker.dir, Some(env), &mut invocation.artifacts)?;
        let Some(copy) = copy else {
            debug!(worker = %worker.name, "no env files, nothing to upload");
            return Ok(());
        };

        let args = process::secret_bulk_args(copy.path(), composed.path(), env);
        invocation.upload = Some(copy);
        info!(worker = %worker.name, %env, "uploading secrets");

        self.invoker.run(&args, output).await.map_err(|e| {
            let message = format!("Failed to deploy secrets for {}: {}", worker.name, e.message());
            e.with_kind(ErrorKind::WorkerCommand).with_message(message)
        })
    }

    fn compose_options<'a>(&'a self, release: &'a ReleaseInfo) -> ComposeOptions<'a> {
        ComposeOptions {
            base_config: self.settings.base_config.as_deref(),
            variables: &self.settings.variables,
            env: self.env.as_deref(),
            release,
        }
    }
}

/// `<tool> whoami`
pub async fn whoami<I: ToolInvoker>(invoker: &I, output: &mut dyn ToolOutput) -> Result<(), WorkerError> {
    invoker.run(&process::whoami_args(), output).await
}
