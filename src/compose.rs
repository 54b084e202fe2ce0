//! Config composition
//!
//! Builds the ephemeral config handed to the deployment tool for one worker:
//!
//! 1. the worker's `wrangler.jsonc` is copied to `.temp.wrangler.jsonc`
//! 2. an optional base config is snapshotted and merged underneath it, with
//!    `{workerName}` replaced by the worker's directory name
//! 3. caller variables replace `{key}` tokens
//! 4. `name` is sanitized
//! 5. `NAME`, `ENVIRONMENT`, `VERSION` and `RELEASE` are injected into `vars`
//!    (under `env.<env>` when an environment is selected)
//!
//! Ephemeral paths are fixed per worker directory, so two compositions of the
//! same worker must never run at the same time.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::artifacts::TempArtifacts;
use crate::config::{self, ServiceBinding, TEMP_BASE_CONFIG_FILE, TEMP_CONFIG_FILE, WORKER_CONFIG_FILE};
use crate::error::{ErrorKind, WorkerError};
use crate::placeholder::{Substitutions, Variables};
use crate::release::ReleaseInfo;
use crate::sanitize::sanitize;

/// Environment reported in `ENVIRONMENT` when none is selected
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// A worker directory under the workers root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub name: String,
    pub dir: PathBuf,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// `<workers_root>/<name>`
    pub fn locate(workers_root: &Path, name: &str) -> Self {
        Self::new(name, workers_root.join(name))
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(WORKER_CONFIG_FILE)
    }

    pub fn composed_path(&self) -> PathBuf {
        self.dir.join(TEMP_CONFIG_FILE)
    }

    pub fn base_snapshot_path(&self) -> PathBuf {
        self.dir.join(TEMP_BASE_CONFIG_FILE)
    }
}

/// Inputs shared by every composition in one invocation
#[derive(Debug, Clone, Copy)]
pub struct ComposeOptions<'a> {
    pub base_config: Option<&'a Path>,
    pub variables: &'a Variables,
    pub env: Option<&'a str>,
    pub release: &'a ReleaseInfo,
}

/// Ephemeral config file plus its resolved content
#[derive(Debug, Clone)]
pub struct ComposedConfig {
    worker: String,
    path: PathBuf,
    content: Value,
}

impl ComposedConfig {
    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Sanitized `name` of the composed config
    pub fn name(&self) -> &str {
        config::name(&self.content).unwrap_or(&self.worker)
    }

    /// Service bindings declared for `env` (top level when `None`)
    pub fn services(&self, env: Option<&str>) -> Result<Vec<ServiceBinding>, WorkerError> {
        config::services(&self.content, env)
    }

    /// Rewrite the `service` of `binding` and persist the file
    pub fn patch_service(
        &mut self,
        env: Option<&str>,
        binding: &str,
        service: &str,
    ) -> Result<(), WorkerError> {
        if !config::set_service(&mut self.content, env, binding, service) {
            return Err(WorkerError::worker_command(format!(
                "Binding {} not found in {}",
                binding,
                self.path.display()
            )));
        }
        config::write(&self.path, &self.content)
    }
}

/// Compose the ephemeral config for `worker`
#[instrument(skip_all, fields(worker = %worker.name, env = ?opts.env))]
pub fn compose(
    worker: &WorkerDescriptor,
    opts: &ComposeOptions<'_>,
    artifacts: &mut TempArtifacts,
) -> Result<ComposedConfig, WorkerError> {
    compose_inner(worker, opts, artifacts).map_err(|e| {
        let message = format!(
            "Failed to create temporary config for {}: {}",
            worker.name,
            e.message()
        );
        e.with_kind(ErrorKind::FileOperation).with_message(message)
    })
}

fn compose_inner(
    worker: &WorkerDescriptor,
    opts: &ComposeOptions<'_>,
    artifacts: &mut TempArtifacts,
) -> Result<ComposedConfig, WorkerError> {
    let composed_path = worker.composed_path();

    // 1. verbatim copy
    let worker_text = read_text(&worker.config_path())?;
    artifacts.track(&composed_path);
    write_text(&composed_path, &worker_text)?;
    let mut content = config::parse(&worker_text, &composed_path)?;

    // 2. base config underneath
    if let Some(base_path) = opts.base_config {
        let snapshot_path = worker.base_snapshot_path();
        let base_text = read_text(base_path)?;
        artifacts.track(&snapshot_path);
        write_text(&snapshot_path, &base_text)?;
        let base = config::parse(&base_text, &snapshot_path)?;

        config::merge_defaults(&mut content, &base);
        Substitutions::new()
            .with("workerName", &worker.name)
            .apply(&mut content);
        debug!(base = %base_path.display(), "merged base config");
    }

    // 3. caller variables
    let substitutions = Substitutions::from_variables(opts.variables);
    if !substitutions.is_empty() {
        substitutions.apply(&mut content);
    }

    // 4. sanitized name
    let declared = config::name(&content)
        .ok_or_else(|| {
            WorkerError::file_operation(format!(
                "{} has no name field",
                worker.config_path().display()
            ))
        })?
        .to_string();
    let name = sanitize(&declared).into_owned();
    config::set_name(&mut content, &name);

    // 5. derived metadata
    inject_metadata(&mut content, &name, opts.env, opts.release);

    config::write(&composed_path, &content)?;
    debug!(path = %composed_path.display(), %name, "composed config");

    Ok(ComposedConfig {
        worker: worker.name.clone(),
        path: composed_path,
        content,
    })
}

fn inject_metadata(content: &mut Value, name: &str, env: Option<&str>, release: &ReleaseInfo) {
    let metadata = [
        ("NAME", name),
        ("ENVIRONMENT", env.unwrap_or(DEFAULT_ENVIRONMENT)),
        ("VERSION", release.version.as_str()),
        ("RELEASE", release.release.as_str()),
    ];

    let vars = match env {
        Some(env) => {
            // Env blocks do not inherit top-level vars in the tool, so copy
            // them in; values already set in the block win.
            let inherited = content
                .get("vars")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let vars = config::vars_mut(config::env_block_mut(content, env));
            for (key, value) in inherited {
                vars.entry(key).or_insert(value);
            }
            vars
        }
        None => config::vars_mut(config::root_mut(content)),
    };

    for (key, value) in metadata {
        vars.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn read_text(path: &Path) -> Result<String, WorkerError> {
    std::fs::read_to_string(path).map_err(|e| {
        WorkerError::file_operation(format!("Failed to read {}: {}", path.display(), e))
    })
}

fn write_text(path: &Path, text: &str) -> Result<(), WorkerError> {
    std::fs::write(path, text).map_err(|e| {
        WorkerError::file_operation(format!("Failed to write {}: {}", path.display(), e))
    })
}
