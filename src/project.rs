//! Project settings
//!
//! `worker.config.json` in the working directory provides defaults; CLI flags
//! override them field by field. Paths in the file are relative to the
//! directory it was found in, the base config path to the project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::compose::WorkerDescriptor;
use crate::config::{DEFAULT_BASE_CONFIG, WORKER_CONFIG_FILE};
use crate::error::WorkerError;
use crate::placeholder::Variables;
use crate::process::DEFAULT_TOOL;

/// Project file looked up in the working directory
pub const PROJECT_FILE: &str = "worker.config.json";

/// On-disk shape of `worker.config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectFile {
    pub root_dir: Option<PathBuf>,
    pub workers_dir_name: Option<String>,
    pub base_config: Option<PathBuf>,
    pub deploy_secrets: Option<bool>,
    pub variables: Variables,
    pub tool: Option<String>,
    pub tool_timeout_secs: Option<u64>,
}

impl ProjectFile {
    /// Load `worker.config.json` from `dir`; `None` when absent
    pub fn load(dir: &Path) -> Result<Option<Self>, WorkerError> {
        let path = dir.join(PROJECT_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WorkerError::configuration(format!(
                    "Failed to read configuration file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let file = serde_json::from_str(&text).map_err(|e| {
            WorkerError::configuration(format!("Failed to parse configuration file: {}", e))
        })?;
        debug!(path = %path.display(), "loaded project file");
        Ok(Some(file))
    }
}

/// Values given on the command line, each winning over the project file
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub root_dir: Option<PathBuf>,
    pub workers_dir_name: Option<String>,
    pub base_config: Option<PathBuf>,
    pub deploy_secrets: bool,
    pub tool: Option<String>,
    pub tool_timeout_secs: Option<u64>,
}

/// Resolved settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub root_dir: PathBuf,
    pub workers_dir_name: String,
    /// Absolute base config path, when one applies
    pub base_config: Option<PathBuf>,
    pub deploy_secrets: bool,
    pub variables: Variables,
    pub tool: String,
    pub tool_timeout: Option<Duration>,
}

impl ProjectSettings {
    /// Read the project file in `cwd` and layer `overrides` on top
    pub fn load(cwd: &Path, overrides: SettingsOverrides) -> Result<Self, WorkerError> {
        let file = ProjectFile::load(cwd)?.unwrap_or_default();
        Ok(Self::resolve(cwd, file, overrides))
    }

    pub fn resolve(cwd: &Path, file: ProjectFile, overrides: SettingsOverrides) -> Self {
        let root_dir = overrides
            .root_dir
            .or(file.root_dir)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| cwd.join(p))
            .unwrap_or_else(|| cwd.to_path_buf());

        let base_config = overrides
            .base_config
            .or(file.base_config)
            .map(|p| root_dir.join(p))
            .or_else(|| {
                let default = root_dir.join(DEFAULT_BASE_CONFIG);
                default.is_file().then_some(default)
            });

        Self {
            workers_dir_name: overrides
                .workers_dir_name
                .or(file.workers_dir_name)
                .unwrap_or_default(),
            base_config,
            deploy_secrets: overrides.deploy_secrets || file.deploy_secrets.unwrap_or(false),
            variables: file.variables,
            tool: overrides
                .tool
                .or(file.tool)
                .unwrap_or_else(|| DEFAULT_TOOL.to_string()),
            tool_timeout: overrides
                .tool_timeout_secs
                .or(file.tool_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            root_dir,
        }
    }

    /// `<root>/<workersDirName>`
    pub fn workers_root(&self) -> PathBuf {
        self.root_dir.join(&self.workers_dir_name)
    }

    pub fn validate_workers_root(&self) -> Result<(), WorkerError> {
        let root = self.workers_root();
        if !root.is_dir() {
            return Err(WorkerError::file_operation(format!(
                "Workers directory not found at {}. Please check the workers directory.",
                root.display()
            )));
        }
        Ok(())
    }

    /// The named worker, which must exist
    pub fn worker(&self, name: &str) -> Result<WorkerDescriptor, WorkerError> {
        if name.is_empty() {
            return Err(WorkerError::configuration("Worker name is required"));
        }
        let worker = WorkerDescriptor::locate(&self.workers_root(), name);
        if !worker.dir.is_dir() {
            return Err(WorkerError::file_operation(format!(
                "Worker not found at {}. Please check the worker name.",
                worker.dir.display()
            )));
        }
        Ok(worker)
    }

    /// Every directory directly under the workers root that holds a worker
    /// config, sorted by name
    pub fn discover_workers(&self) -> Result<Vec<WorkerDescriptor>, WorkerError> {
        let root = self.workers_root();
        let mut workers = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                WorkerError::file_operation(format!("Failed to get workers: {}", e))
            })?;
            if !entry.file_type().is_dir() || !entry.path().join(WORKER_CONFIG_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            workers.push(WorkerDescriptor::new(name, entry.path()));
        }
        debug!(count = workers.len(), root = %root.display(), "discovered workers");
        Ok(workers)
    }
}
