//! Service binding resolution
//!
//! A worker config may declare `services: [{binding, service}]` where
//! `service` names another worker directory. Resolution composes each
//! dependency and rewrites the parent's entry to the dependency's sanitized
//! deployed name.
//!
//! Two entry points:
//!
//! - [`BindingResolver::prepare`] (local dev): recursive, returns every
//!   transitive dependency pre-order so the tool can run them together.
//! - [`BindingResolver::apply`] (remote deploy): direct dependencies only;
//!   names get a `-{env}` suffix because deployed workers are named per env.
//!
//! Bindings that loop back onto a worker already on the current resolution
//! path fail fast instead of recursing forever.

use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::artifacts::TempArtifacts;
use crate::compose::{compose, ComposeOptions, ComposedConfig, WorkerDescriptor};
use crate::config::ServiceBinding;
use crate::error::{ErrorKind, WorkerError};
use crate::sanitize::sanitize;

/// A binding after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub binding: String,
    /// Sanitized deployed service name
    pub service: String,
    /// Composed config of the dependency
    pub config_path: PathBuf,
}

/// Workers currently being resolved, outermost first
#[derive(Debug, Clone, Default)]
pub struct ResolutionPath {
    stack: Vec<String>,
}

impl ResolutionPath {
    pub fn starting_at(worker: &str) -> Self {
        Self {
            stack: vec![worker.to_string()],
        }
    }

    pub fn contains(&self, worker: &str) -> bool {
        self.stack.iter().any(|w| w == worker)
    }

    fn enter(&mut self, worker: &str) -> Result<(), WorkerError> {
        if self.contains(worker) {
            let cycle = self
                .stack
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(worker))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(WorkerError::service_binding(format!(
                "Circular service binding: {}",
                cycle
            )));
        }
        self.stack.push(worker.to_string());
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }
}

/// Resolves bindings against a workers root using shared compose options
pub struct BindingResolver<'a> {
    workers_root: PathBuf,
    options: ComposeOptions<'a>,
}

impl<'a> BindingResolver<'a> {
    pub fn new(workers_root: impl Into<PathBuf>, options: ComposeOptions<'a>) -> Self {
        Self {
            workers_root: workers_root.into(),
            options,
        }
    }

    /// Recursive resolution before a local run
    #[instrument(skip_all, fields(worker = %composed.worker()))]
    pub fn prepare(
        &self,
        composed: &mut ComposedConfig,
        artifacts: &mut TempArtifacts,
    ) -> Result<Vec<ResolvedBinding>, WorkerError> {
        let mut path = ResolutionPath::starting_at(composed.worker());
        self.resolve(composed, artifacts, &mut path, true)
    }

    /// Single-pass resolution before a remote deploy
    #[instrument(skip_all, fields(worker = %composed.worker()))]
    pub fn apply(
        &self,
        composed: &mut ComposedConfig,
        artifacts: &mut TempArtifacts,
    ) -> Result<Vec<ResolvedBinding>, WorkerError> {
        let mut path = ResolutionPath::starting_at(composed.worker());
        let resolved = self.resolve(composed, artifacts, &mut path, false)?;

        let env = self.options.env;
        let mut deployed = Vec::with_capacity(resolved.len());
        for entry in resolved {
            let service = match env {
                Some(env) => sanitize(&format!("{}-{}", entry.service, env)).into_owned(),
                None => sanitize(&entry.service).into_owned(),
            };
            composed
                .patch_service(env, &entry.binding, &service)
                .map_err(wrap_failure)?;
            debug!(binding = %entry.binding, %service, "bound deployed service");
            deployed.push(ResolvedBinding { service, ..entry });
        }
        Ok(deployed)
    }

    fn resolve(
        &self,
        parent: &mut ComposedConfig,
        artifacts: &mut TempArtifacts,
        path: &mut ResolutionPath,
        recursive: bool,
    ) -> Result<Vec<ResolvedBinding>, WorkerError> {
        let env = self.options.env;
        let bindings = parent.services(env).map_err(wrap_failure)?;
        if bindings.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::new();
        for binding in bindings {
            let dependency = self.locate(&binding)?;
            path.enter(&dependency.name)?;

            let mut dep_config =
                compose(&dependency, &self.options, artifacts).map_err(wrap_failure)?;
            parent
                .patch_service(env, &binding.binding, dep_config.name())
                .map_err(wrap_failure)?;
            debug!(
                parent = %parent.worker(),
                binding = %binding.binding,
                service = %dep_config.name(),
                "resolved service binding"
            );

            resolved.push(ResolvedBinding {
                binding: binding.binding,
                service: dep_config.name().to_string(),
                config_path: dep_config.path().to_path_buf(),
            });

            if recursive {
                let nested = self.resolve(&mut dep_config, artifacts, path, true)?;
                resolved.extend(nested);
            }

            path.leave();
        }

        Ok(resolved)
    }

    /// Map a logical service name to its worker directory
    fn locate(&self, binding: &ServiceBinding) -> Result<WorkerDescriptor, WorkerError> {
        let worker = WorkerDescriptor::locate(&self.workers_root, &binding.service);
        if !worker.dir.is_dir() {
            return Err(WorkerError::service_binding(format!(
                "Service {} not found at {}",
                binding.service,
                worker.dir.display()
            )));
        }
        let config_path = worker.config_path();
        if !config_path.is_file() {
            return Err(WorkerError::service_binding(format!(
                "Service {} config not found at {}",
                binding.service,
                config_path.display()
            )));
        }
        Ok(worker)
    }
}

/// Failures inside resolution that are not binding errors become worker
/// command errors carrying the original message.
fn wrap_failure(err: WorkerError) -> WorkerError {
    match err.kind() {
        ErrorKind::ServiceBinding | ErrorKind::WorkerCommand => err,
        _ => {
            let message = format!("Failed to create service bindings: {}", err.message());
            err.with_kind(ErrorKind::WorkerCommand).with_message(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_detects_reentry() {
        let mut path = ResolutionPath::starting_at("a");
        path.enter("b").unwrap();
        let err = path.enter("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceBinding);
        assert!(err.message().contains("a -> b -> a"));
    }

    #[test]
    fn path_allows_siblings_after_leave() {
        let mut path = ResolutionPath::starting_at("a");
        path.enter("b").unwrap();
        path.leave();
        path.enter("b").unwrap();
        assert!(path.contains("b"));
    }

    #[test]
    fn wrap_keeps_binding_errors() {
        let err = wrap_failure(WorkerError::service_binding("missing"));
        assert_eq!(err.kind(), ErrorKind::ServiceBinding);
        assert_eq!(err.message(), "missing");

        let err = wrap_failure(WorkerError::file_operation("disk full"));
        assert_eq!(err.kind(), ErrorKind::WorkerCommand);
        assert_eq!(err.message(), "Failed to create service bindings: disk full");
    }
}
