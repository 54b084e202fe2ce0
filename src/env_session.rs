//! Environment file session
//!
//! `.dev.vars` files hold `KEY=VALUE` lines per worker and at the project
//! root. Worker entries override root entries with the same key.
//!
//! A local run needs the merged variables in the worker's live file, so
//! [`EnvironmentSession::patch_live`] overwrites it and records the original
//! bytes in an [`UndoLog`]. [`EnvironmentSession::rollback`] consumes the log,
//! restoring files newest first, so it can only run once per invocation.
//!
//! A deploy with secrets instead gets a throwaway merged copy from
//! [`EnvironmentSession::prepare_upload_copy`]; originals are never touched.

use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::artifacts::TempArtifacts;
use crate::error::WorkerError;

/// Default environment file
pub const ENV_FILE: &str = ".dev.vars";
/// Merged copy written for secret upload
pub const TEMP_ENV_FILE: &str = ".temp.dev.vars";

/// Environment file for `env` in `dir`: `.dev.vars.<env>` when it exists,
/// `.dev.vars` otherwise (and always for no env or `dev`).
pub fn env_file_path(dir: &Path, env: Option<&str>) -> PathBuf {
    match env {
        None | Some("dev") => dir.join(ENV_FILE),
        Some(env) => {
            let scoped = dir.join(format!("{}.{}", ENV_FILE, env));
            if scoped.exists() {
                scoped
            } else {
                dir.join(ENV_FILE)
            }
        }
    }
}

/// Ordered `KEY=VALUE` entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars {
    entries: Vec<(String, String)>,
}

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse env file content
    pub fn parse(text: &str, source: &Path) -> Result<Self, WorkerError> {
        let mut vars = Self::new();
        for item in dotenvy::from_read_iter(text.as_bytes()) {
            let (key, value) = item.map_err(|e| {
                WorkerError::file_operation(format!(
                    "Failed to read environment variables from {}: {}",
                    source.display(),
                    e
                ))
            })?;
            vars.set(key, value);
        }
        Ok(vars)
    }

    /// Insert or override in place (first position is kept)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `root` with `worker` layered on top
    pub fn merged(root: &EnvVars, worker: &EnvVars) -> EnvVars {
        let mut merged = root.clone();
        for (key, value) in worker.iter() {
            merged.set(key, value);
        }
        merged
    }

    /// Serialize back to `KEY=VALUE` lines
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        out
    }
}

/// Quote a value so it parses back unchanged (no `$` expansion)
fn quote(value: &str) -> Cow<'_, str> {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | ',' | '+'));
    if plain {
        return Cow::Borrowed(value);
    }
    if !value.contains('\'') && !value.contains('\n') {
        return Cow::Owned(format!("'{}'", value));
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

/// Original state of a live file before it was overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub path: PathBuf,
    /// `None` when the file did not exist
    pub original: Option<Vec<u8>>,
}

/// LIFO record of live-file mutations for one invocation
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }
}

/// Merged env file prepared for secret upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCopy {
    path: PathBuf,
}

impl UploadCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Env file operations relative to a project root
#[derive(Debug, Clone)]
pub struct EnvironmentSession {
    root_dir: PathBuf,
}

impl EnvironmentSession {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_env_file(&self, env: Option<&str>) -> PathBuf {
        env_file_path(&self.root_dir, env)
    }

    /// Overwrite the worker's live env file with root ⊕ worker entries,
    /// recording the original bytes in `undo`. No-op when neither file exists.
    pub fn patch_live(
        &self,
        worker_dir: &Path,
        env: Option<&str>,
        undo: &mut UndoLog,
    ) -> Result<(), WorkerError> {
        let worker_path = env_file_path(worker_dir, env);
        let root_path = self.root_env_file(env);

        let original = read_optional(&worker_path)?;
        let root_text = read_optional(&root_path)?;
        if original.is_none() && root_text.is_none() {
            debug!(worker = %worker_dir.display(), "no env files, nothing to patch");
            return Ok(());
        }

        let merged = merge_sources(
            root_text.as_deref().map(|b| (b, root_path.as_path())),
            original.as_deref().map(|b| (b, worker_path.as_path())),
        )?;

        undo.push(UndoEntry {
            path: worker_path.clone(),
            original,
        });
        write_file(&worker_path, merged.render().as_bytes())?;
        debug!(path = %worker_path.display(), vars = merged.len(), "patched live env file");
        Ok(())
    }

    /// Write root ⊕ worker entries to a throwaway file in the worker dir.
    /// Returns `None` when neither env file exists.
    pub fn prepare_upload_copy(
        &self,
        worker_dir: &Path,
        env: Option<&str>,
        artifacts: &mut TempArtifacts,
    ) -> Result<Option<UploadCopy>, WorkerError> {
        let worker_path = env_file_path(worker_dir, env);
        let root_path = self.root_env_file(env);
        let temp_path = worker_dir.join(TEMP_ENV_FILE);

        remove_if_exists(&temp_path)?;

        let worker_text = read_optional(&worker_path)?;
        let root_text = read_optional(&root_path)?;
        if worker_text.is_none() && root_text.is_none() {
            return Ok(None);
        }

        let merged = merge_sources(
            root_text.as_deref().map(|b| (b, root_path.as_path())),
            worker_text.as_deref().map(|b| (b, worker_path.as_path())),
        )?;

        artifacts.track(&temp_path);
        write_file(&temp_path, merged.render().as_bytes())?;
        debug!(path = %temp_path.display(), vars = merged.len(), "prepared upload copy");
        Ok(Some(UploadCopy { path: temp_path }))
    }

    /// Restore every recorded file, newest first, then delete the upload copy.
    ///
    /// Failures do not stop the remaining restores; they come back as
    /// warnings for the caller to report.
    pub fn rollback(undo: UndoLog, upload: Option<UploadCopy>) -> Vec<WorkerError> {
        let mut warnings = Vec::new();

        for entry in undo.entries.into_iter().rev() {
            let result = match &entry.original {
                Some(bytes) => std::fs::write(&entry.path, bytes),
                None => match std::fs::remove_file(&entry.path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            match result {
                Ok(()) => debug!(path = %entry.path.display(), "restored env file"),
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "failed to restore env file");
                    warnings.push(WorkerError::file_operation(format!(
                        "Failed to restore environment variables in {}: {}",
                        entry.path.display(),
                        e
                    )));
                }
            }
        }

        if let Some(copy) = upload {
            if let Err(e) = remove_if_exists(&copy.path) {
                warn!(path = %copy.path.display(), "failed to delete upload copy");
                warnings.push(e);
            }
        }

        warnings
    }
}

fn merge_sources(
    root: Option<(&[u8], &Path)>,
    worker: Option<(&[u8], &Path)>,
) -> Result<EnvVars, WorkerError> {
    let parse = |source: Option<(&[u8], &Path)>| -> Result<EnvVars, WorkerError> {
        match source {
            Some((bytes, path)) => EnvVars::parse(&String::from_utf8_lossy(bytes), path),
            None => Ok(EnvVars::new()),
        }
    };
    Ok(EnvVars::merged(&parse(root)?, &parse(worker)?))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, WorkerError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WorkerError::file_operation(format!(
            "Failed to read environment variables from {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), WorkerError> {
    std::fs::write(path, bytes).map_err(|e| {
        WorkerError::file_operation(format!(
            "Failed to write environment variables to {}: {}",
            path.display(),
            e
        ))
    })
}

fn remove_if_exists(path: &Path) -> Result<(), WorkerError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WorkerError::file_operation(format!(
            "Failed to delete temporary environment variables file {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(text: &str) -> EnvVars {
        EnvVars::parse(text, Path::new("test")).unwrap()
    }

    #[test]
    fn parse_keeps_order() {
        let vars = parse("B=2\nA=1\n# comment\nC=\"three\"\n");
        let keys: Vec<_> = vars.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["B", "A", "C"]);
        assert_eq!(vars.get("C"), Some("three"));
    }

    #[test]
    fn merged_worker_overrides_root() {
        let root = parse("A=root\nB=root\n");
        let worker = parse("B=worker\nC=worker\n");
        let merged = EnvVars::merged(&root, &worker);
        assert_eq!(merged.render(), "A=root\nB=worker\nC=worker\n");
    }

    #[test]
    fn render_round_trips_awkward_values() {
        let mut vars = EnvVars::new();
        vars.set("SPACES", "hello world");
        vars.set("DOLLAR", "pa$$word");
        vars.set("QUOTE", "it's \"fine\" $HOME");
        vars.set("NEWLINE", "line1\nline2");
        vars.set("EMPTY", "");
        vars.set("URL", "https://example.com/a?b=c");

        let back = parse(&vars.render());
        assert_eq!(back, vars);
    }

    #[test]
    fn env_file_selection() {
        let dir = TempDir::new().unwrap();
        assert_eq!(env_file_path(dir.path(), None), dir.path().join(".dev.vars"));
        assert_eq!(env_file_path(dir.path(), Some("dev")), dir.path().join(".dev.vars"));
        assert_eq!(env_file_path(dir.path(), Some("staging")), dir.path().join(".dev.vars"));

        fs::write(dir.path().join(".dev.vars.staging"), "A=1").unwrap();
        assert_eq!(
            env_file_path(dir.path(), Some("staging")),
            dir.path().join(".dev.vars.staging")
        );
    }

    #[test]
    fn patch_then_rollback_is_byte_identical() {
        let root = TempDir::new().unwrap();
        let worker = root.path().join("workers/api");
        fs::create_dir_all(&worker).unwrap();
        let original = "# keep me\nB=\"worker\"\nC=3";
        fs::write(worker.join(".dev.vars"), original).unwrap();
        fs::write(root.path().join(".dev.vars"), "A=1\nB=root\n").unwrap();

        let session = EnvironmentSession::new(root.path());
        let mut undo = UndoLog::new();
        session.patch_live(&worker, None, &mut undo).unwrap();

        let patched = fs::read_to_string(worker.join(".dev.vars")).unwrap();
        assert_eq!(patched, "A=1\nB=worker\nC=3\n");
        assert_eq!(undo.len(), 1);

        let warnings = EnvironmentSession::rollback(undo, None);
        assert!(warnings.is_empty());
        assert_eq!(fs::read_to_string(worker.join(".dev.vars")).unwrap(), original);
    }

    #[test]
    fn patch_creates_missing_worker_file_and_rollback_removes_it() {
        let root = TempDir::new().unwrap();
        let worker = root.path().join("api");
        fs::create_dir_all(&worker).unwrap();
        fs::write(root.path().join(".dev.vars"), "SHARED=1\n").unwrap();

        let session = EnvironmentSession::new(root.path());
        let mut undo = UndoLog::new();
        session.patch_live(&worker, None, &mut undo).unwrap();
        assert_eq!(fs::read_to_string(worker.join(".dev.vars")).unwrap(), "SHARED=1\n");

        EnvironmentSession::rollback(undo, None);
        assert!(!worker.join(".dev.vars").exists());
    }

    #[test]
    fn patch_without_any_file_is_noop() {
        let root = TempDir::new().unwrap();
        let session = EnvironmentSession::new(root.path());
        let mut undo = UndoLog::new();
        session.patch_live(root.path(), Some("production"), &mut undo).unwrap();
        assert!(undo.is_empty());
        assert!(!root.path().join(".dev.vars").exists());
    }

    #[test]
    fn rollback_restores_newest_first() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(".dev.vars");
        fs::write(&file, "V=original").unwrap();

        let session = EnvironmentSession::new(dir.path().join("no-root"));
        let mut undo = UndoLog::new();
        session.patch_live(dir.path(), None, &mut undo).unwrap();
        fs::write(&file, "V=changed").unwrap();
        session.patch_live(dir.path(), None, &mut undo).unwrap();
        assert_eq!(undo.len(), 2);

        EnvironmentSession::rollback(undo, None);
        assert_eq!(fs::read_to_string(&file).unwrap(), "V=original");
    }

    #[test]
    fn upload_copy_is_separate_and_tracked() {
        let root = TempDir::new().unwrap();
        let worker = root.path().join("api");
        fs::create_dir_all(&worker).unwrap();
        fs::write(worker.join(".dev.vars.production"), "SECRET=w").unwrap();
        fs::write(root.path().join(".dev.vars.production"), "SECRET=r\nROOT=1").unwrap();

        let session = EnvironmentSession::new(root.path());
        let mut artifacts = TempArtifacts::new();
        let copy = session
            .prepare_upload_copy(&worker, Some("production"), &mut artifacts)
            .unwrap()
            .unwrap();

        assert_eq!(copy.path(), worker.join(TEMP_ENV_FILE));
        assert_eq!(fs::read_to_string(copy.path()).unwrap(), "SECRET=w\nROOT=1\n");
        assert_eq!(
            fs::read_to_string(worker.join(".dev.vars.production")).unwrap(),
            "SECRET=w"
        );
        assert!(artifacts.contains(copy.path()));

        let path = copy.path().to_path_buf();
        EnvironmentSession::rollback(UndoLog::new(), Some(copy));
        assert!(!path.exists());
    }

    #[test]
    fn upload_copy_none_without_env_files() {
        let root = TempDir::new().unwrap();
        let session = EnvironmentSession::new(root.path());
        let mut artifacts = TempArtifacts::new();
        let copy = session
            .prepare_upload_copy(root.path(), None, &mut artifacts)
            .unwrap();
        assert!(copy.is_none());
        assert!(artifacts.is_empty());
    }
}
