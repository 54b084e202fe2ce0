//! Version and release metadata injected into composed configs

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, warn};

const UNKNOWN_RELEASE: &str = "unknown";
const DEFAULT_VERSION: &str = "0.0.0";

/// `VERSION` and `RELEASE` values for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub release: String,
}

impl ReleaseInfo {
    pub fn new(version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release: release.into(),
        }
    }

    /// Version from the worker's `package.json` (falling back to the project
    /// root's), release from the current git revision of the project.
    pub fn detect(worker_dir: &Path, root_dir: &Path) -> Self {
        let version = package_version(worker_dir)
            .or_else(|| package_version(root_dir))
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let release = git_revision(root_dir).unwrap_or_else(|| UNKNOWN_RELEASE.to_string());
        debug!(%version, %release, "detected release info");
        Self { version, release }
    }
}

#[derive(Deserialize)]
struct PackageJson {
    version: Option<String>,
}

fn package_version(dir: &Path) -> Option<String> {
    let text = std::fs::read_to_string(dir.join("package.json")).ok()?;
    match serde_json::from_str::<PackageJson>(&text) {
        Ok(pkg) => pkg.version,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "ignoring unreadable package.json");
            None
        }
    }
}

fn git_revision(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["log", "-1", "--pretty=format:%h"])
        .current_dir(dir)
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!sha.is_empty()).then_some(sha)
        }
        Ok(out) => {
            warn!(
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "git commit cannot be retrieved"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "git commit cannot be retrieved");
            None
        }
    }
}
