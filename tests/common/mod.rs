//! Shared fixtures: a throwaway monorepo on disk

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use monocf::project::{ProjectFile, ProjectSettings, SettingsOverrides};
use tempfile::TempDir;

pub const WORKERS_DIR: &str = "workers";

/// Project root with a `workers/` directory
pub struct Monorepo {
    pub dir: TempDir,
}

impl Monorepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(WORKERS_DIR)).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn worker_dir(&self, name: &str) -> PathBuf {
        self.root().join(WORKERS_DIR).join(name)
    }

    /// Create a worker with the given `wrangler.jsonc`
    pub fn worker(&self, name: &str, config: &str) -> PathBuf {
        let dir = self.worker_dir(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("wrangler.jsonc"), config).unwrap();
        dir
    }

    /// Write a file relative to the project root
    pub fn file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn settings(&self) -> ProjectSettings {
        let overrides = SettingsOverrides {
            workers_dir_name: Some(WORKERS_DIR.to_string()),
            ..Default::default()
        };
        ProjectSettings::resolve(self.root(), ProjectFile::default(), overrides)
    }

    /// Every `.temp*` file left anywhere under the workers dir
    pub fn leftover_temp_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let workers = self.root().join(WORKERS_DIR);
        for worker in fs::read_dir(workers).unwrap() {
            let worker = worker.unwrap().path();
            if !worker.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&worker).unwrap() {
                let path = entry.unwrap().path();
                let is_temp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".temp"));
                if is_temp {
                    found.push(path);
                }
            }
        }
        found
    }
}
