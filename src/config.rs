//! Worker config files and tree helpers
//!
//! Configs are handled as opaque `serde_json::Value` trees. Only the fields
//! this crate reads or patches get helpers: `name`, `vars`, `env.<name>` and
//! `services`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkerError;
use crate::jsonc;

/// Config file every worker directory must contain
pub const WORKER_CONFIG_FILE: &str = "wrangler.jsonc";
/// Composed config written next to the worker's own config
pub const TEMP_CONFIG_FILE: &str = ".temp.wrangler.jsonc";
/// Snapshot of the base config used for a composition
pub const TEMP_BASE_CONFIG_FILE: &str = ".temp.base.wrangler.jsonc";
/// Base config picked up from the project root when none is given
pub const DEFAULT_BASE_CONFIG: &str = "base.wrangler.jsonc";

/// A `services` entry as declared in a config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Binding name the worker code sees
    pub binding: String,
    /// Worker directory name (logical service) or, after resolution, the deployed name
    pub service: String,
}

/// Read and parse a JSONC config file
pub fn read(path: &Path) -> Result<Value, WorkerError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        WorkerError::file_operation(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse(&text, path)
}

/// Parse JSONC text; `path` is only used in the error message
pub fn parse(text: &str, path: &Path) -> Result<Value, WorkerError> {
    let value = jsonc::parse(text).map_err(|e| {
        WorkerError::file_operation(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(WorkerError::file_operation(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Serialize a config tree back to disk (plain JSON is valid JSONC)
pub fn write(path: &Path, value: &Value) -> Result<(), WorkerError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|e| {
        WorkerError::file_operation(format!("Failed to serialize {}: {}", path.display(), e))
    })?;
    text.push('\n');
    std::fs::write(path, text).map_err(|e| {
        WorkerError::file_operation(format!("Failed to write {}: {}", path.display(), e))
    })
}

/// Apply `base` underneath `target`: keys missing from `target` are copied,
/// objects present on both sides merge recursively, anything else already in
/// `target` wins.
pub fn merge_defaults(target: &mut Value, base: &Value) {
    let (Value::Object(target), Value::Object(base)) = (target, base) else {
        return;
    };
    for (key, base_value) in base {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), base_value.clone());
            }
            Some(existing) if existing.is_object() && base_value.is_object() => {
                merge_defaults(existing, base_value);
            }
            Some(_) => {}
        }
    }
}

pub fn name(config: &Value) -> Option<&str> {
    config.get("name").and_then(Value::as_str)
}

pub fn set_name(config: &mut Value, name: &str) {
    if let Some(map) = config.as_object_mut() {
        map.insert("name".to_string(), Value::String(name.to_string()));
    }
}

/// The `env.<env>` block, if declared
pub fn env_block<'a>(config: &'a Value, env: &str) -> Option<&'a Map<String, Value>> {
    config.get("env")?.get(env)?.as_object()
}

/// The `env.<env>` block, created when missing
pub fn env_block_mut<'a>(config: &'a mut Value, env: &str) -> &'a mut Map<String, Value> {
    let root = ensure_object(config);
    let envs = ensure_object(root.entry("env").or_insert_with(|| Value::Object(Map::new())));
    ensure_object(envs.entry(env).or_insert_with(|| Value::Object(Map::new())))
}

/// Top-level object of a config
pub fn root_mut(config: &mut Value) -> &mut Map<String, Value> {
    ensure_object(config)
}

/// `vars` of a block, created when missing
pub fn vars_mut(block: &mut Map<String, Value>) -> &mut Map<String, Value> {
    ensure_object(block.entry("vars").or_insert_with(|| Value::Object(Map::new())))
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn services_value<'a>(config: &'a Value, env: Option<&str>) -> Option<&'a Value> {
    match env {
        Some(env) => env_block(config, env)?.get("services"),
        None => config.get("services"),
    }
}

/// Bindings declared for `env` (or top level when `env` is `None`)
pub fn services(config: &Value, env: Option<&str>) -> Result<Vec<ServiceBinding>, WorkerError> {
    match services_value(config, env) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            WorkerError::worker_command(format!("Failed to get service bindings: {}", e))
        }),
    }
}

/// Point the entry for `binding` at `service`. Other fields on the entry are
/// kept. Returns false when no such entry exists.
pub fn set_service(config: &mut Value, env: Option<&str>, binding: &str, service: &str) -> bool {
    let list = match env {
        Some(env) => config
            .get_mut("env")
            .and_then(|e| e.get_mut(env))
            .and_then(|b| b.get_mut("services")),
        None => config.get_mut("services"),
    };
    let Some(Value::Array(entries)) = list else {
        return false;
    };

    let mut patched = false;
    for entry in entries.iter_mut() {
        let Some(map) = entry.as_object_mut() else {
            continue;
        };
        if map.get("binding").and_then(Value::as_str) == Some(binding) {
            map.insert("service".to_string(), Value::String(service.to_string()));
            patched = true;
        }
    }
    patched
}
