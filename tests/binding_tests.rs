//! Service binding resolution across worker directories

mod common;

use common::Monorepo;
use monocf::config;
use monocf::{
    compose, BindingResolver, ComposeOptions, ErrorKind, ReleaseInfo, TempArtifacts, Variables,
    WorkerDescriptor,
};
use serde_json::json;

fn release() -> ReleaseInfo {
    ReleaseInfo::new("1.0.0", "abc1234")
}

#[test]
fn prepare_resolves_transitive_dependencies() {
    let repo = Monorepo::new();
    repo.worker(
        "a",
        r#"{"name": "a", "services": [{"binding": "B", "service": "b"}]}"#,
    );
    repo.worker(
        "b",
        r#"{
            // B talks to C
            "name": "B_Service",
            "services": [{"binding": "C", "service": "c"}],
        }"#,
    );
    repo.worker("c", r#"{"name": "c"}"#);

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let root = WorkerDescriptor::locate(&settings.workers_root(), "a");
    let mut composed = compose(&root, &options, &mut artifacts).unwrap();
    let resolved = BindingResolver::new(settings.workers_root(), options)
        .prepare(&mut composed, &mut artifacts)
        .unwrap();

    let pairs: Vec<_> = resolved
        .iter()
        .map(|r| (r.binding.as_str(), r.service.as_str()))
        .collect();
    assert_eq!(pairs, [("B", "---ervice"), ("C", "c")]);
    assert_eq!(resolved[0].config_path, repo.worker_dir("b").join(".temp.wrangler.jsonc"));
    assert_eq!(resolved[1].config_path, repo.worker_dir("c").join(".temp.wrangler.jsonc"));

    // parent patched in memory and on disk
    assert_eq!(composed.content()["services"][0]["service"], "---ervice");
    let a_on_disk = config::read(composed.path()).unwrap();
    assert_eq!(a_on_disk["services"][0]["service"], "---ervice");

    // intermediate dependency patched too
    let b_on_disk = config::read(&resolved[0].config_path).unwrap();
    assert_eq!(b_on_disk["services"][0]["service"], "c");

    assert_eq!(artifacts.paths().len(), 3);
    assert!(artifacts.cleanup().is_empty());
    assert!(repo.leftover_temp_files().is_empty());
}

#[test]
fn apply_suffixes_env_and_stays_shallow() {
    let repo = Monorepo::new();
    repo.worker(
        "api",
        r#"{"name": "api", "env": {"staging": {"services": [{"binding": "BILLING", "service": "billing"}]}}}"#,
    );
    repo.worker(
        "billing",
        r#"{"name": "billing", "env": {"staging": {"services": [{"binding": "LEDGER", "service": "ledger"}]}}}"#,
    );
    repo.worker("ledger", r#"{"name": "ledger"}"#);

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions {
        base_config: None,
        variables: &vars,
        env: Some("staging"),
        release: &release,
    };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let resolved = BindingResolver::new(settings.workers_root(), options)
        .apply(&mut composed, &mut artifacts)
        .unwrap();

    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].service, "billing-staging");
    assert_eq!(
        composed.content()["env"]["staging"]["services"],
        json!([{"binding": "BILLING", "service": "billing-staging"}])
    );
    assert!(!repo.worker_dir("ledger").join(".temp.wrangler.jsonc").exists());
}

#[test]
fn services_outside_selected_env_are_ignored() {
    let repo = Monorepo::new();
    repo.worker(
        "api",
        r#"{"name": "api", "services": [{"binding": "GHOST", "service": "ghost"}]}"#,
    );

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions {
        base_config: None,
        variables: &vars,
        env: Some("production"),
        release: &release,
    };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let resolved = BindingResolver::new(settings.workers_root(), options)
        .prepare(&mut composed, &mut artifacts)
        .unwrap();
    assert!(resolved.is_empty());
}

#[test]
fn missing_dependency_is_binding_error() {
    let repo = Monorepo::new();
    repo.worker(
        "api",
        r#"{"name": "api", "services": [{"binding": "GHOST", "service": "ghost"}]}"#,
    );

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let err = BindingResolver::new(settings.workers_root(), options)
        .prepare(&mut composed, &mut artifacts)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceBinding);
    assert!(err.message().starts_with("Service ghost not found at"));
}

#[test]
fn dependency_without_config_is_binding_error() {
    let repo = Monorepo::new();
    repo.worker(
        "api",
        r#"{"name": "api", "services": [{"binding": "AUTH", "service": "auth"}]}"#,
    );
    std::fs::create_dir_all(repo.worker_dir("auth")).unwrap();

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let err = BindingResolver::new(settings.workers_root(), options)
        .apply(&mut composed, &mut artifacts)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceBinding);
    assert!(err.message().contains("config not found"));
}

#[test]
fn cycle_fails_fast_with_path() {
    let repo = Monorepo::new();
    repo.worker("a", r#"{"name": "a", "services": [{"binding": "B", "service": "b"}]}"#);
    repo.worker("b", r#"{"name": "b", "services": [{"binding": "A", "service": "a"}]}"#);

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let a = WorkerDescriptor::locate(&settings.workers_root(), "a");
    let mut composed = compose(&a, &options, &mut artifacts).unwrap();
    let err = BindingResolver::new(settings.workers_root(), options)
        .prepare(&mut composed, &mut artifacts)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceBinding);
    assert_eq!(err.message(), "Circular service binding: a -> b -> a");

    artifacts.cleanup();
    assert!(repo.leftover_temp_files().is_empty());
}

#[test]
fn broken_dependency_config_becomes_worker_command_error() {
    let repo = Monorepo::new();
    repo.worker("api", r#"{"name": "api", "services": [{"binding": "B", "service": "b"}]}"#);
    repo.worker("b", "{ broken");

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let err = BindingResolver::new(settings.workers_root(), options)
        .prepare(&mut composed, &mut artifacts)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkerCommand);
    assert!(err.message().starts_with("Failed to create service bindings: Failed to create temporary config for b"));
}

#[test]
fn apply_without_env_only_sanitizes() {
    let repo = Monorepo::new();
    repo.worker(
        "api",
        r#"{"name": "api", "services": [{"binding": "BILLING", "service": "billing"}]}"#,
    );
    repo.worker("billing", r#"{"name": "Billing_Svc"}"#);

    let settings = repo.settings();
    let vars = Variables::new();
    let release = release();
    let options = ComposeOptions { base_config: None, variables: &vars, env: None, release: &release };
    let mut artifacts = TempArtifacts::new();

    let api = WorkerDescriptor::locate(&settings.workers_root(), "api");
    let mut composed = compose(&api, &options, &mut artifacts).unwrap();
    let resolved = BindingResolver::new(settings.workers_root(), options)
        .apply(&mut composed, &mut artifacts)
        .unwrap();

    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].service, "--illing--vc");
    assert_eq!(
        composed.content()["services"],
        json!([{"binding": "BILLING", "service": "--illing--vc"}])
    );
    let on_disk = config::read(composed.path()).unwrap();
    assert_eq!(on_disk["services"][0]["service"], "--illing--vc");
    assert!(composed.content().get("env").is_none());

    assert!(artifacts.cleanup().is_empty());
    assert!(repo.leftover_temp_files().is_empty());
}
