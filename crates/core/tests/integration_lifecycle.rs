//! Lifecycle pipeline tests against the mock runtime
//!
//! These exercise the create pipeline and the multi-target operation
//! family without a docker daemon: step ordering, label schema, naming
//! rules, default-image rebuild, onboarding injection, and partial
//! failure accumulation.

use clawker_core::container::container_name;
use clawker_core::docker::mock::MockRuntime;
use clawker_core::docker::{list_containers_by_project, ImageSource};
use clawker_core::lifecycle::{
    apply_container_op, run_create, ContainerOp, CreateOptions, NoWorktrees,
};
use clawker_core::paths::{LABEL_AGENT, LABEL_MANAGED, LABEL_PROJECT};
use clawker_core::progress::{EventSender, PipelineEvent};
use clawker_core::store::{ConfigStore, LoadOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn setup_project(tmp: &TempDir) -> (PathBuf, PathBuf) {
    let home = tmp.path().join("home");
    let root = tmp.path().join("repo");
    std::fs::create_dir_all(&home).expect("mkdir home");
    std::fs::create_dir_all(&root).expect("mkdir repo");
    std::fs::write(
        home.join("projects.yaml"),
        format!(
            "projects:\n  myapp:\n    name: My App\n    root: {}\n",
            root.display()
        ),
    )
    .expect("write registry");
    (home, root)
}

fn load_store(home: &Path, cwd: &Path) -> ConfigStore {
    ConfigStore::load(LoadOptions {
        cwd: Some(cwd.to_path_buf()),
        home: Some(home.to_path_buf()),
        ignore_env: true,
    })
    .expect("load store")
}

fn base_options(image: &str) -> CreateOptions {
    CreateOptions {
        image: image.to_string(),
        ..Default::default()
    }
}

async fn create(
    runtime: &MockRuntime,
    store: &ConfigStore,
    opts: CreateOptions,
) -> clawker_core::errors::Result<clawker_core::lifecycle::CreateOutcome> {
    run_create(
        runtime,
        store,
        opts,
        None,
        &NoWorktrees,
        &|_| false,
        &EventSender::disabled(),
    )
    .await
}

#[tokio::test]
async fn create_with_agent_composes_name_and_labels() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    let outcome = create(&runtime, &store, opts).await.unwrap();

    assert_eq!(outcome.container_name, "clawker.myapp.dev");
    assert_eq!(outcome.agent, "dev");
    assert_eq!(outcome.short_id().len(), 12);

    let specs = runtime.created_specs.lock().unwrap();
    let spec = specs.last().unwrap();
    assert_eq!(spec.labels.get(LABEL_MANAGED).map(String::as_str), Some("true"));
    assert_eq!(spec.labels.get(LABEL_PROJECT).map(String::as_str), Some("myapp"));
    assert_eq!(spec.labels.get(LABEL_AGENT).map(String::as_str), Some("dev"));
    assert_eq!(spec.workdir.as_deref(), Some("/workspace"));
    assert!(spec.env.contains(&"CLAWKER_PROJECT=myapp".to_string()));
    assert!(spec.env.contains(&"CLAWKER_WORKSPACE_MODE=bind".to_string()));
}

#[tokio::test]
async fn volumes_are_ensured_before_container_create() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    create(&runtime, &store, opts).await.unwrap();

    let journal = runtime.journal();
    let create_pos = journal
        .iter()
        .position(|c| c.starts_with("container_create"))
        .expect("create happened");
    let volume_positions: Vec<usize> = journal
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("ensure_volume"))
        .map(|(i, _)| i)
        .collect();
    assert!(!volume_positions.is_empty());
    assert!(volume_positions.iter().all(|&p| p < create_pos));
}

#[tokio::test]
async fn name_flag_overrides_composed_name_but_agent_label_is_populated() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.name = Some("custom".to_string());
    let outcome = create(&runtime, &store, opts).await.unwrap();

    assert_eq!(outcome.container_name, "custom");
    let specs = runtime.created_specs.lock().unwrap();
    let spec = specs.last().unwrap();
    assert_eq!(spec.name, "custom");
    assert_eq!(spec.labels.get(LABEL_PROJECT).map(String::as_str), Some("myapp"));
    let agent_label = spec.labels.get(LABEL_AGENT).expect("agent label");
    assert!(!agent_label.is_empty());
}

#[tokio::test]
async fn generated_agent_name_is_used_when_neither_flag_given() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let outcome = create(&runtime, &store, base_options("alpine:3.20"))
        .await
        .unwrap();
    assert!(outcome.container_name.starts_with("clawker.myapp."));
    assert!(!outcome.agent.is_empty());
    assert_eq!(
        outcome.container_name,
        container_name("myapp", &outcome.agent)
    );
}

#[tokio::test]
async fn conflicting_name_and_agent_fail_before_any_create() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.name = Some("custom".to_string());
    opts.agent = Some("dev".to_string());
    let err = create(&runtime, &store, opts).await.unwrap_err();
    assert!(err.to_string().contains("different containers"), "{err}");
    assert!(!runtime
        .journal()
        .iter()
        .any(|c| c.starts_with("container_create")));
}

#[tokio::test]
async fn missing_built_image_invokes_rebuild_delegate_on_consent() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new();

    let mut opts = base_options("@");
    opts.agent = Some("dev".to_string());
    let outcome = run_create(
        &runtime,
        &store,
        opts,
        None,
        &NoWorktrees,
        &|reference| {
            assert_eq!(reference, "clawker/myapp:latest");
            true
        },
        &EventSender::disabled(),
    )
    .await
    .unwrap();

    assert!(runtime
        .journal()
        .iter()
        .any(|c| c.starts_with("build_default_image clawker/myapp:latest")));
    let specs = runtime.created_specs.lock().unwrap();
    assert_eq!(specs.last().unwrap().image, "clawker/myapp:latest");
    drop(specs);
    assert!(!outcome.container_id.is_empty());
}

#[tokio::test]
async fn declined_rebuild_fails_without_creating_anything() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new();

    let mut opts = base_options("@");
    opts.agent = Some("dev".to_string());
    let err = create(&runtime, &store, opts).await.unwrap_err();
    assert!(err.to_string().contains("not built"), "{err}");
    assert!(!runtime
        .journal()
        .iter()
        .any(|c| c.starts_with("container_create")));
}

#[tokio::test]
async fn project_default_image_wins_over_user_setting() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(home.join("settings.yaml"), "default_image: user:img\n").unwrap();
    std::fs::write(root.join("clawker.yaml"), "default_image: project:img\n").unwrap();
    let store = load_store(&home, &root);

    let config = store.project_config().unwrap();
    let settings = store.settings().unwrap();
    let resolved =
        clawker_core::lifecycle::resolve_image("@", &config, &settings, Some("myapp")).unwrap();
    assert_eq!(resolved.reference, "project:img");
    assert_eq!(resolved.source, ImageSource::ProjectYaml);
}

#[tokio::test]
async fn snapshot_mode_populates_workspace_volume_before_create() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(root.join("main.rs"), "fn main() {}").unwrap();
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    opts.mode = Some(clawker_core::config::WorkspaceMode::Snapshot);
    create(&runtime, &store, opts).await.unwrap();

    let journal = runtime.journal();
    let populate = journal
        .iter()
        .position(|c| c.starts_with("copy_to_volume clawker.myapp.dev.workspace"))
        .expect("workspace volume populated");
    let create_pos = journal
        .iter()
        .position(|c| c.starts_with("container_create"))
        .expect("create happened");
    assert!(populate < create_pos);

    let specs = runtime.created_specs.lock().unwrap();
    let spec = specs.last().unwrap();
    assert!(spec.env.contains(&"CLAWKER_WORKSPACE_MODE=snapshot".to_string()));
    assert!(spec
        .mounts
        .iter()
        .any(|m| m.source.as_deref() == Some("clawker.myapp.dev.workspace")));
}

#[tokio::test]
async fn onboarding_artifact_is_injected_between_create_and_return() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(
        root.join("clawker.yaml"),
        "agent:\n  claude_code:\n    use_host_auth: true\n",
    )
    .unwrap();
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    create(&runtime, &store, opts).await.unwrap();

    let journal = runtime.journal();
    let create_pos = journal
        .iter()
        .position(|c| c.starts_with("container_create"))
        .unwrap();
    let inject_pos = journal
        .iter()
        .position(|c| c.starts_with("copy_to_container"))
        .expect("onboarding injected");
    assert!(inject_pos > create_pos);
    // The container was never started by the create path.
    assert!(!journal.iter().any(|c| c.starts_with("container_start")));
}

#[tokio::test]
async fn onboarding_failure_is_fatal_and_leaves_container() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(
        root.join("clawker.yaml"),
        "agent:\n  claude_code:\n    use_host_auth: true\n",
    )
    .unwrap();
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");
    runtime.fail_on("copy_to_container");

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    let err = create(&runtime, &store, opts).await.unwrap_err();
    assert!(err.to_string().contains("onboarding"), "{err}");
    // The container stays for inspection.
    assert!(runtime
        .containers
        .lock()
        .unwrap()
        .contains_key("clawker.myapp.dev"));
}

#[tokio::test]
async fn from_env_warnings_flow_over_the_event_channel() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(
        root.join("clawker.yaml"),
        "agent:\n  from_env: [CLAWKER_SURELY_UNSET_VARIABLE]\n",
    )
    .unwrap();
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let (events, mut rx) = EventSender::channel();
    let consumer = tokio::spawn(async move {
        let mut warnings = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::Warning { text } = event {
                warnings.push(text);
            }
        }
        warnings
    });

    let mut opts = base_options("alpine:3.20");
    opts.agent = Some("dev".to_string());
    let outcome = run_create(
        &runtime,
        &store,
        opts,
        None,
        &NoWorktrees,
        &|_| false,
        &events,
    )
    .await
    .unwrap();
    drop(events);

    let warnings = consumer.await.unwrap();
    assert!(warnings
        .iter()
        .any(|w| w.contains("CLAWKER_SURELY_UNSET_VARIABLE")));
    assert_eq!(outcome.warnings, warnings);
}

#[tokio::test]
async fn post_init_commands_run_via_exec() {
    let tmp = TempDir::new().unwrap();
    let (home, root) = setup_project(&tmp);
    std::fs::write(
        root.join("clawker.yaml"),
        "agent:\n  post_init: [\"npm install\", \"make setup\"]\n",
    )
    .unwrap();
    let store = load_store(&home, &root);
    let runtime = MockRuntime::new();
    runtime.add_container("clawker.myapp.dev", "running", HashMap::new());

    let config = store.project_config().unwrap();
    let warnings = clawker_core::lifecycle::run_post_init(&runtime, "clawker.myapp.dev", &config)
        .await
        .unwrap();
    assert!(warnings.is_empty());

    let journal = runtime.journal();
    let execs: Vec<&String> = journal.iter().filter(|c| c.starts_with("exec ")).collect();
    assert_eq!(execs.len(), 2);
    assert!(execs[0].contains("npm install"));
    assert!(execs[1].contains("make setup"));
}

#[tokio::test]
async fn stop_accumulates_per_target_failures() {
    let tmp = TempDir::new().unwrap();
    let (_home, _root) = setup_project(&tmp);
    let runtime = MockRuntime::new();
    runtime.add_container(
        "clawker.myapp.dev",
        "running",
        HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), "myapp".to_string()),
            (LABEL_AGENT.to_string(), "dev".to_string()),
        ]),
    );

    let report = apply_container_op(
        &runtime,
        &ContainerOp::Stop {
            timeout: Some(5),
            signal: None,
        },
        &[
            "clawker.myapp.dev".to_string(),
            "clawker.myapp.ghost".to_string(),
        ],
    )
    .await;

    assert_eq!(report.failed_count(), 1);
    let ok: Vec<&str> = report
        .results
        .iter()
        .filter(|r| r.error.is_none())
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(ok, vec!["clawker.myapp.dev"]);
    let summary = report.partial_failure().unwrap().to_string();
    assert_eq!(summary, "failed to stop 1 container(s)");
}

#[tokio::test]
async fn label_filter_is_the_authoritative_project_selector() {
    let runtime = MockRuntime::new();
    runtime.add_container(
        "clawker.myapp.dev",
        "running",
        HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), "myapp".to_string()),
        ]),
    );
    // Name looks like the project but labels say otherwise.
    runtime.add_container(
        "clawker.myapp.imposter",
        "running",
        HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), "other".to_string()),
        ]),
    );
    runtime.add_container("unmanaged", "running", HashMap::new());

    let containers = list_containers_by_project(&runtime, "myapp", true)
        .await
        .unwrap();
    let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["clawker.myapp.dev"]);
}

#[tokio::test]
async fn state_machine_round_trip_on_mock_runtime() {
    let runtime = MockRuntime::new();
    runtime.add_container("c", "created", HashMap::new());

    let ops = [
        (ContainerOp::Start, "running"),
        (ContainerOp::Pause, "paused"),
        (ContainerOp::Unpause, "running"),
        (
            ContainerOp::Stop {
                timeout: None,
                signal: None,
            },
            "exited",
        ),
        (ContainerOp::Start, "running"),
        (
            ContainerOp::Kill {
                signal: "KILL".to_string(),
            },
            "exited",
        ),
    ];
    for (op, expected) in ops {
        let report = apply_container_op(&runtime, &op, &["c".to_string()]).await;
        assert_eq!(report.failed_count(), 0, "op {:?}", report.op);
        let state = runtime.containers.lock().unwrap()["c"].state.clone();
        assert_eq!(state, expected);
    }

    let report = apply_container_op(
        &runtime,
        &ContainerOp::Remove { force: true },
        &["c".to_string()],
    )
    .await;
    assert_eq!(report.failed_count(), 0);
    assert!(runtime.containers.lock().unwrap().is_empty());
}
