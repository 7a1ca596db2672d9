//! Container lifecycle pipeline
//!
//! Drives the ordered create flow — image resolution, workspace
//! assembly, credential injection, host proxy supervision, container
//! create, onboarding injection — and the stop/restart/update/remove
//! family with per-target error accumulation. Progress is reported over
//! the bounded event channel in [`crate::progress`]; the pipeline never
//! prints.
//!
//! Cancellation (dropping the pipeline future) aborts the in-flight
//! runtime call but does not roll back resources already created;
//! `clawker container rm -f` is the remediation for leftovers.

use crate::config::{ProjectConfig, Settings, WorkspaceMode};
use crate::container::{container_name, ContainerIdentity};
use crate::credentials::{derive_injection, CredentialContext, TermCaps};
use crate::docker::{
    CreateSpec, ImageSource, ResolvedImage, ResourceLimits, Runtime,
};
use crate::errors::{ClawkerError, DockerError, Result, ValidationError};
use crate::hostproxy::HostProxy;
use crate::mount::{MountSpec, PortSpec};
use crate::names::generate_agent_name;
use crate::paths::APP_NAME;
use crate::progress::EventSender;
use crate::store::ConfigStore;
use crate::validate;
use crate::workspace::{
    build_workspace, initialize_config_volume, resolve_mode, WorkspaceOptions, REMOTE_HOME,
};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Sentinel image argument that triggers default-image resolution.
pub const IMAGE_SENTINEL: &str = "@";

/// Collaborator that materializes git worktrees. Worktree creation is
/// outside this crate; the CLI wires in a provider or [`NoWorktrees`].
pub trait WorktreeProvider {
    /// Whether worktree support is wired in.
    fn available(&self) -> bool;

    /// Resolve (creating if needed) the worktree for `spec`, returning
    /// its path.
    fn resolve(&self, project_root: &Path, spec: &str) -> Result<PathBuf>;
}

/// The null provider: `--worktree` fails with remediation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWorktrees;

impl WorktreeProvider for NoWorktrees {
    fn available(&self) -> bool {
        false
    }

    fn resolve(&self, _project_root: &Path, _spec: &str) -> Result<PathBuf> {
        Err(ValidationError::InvalidValue {
            message: "git worktree support is not available in this build".to_string(),
        }
        .into())
    }
}

/// Options for the create pipeline, mirroring the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Image reference, or [`IMAGE_SENTINEL`] for default resolution
    pub image: String,
    /// Command and args passed to the container
    pub command: Vec<String>,
    pub agent: Option<String>,
    pub name: Option<String>,
    pub mode: Option<WorkspaceMode>,
    pub env: Vec<String>,
    pub volumes: Vec<MountSpec>,
    pub ports: Vec<PortSpec>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub tty: bool,
    pub interactive: bool,
    pub network: Option<String>,
    pub labels: Vec<(String, String)>,
    pub auto_remove: bool,
    pub worktree: Option<String>,
    pub resources: ResourceLimits,
    pub restart_policy: Option<String>,
}

/// Result of a successful create.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub container_id: String,
    pub container_name: String,
    pub agent: String,
    pub warnings: Vec<String>,
}

impl CreateOutcome {
    /// The 12-character short ID written to stdout.
    pub fn short_id(&self) -> &str {
        let end = self.container_id.len().min(12);
        &self.container_id[..end]
    }
}

/// The project's built-image reference.
pub fn built_image_reference(slug: &str) -> String {
    format!("{APP_NAME}/{slug}:latest")
}

/// Resolve an image argument to a concrete reference with provenance.
///
/// Fallback order for the sentinel: project `default_image` → user
/// settings `default_image` → the project's built image. User settings
/// are consulted even when a project file exists but leaves
/// `default_image` unset.
pub fn resolve_image(
    explicit: &str,
    config: &ProjectConfig,
    settings: &Settings,
    project_slug: Option<&str>,
) -> Option<ResolvedImage> {
    if explicit != IMAGE_SENTINEL {
        return Some(ResolvedImage {
            reference: explicit.to_string(),
            source: ImageSource::Explicit,
        });
    }
    if let Some(reference) = &config.default_image {
        return Some(ResolvedImage {
            reference: reference.clone(),
            source: ImageSource::ProjectYaml,
        });
    }
    if let Some(reference) = &settings.default_image {
        return Some(ResolvedImage {
            reference: reference.clone(),
            source: ImageSource::UserSetting,
        });
    }
    project_slug.map(|slug| ResolvedImage {
        reference: built_image_reference(slug),
        source: ImageSource::BuiltImage,
    })
}

/// The create pipeline. Strictly sequential; progress events flow to
/// `events` while the caller renders them.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(image = %opts.image))]
pub async fn run_create<R: Runtime>(
    runtime: &R,
    store: &ConfigStore,
    opts: CreateOptions,
    proxy: Option<&HostProxy>,
    worktrees: &dyn WorktreeProvider,
    confirm_rebuild: &dyn Fn(&str) -> bool,
    events: &EventSender,
) -> Result<CreateOutcome> {
    let mut warnings = Vec::new();

    // Project context: creating a workload requires a registered project.
    let project = store
        .project_slug()
        .map(str::to_string)
        .ok_or_else(|| crate::errors::RegistryError::NotInProject {
            dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .display()
                .to_string(),
        })?;
    let project_root = store
        .project_root()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = store.project_config()?;
    let settings = store.settings()?;

    // Image resolution, with the rebuild delegate for a missing built
    // image.
    events.step_begin("Resolving image").await;
    let resolved = resolve_image(&opts.image, &config, &settings, Some(&project))
        .ok_or(ClawkerError::NoImage)?;
    debug!(reference = %resolved.reference, source = ?resolved.source, "Resolved image");
    if resolved.source == ImageSource::BuiltImage
        && !runtime.image_exists(&resolved.reference).await?
    {
        if !confirm_rebuild(&resolved.reference) {
            return Err(ClawkerError::ImageMissing {
                reference: resolved.reference.clone(),
                message: "rebuild declined".to_string(),
            });
        }
        events.step_begin("Building default image").await;
        runtime
            .build_default_image(&resolved.reference, &project_root)
            .await
            .map_err(|e| ClawkerError::ImageMissing {
                reference: resolved.reference.clone(),
                message: e.to_string(),
            })?;
        events.step_end("Building default image").await;
    }
    events.step_end("Resolving image").await;

    // Agent naming: conflicting --name/--agent fail; the agent label is
    // always populated, generated when neither flag names it.
    validate::validate_naming(&project, opts.name.as_deref(), opts.agent.as_deref())?;
    let agent = opts
        .agent
        .clone()
        .unwrap_or_else(generate_agent_name);
    let identity = ContainerIdentity::new(project.clone(), agent.clone());
    let name = opts
        .name
        .clone()
        .unwrap_or_else(|| identity.container_name());

    // Working directory, honoring --worktree.
    validate::validate_worktree_available(opts.worktree.as_deref(), worktrees.available())?;
    let (source_dir, worktree_root) = match &opts.worktree {
        Some(spec) => {
            let path = worktrees.resolve(&project_root, spec)?;
            (path, Some(project_root.clone()))
        }
        None => (project_root.clone(), None),
    };

    // Workspace mounts, plus one-time config-volume initialization.
    events.step_begin("Preparing workspace").await;
    let mode = resolve_mode(opts.mode, config.workspace.default_mode);
    let workspace = build_workspace(
        runtime,
        &WorkspaceOptions {
            project: project.clone(),
            agent: agent.clone(),
            source_dir,
            project_root_dir: worktree_root,
            remote_path: config.workspace.remote_path.clone(),
            mode,
        },
    )
    .await?;
    if workspace.config_created {
        events.step_begin("Initializing agent config").await;
        let init_warnings =
            initialize_config_volume(runtime, &workspace, &config.agent.includes).await?;
        for warning in init_warnings {
            events.warning(&warning).await;
            warnings.push(warning);
        }
        events.step_end("Initializing agent config").await;
    }
    events.step_end("Preparing workspace").await;

    // Host proxy is wanted but never load-bearing for create.
    let mut proxy_running = false;
    let mut proxy_url = None;
    if config.security.enable_host_proxy() {
        if let Some(proxy) = proxy {
            match proxy.ensure_running().await {
                Ok(_) => {
                    proxy_running = true;
                    proxy_url = Some(proxy.proxy_url());
                }
                Err(e) => {
                    let warning = format!("host proxy unavailable: {e}");
                    warn!(error = %e, "Continuing without host proxy");
                    events.warning(&warning).await;
                    warnings.push(warning);
                }
            }
        }
    }

    // Credential and environment injection.
    let injection = derive_injection(&CredentialContext {
        config: &config,
        identity: &identity,
        workspace: &workspace,
        proxy_running,
        proxy_url,
        term: TermCaps::from_env(),
    })?;
    for warning in &injection.warnings {
        events.warning(warning).await;
        warnings.push(warning.clone());
    }

    validate_flags(&project, &opts)?;

    // Runtime configs: container, host, networking.
    let network = opts
        .network
        .clone()
        .unwrap_or_else(crate::paths::managed_network);
    let managed_network = opts.network.is_none();
    let mut labels: std::collections::HashMap<String, String> =
        opts.labels.iter().cloned().collect();
    // Identity labels are authoritative and win over user labels.
    labels.extend(identity.labels());

    let mut env = opts.env.clone();
    env.extend(injection.env);
    let mut mounts = workspace.mounts.clone();
    mounts.extend(injection.mounts);
    mounts.extend(opts.volumes.clone());

    let spec = CreateSpec {
        name: name.clone(),
        image: resolved.reference.clone(),
        command: opts.command.clone(),
        entrypoint: opts.entrypoint.clone(),
        workdir: opts
            .workdir
            .clone()
            .or_else(|| Some(workspace.remote_path.clone())),
        user: opts.user.clone(),
        tty: opts.tty,
        interactive: opts.interactive,
        env,
        labels,
        mounts,
        ports: opts.ports.clone(),
        network: Some(network),
        cap_add: config.security.cap_add.clone(),
        auto_remove: opts.auto_remove,
        restart_policy: opts.restart_policy.clone(),
        resources: opts.resources.clone(),
        ensure_network: managed_network,
    };

    events.step_begin("Creating container").await;
    let created = runtime.container_create(&spec).await?;
    for warning in &created.warnings {
        events.warning(warning).await;
        warnings.push(warning.clone());
    }
    events.step_end("Creating container").await;

    // Onboarding artifact lands between create and start; failure here is
    // fatal and the container is left in place for inspection.
    if config
        .agent
        .claude_code
        .as_ref()
        .is_some_and(|c| c.use_host_auth())
    {
        events.step_begin("Injecting onboarding artifact").await;
        inject_onboarding(runtime, &created.id).await?;
        events.step_end("Injecting onboarding artifact").await;
    }

    Ok(CreateOutcome {
        container_id: created.id,
        container_name: name,
        agent,
        warnings,
    })
}

/// Cross-field validation gate, run before runtime configs are built.
fn validate_flags(project: &str, opts: &CreateOptions) -> Result<()> {
    validate::validate_naming(project, opts.name.as_deref(), opts.agent.as_deref())?;
    if let Some(weight) = opts.resources.blkio_weight {
        validate::validate_blkio_weight(weight)?;
    }
    Ok(())
}

/// Write the onboarding-complete marker into the stopped container's
/// config directory.
async fn inject_onboarding<R: Runtime>(runtime: &R, container_id: &str) -> Result<()> {
    let payload = serde_json::json!({
        "onboarding_complete": true,
        "injected_at": chrono::Utc::now().to_rfc3339(),
    })
    .to_string();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "clawker/onboarding.json", payload.as_bytes())
        .map_err(|e| ClawkerError::OnboardingInject {
            container: container_id.to_string(),
            message: e.to_string(),
        })?;
    let archive = builder
        .into_inner()
        .map_err(|e| ClawkerError::OnboardingInject {
            container: container_id.to_string(),
            message: e.to_string(),
        })?;

    runtime
        .copy_to_container(container_id, archive, &format!("{REMOTE_HOME}/.config"))
        .await
        .map_err(|e| ClawkerError::OnboardingInject {
            container: container_id.to_string(),
            message: e.to_string(),
        })
}

/// Run the project's `agent.post_init` commands inside a container that
/// just started for the first time. Command failures are reported as
/// warnings, not errors: the container is up and usable.
#[instrument(skip(runtime, config))]
pub async fn run_post_init<R: Runtime>(
    runtime: &R,
    container: &str,
    config: &ProjectConfig,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    for command in &config.agent.post_init {
        let argv = vec!["sh".to_string(), "-c".to_string(), command.clone()];
        let output = runtime
            .exec_capture(container, &argv, &[], None, None)
            .await?;
        if output.exit_code != 0 {
            warnings.push(format!(
                "post_init command failed ({}): {}",
                output.exit_code,
                command
            ));
        }
    }
    Ok(warnings)
}

/// A lifecycle operation applied to one or more containers.
#[derive(Debug, Clone)]
pub enum ContainerOp {
    Start,
    Stop {
        timeout: Option<u32>,
        signal: Option<String>,
    },
    Restart {
        timeout: Option<u32>,
    },
    Kill {
        signal: String,
    },
    Pause,
    Unpause,
    Remove {
        force: bool,
    },
    Wait,
    Update {
        resources: ResourceLimits,
        restart_policy: Option<String>,
    },
}

impl ContainerOp {
    /// Verb used in the partial-failure summary ("failed to stop …").
    pub fn verb(&self) -> &'static str {
        match self {
            ContainerOp::Start => "start",
            ContainerOp::Stop { .. } => "stop",
            ContainerOp::Restart { .. } => "restart",
            ContainerOp::Kill { .. } => "kill",
            ContainerOp::Pause => "pause",
            ContainerOp::Unpause => "unpause",
            ContainerOp::Remove { .. } => "remove",
            ContainerOp::Wait => "wait",
            ContainerOp::Update { .. } => "update",
        }
    }
}

/// Per-target outcome of a multi-container operation.
#[derive(Debug)]
pub struct TargetResult {
    pub name: String,
    /// Extra output for stdout (e.g. an exit code for `wait`)
    pub detail: Option<String>,
    pub error: Option<ClawkerError>,
}

/// Accumulated results of a multi-container operation.
#[derive(Debug)]
pub struct MultiReport {
    pub op: String,
    pub results: Vec<TargetResult>,
}

impl MultiReport {
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }

    /// The partial-failure error when any target failed.
    pub fn partial_failure(&self) -> Option<ClawkerError> {
        let failed = self.failed_count();
        (failed > 0).then(|| ClawkerError::PartialFailure {
            op: self.op.clone(),
            failed,
        })
    }
}

/// Expand `--agent` selectors and literal names into container names.
pub fn resolve_targets(project: &str, names: &[String], agents: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = names.to_vec();
    targets.extend(agents.iter().map(|agent| container_name(project, agent)));
    targets
}

/// Apply one operation to every target, accumulating per-target errors
/// instead of stopping at the first failure.
#[instrument(skip(runtime, targets), fields(op = op.verb(), targets = targets.len()))]
pub async fn apply_container_op<R: Runtime>(
    runtime: &R,
    op: &ContainerOp,
    targets: &[String],
) -> MultiReport {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let outcome = dispatch_op(runtime, op, target).await;
        results.push(match outcome {
            Ok(detail) => TargetResult {
                name: target.clone(),
                detail,
                error: None,
            },
            Err(error) => TargetResult {
                name: target.clone(),
                detail: None,
                error: Some(error),
            },
        });
    }
    MultiReport {
        op: op.verb().to_string(),
        results,
    }
}

async fn dispatch_op<R: Runtime>(
    runtime: &R,
    op: &ContainerOp,
    target: &str,
) -> Result<Option<String>> {
    // Resolution is by name or ID; a missing target is a per-target
    // error, not a global abort.
    let info = runtime.container_inspect(target).await?.ok_or_else(|| {
        ClawkerError::Docker(DockerError::ContainerNotFound {
            name: target.to_string(),
        })
    })?;
    let id = info.id.as_str();
    match op {
        ContainerOp::Start => runtime.container_start(id).await.map(|_| None),
        ContainerOp::Stop { timeout, signal } => runtime
            .container_stop(id, *timeout, signal.as_deref())
            .await
            .map(|_| None),
        ContainerOp::Restart { timeout } => {
            runtime.container_restart(id, *timeout).await.map(|_| None)
        }
        ContainerOp::Kill { signal } => {
            runtime.container_kill(id, signal).await.map(|_| None)
        }
        ContainerOp::Pause => runtime.container_pause(id).await.map(|_| None),
        ContainerOp::Unpause => runtime.container_unpause(id).await.map(|_| None),
        ContainerOp::Remove { force } => {
            runtime.container_remove(id, *force).await.map(|_| None)
        }
        ContainerOp::Wait => runtime
            .container_wait(id)
            .await
            .map(|code| Some(code.to_string())),
        ContainerOp::Update {
            resources,
            restart_policy,
        } => runtime
            .container_update(id, resources, restart_policy.as_deref())
            .await
            .map(|_| None),
    }
}
