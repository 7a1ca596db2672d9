//! Container runtime integration
//!
//! A thin capability surface over the local container runtime, driven
//! through the `docker` CLI. The [`Runtime`] trait is what the lifecycle
//! pipeline consumes; [`CliDocker`] is the production implementation and
//! tests substitute mocks. Labels — never name parsing — are the source
//! of truth for filtering managed containers.

use crate::errors::{DockerError, Result};
use crate::mount::{MountSpec, PortSpec};
use crate::paths::{LABEL_MANAGED, LABEL_PROJECT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Where a resolved image reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSource {
    /// Passed explicitly on the command line
    Explicit,
    /// `default_image` in the project's `clawker.yaml`
    ProjectYaml,
    /// `default_image` in user settings
    UserSetting,
    /// The project's built image (`clawker/<slug>:latest`)
    BuiltImage,
}

/// An image reference plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub reference: String,
    pub source: ImageSource,
}

/// Container information from list/inspect operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID
    pub id: String,
    /// Primary container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Runtime state (`created`, `running`, `paused`, `exited`, ...)
    pub state: String,
    /// Human status line
    pub status: String,
    /// Container labels
    pub labels: HashMap<String, String>,
}

/// Result of creating a container.
#[derive(Debug, Clone)]
pub struct CreateResult {
    pub id: String,
    pub warnings: Vec<String>,
}

/// Result of ensuring a named volume exists.
#[derive(Debug, Clone, Copy)]
pub struct EnsureVolumeResult {
    /// True when this call created the volume
    pub created: bool,
}

/// Resource limits for create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory: Option<i64>,
    /// Memory+swap limit in bytes; -1 means unlimited swap
    pub memory_swap: Option<i64>,
    /// CPU quota in units of 10⁻⁹ CPUs
    pub nano_cpus: Option<i64>,
    /// Max process count
    pub pids_limit: Option<i64>,
    /// Block-IO weight: 0 (disabled) or 10–1000
    pub blkio_weight: Option<u16>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn append_args(&self, args: &mut Vec<String>) {
        if let Some(memory) = self.memory {
            args.push(format!("--memory={memory}"));
        }
        if let Some(swap) = self.memory_swap {
            args.push(format!("--memory-swap={swap}"));
        }
        if let Some(nano) = self.nano_cpus {
            // docker CLI takes fractional CPUs; NanoCPUs are the wire unit
            args.push(format!("--cpus={}", nano as f64 / 1e9));
        }
        if let Some(pids) = self.pids_limit {
            args.push(format!("--pids-limit={pids}"));
        }
        if let Some(weight) = self.blkio_weight {
            args.push(format!("--blkio-weight={weight}"));
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub tty: bool,
    pub interactive: bool,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortSpec>,
    /// Network to join; the managed network unless `--network` overrides
    pub network: Option<String>,
    pub cap_add: Vec<String>,
    pub auto_remove: bool,
    pub restart_policy: Option<String>,
    pub resources: ResourceLimits,
    /// Create the network first when it does not exist
    pub ensure_network: bool,
}

/// Options for a log capture.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub since: Option<String>,
    pub until: Option<String>,
    pub tail: Option<String>,
    pub timestamps: bool,
}

/// Result of a captured (non-interactive) exec.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Capability surface over the container runtime.
///
/// All operations are async and cancel with their callers. Errors carry
/// the runtime's own message where one exists so the CLI can surface it
/// verbatim.
#[allow(async_fn_in_trait)]
pub trait Runtime {
    /// Liveness check against the runtime daemon.
    async fn ping(&self) -> Result<()>;

    /// Whether an image reference exists locally.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Build the project's default image by delegating to the runtime's
    /// build facility. Fails with a build error.
    async fn build_default_image(&self, reference: &str, context_dir: &Path) -> Result<()>;

    /// Create the named volume when missing; report whether it was
    /// created by this call.
    async fn ensure_volume(&self, name: &str) -> Result<EnsureVolumeResult>;

    /// Stream a tar archive into `dest` inside the named volume.
    async fn copy_to_volume(&self, name: &str, tar: Vec<u8>, dest: &str) -> Result<()>;

    /// Create the named network when missing. Idempotent.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    async fn container_create(&self, spec: &CreateSpec) -> Result<CreateResult>;
    async fn container_start(&self, id: &str) -> Result<()>;
    async fn container_stop(&self, id: &str, timeout: Option<u32>, signal: Option<&str>)
        -> Result<()>;
    async fn container_restart(&self, id: &str, timeout: Option<u32>) -> Result<()>;
    async fn container_kill(&self, id: &str, signal: &str) -> Result<()>;
    async fn container_pause(&self, id: &str) -> Result<()>;
    async fn container_unpause(&self, id: &str) -> Result<()>;
    async fn container_remove(&self, id: &str, force: bool) -> Result<()>;
    async fn container_rename(&self, id: &str, new_name: &str) -> Result<()>;
    async fn container_update(
        &self,
        id: &str,
        resources: &ResourceLimits,
        restart_policy: Option<&str>,
    ) -> Result<()>;

    /// Block until the container exits; returns its exit code.
    async fn container_wait(&self, id: &str) -> Result<i64>;

    /// Stream a tar archive into a path inside a container.
    async fn copy_to_container(&self, id: &str, tar: Vec<u8>, dest: &str) -> Result<()>;

    /// Inspect by name or ID; `None` when absent.
    async fn container_inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>>;

    /// List containers, optionally including stopped ones, filtered by
    /// label equality.
    async fn list_containers(
        &self,
        all: bool,
        label_filters: &[(String, String)],
    ) -> Result<Vec<ContainerInfo>>;

    /// Captured log output (non-follow).
    async fn container_logs(&self, id: &str, opts: &LogOptions) -> Result<String>;

    /// Captured process listing.
    async fn container_top(&self, id: &str) -> Result<String>;

    /// One stats sample per container, JSON-formatted.
    async fn stats_sample(&self, ids: &[String]) -> Result<Vec<serde_json::Value>>;

    /// Run a command inside a running container and capture its output.
    async fn exec_capture(
        &self,
        id: &str,
        cmd: &[String],
        env: &[String],
        user: Option<&str>,
        workdir: Option<&str>,
    ) -> Result<ExecOutput>;
}

/// All managed containers of a project, by label filter.
pub async fn list_containers_by_project<R: Runtime>(
    runtime: &R,
    project: &str,
    all: bool,
) -> Result<Vec<ContainerInfo>> {
    runtime
        .list_containers(
            all,
            &[
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_PROJECT.to_string(), project.to_string()),
            ],
        )
        .await
}

/// Find a container by exact name.
pub async fn find_container_by_name<R: Runtime>(
    runtime: &R,
    name: &str,
) -> Result<Option<ContainerInfo>> {
    Ok(runtime
        .container_inspect(name)
        .await?
        .filter(|info| info.name == name))
}

/// CLI-backed docker implementation.
#[derive(Debug, Clone)]
pub struct CliDocker {
    docker_path: String,
}

impl Default for CliDocker {
    fn default() -> Self {
        Self::new()
    }
}

impl CliDocker {
    /// Create a client using `docker` from PATH (or `CLAWKER_DOCKER`).
    pub fn new() -> Self {
        let docker_path =
            std::env::var("CLAWKER_DOCKER").unwrap_or_else(|_| "docker".to_string());
        Self { docker_path }
    }

    /// Create a client with an explicit docker binary path.
    pub fn with_path(docker_path: String) -> Self {
        Self { docker_path }
    }

    /// Connect to the runtime: verify the binary exists and the daemon
    /// responds.
    #[instrument]
    pub async fn connect() -> Result<Self> {
        let client = Self::new();
        client.ping().await?;
        Ok(client)
    }

    /// Docker binary path, for passthrough commands owned by the CLI
    /// (attach, interactive exec, follow-logs, live stats).
    pub fn docker_path(&self) -> &str {
        &self.docker_path
    }

    /// Execute a docker command, capturing stdout. Failures carry the
    /// runtime's stderr verbatim.
    #[instrument(skip(self, args))]
    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(cmd = %format!("{} {}", self.docker_path, args.join(" ")), "Running docker");
        let output = Command::new(&self.docker_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DockerError::NotInstalled
                } else {
                    DockerError::ConnectionFailed {
                        message: e.to_string(),
                    }
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(stderr).into());
        }
        String::from_utf8(output.stdout).map_err(|e| {
            DockerError::InvalidOutput {
                message: format!("non-UTF-8 output: {e}"),
            }
            .into()
        })
    }

    /// Execute a docker command with bytes streamed to stdin.
    async fn run_with_stdin(&self, args: &[String], input: Vec<u8>) -> Result<()> {
        debug!(cmd = %format!("{} {}", self.docker_path, args.join(" ")), "Running docker (stdin)");
        let mut child = Command::new(&self.docker_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DockerError::ConnectionFailed {
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| DockerError::CommandFailed {
                    message: format!("failed to stream input: {e}"),
                })?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DockerError::CommandFailed {
                message: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(stderr).into());
        }
        Ok(())
    }

    fn id_of(output: &str) -> String {
        output.trim().to_string()
    }
}

/// Map a docker stderr line onto the narrowest error kind.
fn classify_failure(stderr: String) -> DockerError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") {
        let name = stderr
            .rsplit(':')
            .next()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        DockerError::ContainerNotFound { name }
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
    {
        DockerError::ConnectionFailed { message: stderr }
    } else {
        DockerError::CommandFailed { message: stderr }
    }
}

/// Parse `Labels` from docker's ps format (`k=v,k=v`).
fn parse_label_string(labels: &str) -> HashMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_ps_line(line: &str) -> Result<ContainerInfo> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| DockerError::InvalidOutput {
            message: format!("ps output: {e}"),
        })?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Ok(ContainerInfo {
        id: text("ID"),
        name: text("Names")
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string(),
        image: text("Image"),
        state: text("State"),
        status: text("Status"),
        labels: parse_label_string(&text("Labels")),
    })
}

fn parse_inspect(output: &str) -> Result<Option<ContainerInfo>> {
    let containers: Vec<serde_json::Value> =
        serde_json::from_str(output).map_err(|e| DockerError::InvalidOutput {
            message: format!("inspect output: {e}"),
        })?;
    let Some(container) = containers.first() else {
        return Ok(None);
    };
    let text = |path: &[&str]| -> String {
        let mut cursor = container;
        for key in path {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => return String::new(),
            }
        }
        cursor.as_str().unwrap_or_default().to_string()
    };
    let labels = container
        .get("Config")
        .and_then(|c| c.get("Labels"))
        .and_then(|l| l.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    Ok(Some(ContainerInfo {
        id: text(&["Id"]),
        name: text(&["Name"]).trim_start_matches('/').to_string(),
        image: text(&["Config", "Image"]),
        state: text(&["State", "Status"]),
        status: text(&["State", "Status"]),
        labels,
    }))
}

/// Image used for the scratch container that fronts volume copies.
const VOLUME_HELPER_IMAGE: &str = "alpine:3.20";

/// Mount point of the target volume inside the helper container.
const VOLUME_HELPER_TARGET: &str = "/clawker-volume";

impl Runtime for CliDocker {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        self.run(&svec(&["version", "--format", "{{.Server.Version}}"]))
            .await
            .map(|_| ())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        match self
            .run(&svec(&["image", "inspect", "--format", "{{.Id}}", reference]))
            .await
        {
            Ok(_) => Ok(true),
            Err(crate::errors::ClawkerError::Docker(DockerError::CommandFailed { .. })) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn build_default_image(&self, reference: &str, context_dir: &Path) -> Result<()> {
        self.run(&svec(&[
            "build",
            "--tag",
            reference,
            &context_dir.display().to_string(),
        ]))
        .await
        .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn ensure_volume(&self, name: &str) -> Result<EnsureVolumeResult> {
        let exists = self
            .run(&svec(&["volume", "inspect", "--format", "{{.Name}}", name]))
            .await;
        match exists {
            Ok(_) => Ok(EnsureVolumeResult { created: false }),
            Err(crate::errors::ClawkerError::Docker(DockerError::CommandFailed { .. })) => {
                self.run(&svec(&["volume", "create", name])).await?;
                debug!(volume = name, "Created volume");
                Ok(EnsureVolumeResult { created: true })
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, tar))]
    async fn copy_to_volume(&self, name: &str, tar: Vec<u8>, dest: &str) -> Result<()> {
        // A scratch container with the volume mounted fronts the copy;
        // `docker cp -` streams the tar into it.
        let helper_id = Self::id_of(
            &self
                .run(&svec(&[
                    "container",
                    "create",
                    "--label",
                    &format!("{LABEL_MANAGED}=true"),
                    "-v",
                    &format!("{name}:{VOLUME_HELPER_TARGET}"),
                    VOLUME_HELPER_IMAGE,
                    "true",
                ]))
                .await?,
        );
        let dest_in_helper = format!(
            "{helper_id}:{VOLUME_HELPER_TARGET}/{}",
            dest.trim_start_matches('/')
        );
        let copy = self
            .run_with_stdin(&svec(&["cp", "-", &dest_in_helper]), tar)
            .await;
        let cleanup = self
            .run(&svec(&["container", "rm", "-f", &helper_id]))
            .await;
        copy?;
        cleanup?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let exists = self
            .run(&svec(&["network", "inspect", "--format", "{{.Name}}", name]))
            .await;
        match exists {
            Ok(_) => Ok(()),
            Err(crate::errors::ClawkerError::Docker(DockerError::CommandFailed { .. })) => {
                self.run(&svec(&["network", "create", name])).await?;
                debug!(network = name, "Created network");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn container_create(&self, spec: &CreateSpec) -> Result<CreateResult> {
        if spec.ensure_network {
            if let Some(network) = &spec.network {
                self.ensure_network(network).await?;
            }
        }

        let mut args: Vec<String> = svec(&["container", "create"]);
        if !spec.name.is_empty() {
            args.push(format!("--name={}", spec.name));
        }
        for (key, value) in &spec.labels {
            args.push(format!("--label={key}={value}"));
        }
        for env in &spec.env {
            args.push("--env".to_string());
            args.push(env.clone());
        }
        for mount in &spec.mounts {
            args.push(format!("--mount={}", mount.to_docker_arg()));
        }
        for port in &spec.ports {
            args.push(format!("--publish={}", port.to_docker_arg()));
        }
        if let Some(network) = &spec.network {
            args.push(format!("--network={network}"));
        }
        for cap in &spec.cap_add {
            args.push(format!("--cap-add={cap}"));
        }
        if let Some(workdir) = &spec.workdir {
            args.push(format!("--workdir={workdir}"));
        }
        if let Some(user) = &spec.user {
            args.push(format!("--user={user}"));
        }
        if spec.tty {
            args.push("--tty".to_string());
        }
        if spec.interactive {
            args.push("--interactive".to_string());
        }
        if spec.auto_remove {
            args.push("--rm".to_string());
        }
        if let Some(policy) = &spec.restart_policy {
            args.push(format!("--restart={policy}"));
        }
        spec.resources.append_args(&mut args);
        if let Some(entrypoint) = &spec.entrypoint {
            // docker accepts a single --entrypoint token; extra words
            // shift into the command
            if let Some(first) = entrypoint.first() {
                args.push(format!("--entrypoint={first}"));
            }
            args.push(spec.image.clone());
            args.extend(entrypoint.iter().skip(1).cloned());
        } else {
            args.push(spec.image.clone());
        }
        args.extend(spec.command.iter().cloned());

        let output = self.run(&args).await?;
        // `docker create` prints warnings before the final ID line.
        let mut lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        let id = lines.pop().unwrap_or_default().trim().to_string();
        Ok(CreateResult {
            id,
            warnings: lines.iter().map(|l| l.trim().to_string()).collect(),
        })
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        self.run(&svec(&["container", "start", id])).await.map(|_| ())
    }

    async fn container_stop(
        &self,
        id: &str,
        timeout: Option<u32>,
        signal: Option<&str>,
    ) -> Result<()> {
        let mut args = svec(&["container", "stop"]);
        if let Some(timeout) = timeout {
            args.push(format!("--time={timeout}"));
        }
        if let Some(signal) = signal {
            args.push(format!("--signal={signal}"));
        }
        args.push(id.to_string());
        self.run(&args).await.map(|_| ())
    }

    async fn container_restart(&self, id: &str, timeout: Option<u32>) -> Result<()> {
        let mut args = svec(&["container", "restart"]);
        if let Some(timeout) = timeout {
            args.push(format!("--time={timeout}"));
        }
        args.push(id.to_string());
        self.run(&args).await.map(|_| ())
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        self.run(&svec(&["container", "kill", &format!("--signal={signal}"), id]))
            .await
            .map(|_| ())
    }

    async fn container_pause(&self, id: &str) -> Result<()> {
        self.run(&svec(&["container", "pause", id])).await.map(|_| ())
    }

    async fn container_unpause(&self, id: &str) -> Result<()> {
        self.run(&svec(&["container", "unpause", id])).await.map(|_| ())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<()> {
        let mut args = svec(&["container", "rm"]);
        if force {
            args.push("--force".to_string());
        }
        args.push(id.to_string());
        self.run(&args).await.map(|_| ())
    }

    async fn container_rename(&self, id: &str, new_name: &str) -> Result<()> {
        self.run(&svec(&["container", "rename", id, new_name]))
            .await
            .map(|_| ())
    }

    async fn container_update(
        &self,
        id: &str,
        resources: &ResourceLimits,
        restart_policy: Option<&str>,
    ) -> Result<()> {
        let mut args = svec(&["container", "update"]);
        resources.append_args(&mut args);
        if let Some(policy) = restart_policy {
            args.push(format!("--restart={policy}"));
        }
        args.push(id.to_string());
        self.run(&args).await.map(|_| ())
    }

    async fn container_wait(&self, id: &str) -> Result<i64> {
        let output = self.run(&svec(&["container", "wait", id])).await?;
        output
            .trim()
            .parse::<i64>()
            .map_err(|_| {
                DockerError::InvalidOutput {
                    message: format!("unexpected wait output: {output}"),
                }
                .into()
            })
    }

    #[instrument(skip(self, tar))]
    async fn copy_to_container(&self, id: &str, tar: Vec<u8>, dest: &str) -> Result<()> {
        self.run_with_stdin(&svec(&["cp", "-", &format!("{id}:{dest}")]), tar)
            .await
    }

    async fn container_inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        match self
            .run(&svec(&["container", "inspect", name_or_id]))
            .await
        {
            Ok(output) => parse_inspect(&output),
            Err(crate::errors::ClawkerError::Docker(DockerError::ContainerNotFound { .. }))
            | Err(crate::errors::ClawkerError::Docker(DockerError::CommandFailed { .. })) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_containers(
        &self,
        all: bool,
        label_filters: &[(String, String)],
    ) -> Result<Vec<ContainerInfo>> {
        let mut args = svec(&["ps", "--no-trunc", "--format", "{{json .}}"]);
        if all {
            args.push("--all".to_string());
        }
        for (key, value) in label_filters {
            args.push(format!("--filter=label={key}={value}"));
        }
        let output = self.run(&args).await?;
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    async fn container_logs(&self, id: &str, opts: &LogOptions) -> Result<String> {
        let mut args = svec(&["container", "logs"]);
        if let Some(since) = &opts.since {
            args.push(format!("--since={since}"));
        }
        if let Some(until) = &opts.until {
            args.push(format!("--until={until}"));
        }
        if let Some(tail) = &opts.tail {
            args.push(format!("--tail={tail}"));
        }
        if opts.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push(id.to_string());
        self.run(&args).await
    }

    async fn container_top(&self, id: &str) -> Result<String> {
        self.run(&svec(&["container", "top", id])).await
    }

    async fn stats_sample(&self, ids: &[String]) -> Result<Vec<serde_json::Value>> {
        let mut args = svec(&["stats", "--no-stream", "--format", "{{json .}}"]);
        args.extend(ids.iter().cloned());
        let output = self.run(&args).await?;
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    DockerError::InvalidOutput {
                        message: format!("stats output: {e}"),
                    }
                    .into()
                })
            })
            .collect()
    }

    async fn exec_capture(
        &self,
        id: &str,
        cmd: &[String],
        env: &[String],
        user: Option<&str>,
        workdir: Option<&str>,
    ) -> Result<ExecOutput> {
        let mut args = svec(&["exec"]);
        for env in env {
            args.push("--env".to_string());
            args.push(env.clone());
        }
        if let Some(user) = user {
            args.push(format!("--user={user}"));
        }
        if let Some(workdir) = workdir {
            args.push(format!("--workdir={workdir}"));
        }
        args.push(id.to_string());
        args.extend(cmd.iter().cloned());

        let output = Command::new(&self.docker_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DockerError::ConnectionFailed {
                message: e.to_string(),
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn svec(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// In-memory runtime for tests: records every call and models enough
/// container state (created → running → exited, labels, volumes) to
/// exercise the lifecycle pipeline without a daemon.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MockRuntime {
        /// Journal of operations in call order
        pub calls: Mutex<Vec<String>>,
        /// Containers by name
        pub containers: Mutex<HashMap<String, ContainerInfo>>,
        /// Image references that "exist"
        pub images: Mutex<HashSet<String>>,
        /// Volumes that exist
        pub volumes: Mutex<HashSet<String>>,
        /// Operations forced to fail (by journal verb)
        pub fail: Mutex<HashSet<String>>,
        /// Specs passed to `container_create`
        pub created_specs: Mutex<Vec<CreateSpec>>,
        next_id: AtomicU64,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_image(self, reference: &str) -> Self {
            self.images
                .lock()
                .expect("lock")
                .insert(reference.to_string());
            self
        }

        pub fn add_container(&self, name: &str, state: &str, labels: HashMap<String, String>) {
            let unique = self.next_id.fetch_add(1, Ordering::SeqCst) + 0xfeed;
            self.containers.lock().expect("lock").insert(
                name.to_string(),
                ContainerInfo {
                    id: format!("{unique:064x}"),
                    name: name.to_string(),
                    image: "mock:latest".to_string(),
                    state: state.to_string(),
                    status: state.to_string(),
                    labels,
                },
            );
        }

        pub fn journal(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }

        pub fn fail_on(&self, verb: &str) {
            self.fail.lock().expect("lock").insert(verb.to_string());
        }

        fn record(&self, entry: impl Into<String>) -> Result<()> {
            let entry = entry.into();
            let verb = entry
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_string();
            self.calls.lock().expect("lock").push(entry);
            if self.fail.lock().expect("lock").contains(&verb) {
                return Err(DockerError::CommandFailed {
                    message: format!("forced failure: {verb}"),
                }
                .into());
            }
            Ok(())
        }

        fn set_state(&self, name_or_id: &str, state: &str) -> Result<()> {
            let mut containers = self.containers.lock().expect("lock");
            let entry = containers
                .values_mut()
                .find(|c| c.name == name_or_id || c.id == name_or_id || c.id.starts_with(name_or_id));
            match entry {
                Some(info) => {
                    info.state = state.to_string();
                    info.status = state.to_string();
                    Ok(())
                }
                None => Err(DockerError::ContainerNotFound {
                    name: name_or_id.to_string(),
                }
                .into()),
            }
        }
    }

    impl Runtime for MockRuntime {
        async fn ping(&self) -> Result<()> {
            self.record("ping")
        }

        async fn image_exists(&self, reference: &str) -> Result<bool> {
            self.record(format!("image_exists {reference}"))?;
            Ok(self.images.lock().expect("lock").contains(reference))
        }

        async fn build_default_image(&self, reference: &str, context_dir: &Path) -> Result<()> {
            self.record(format!(
                "build_default_image {reference} {}",
                context_dir.display()
            ))?;
            self.images
                .lock()
                .expect("lock")
                .insert(reference.to_string());
            Ok(())
        }

        async fn ensure_volume(&self, name: &str) -> Result<EnsureVolumeResult> {
            self.record(format!("ensure_volume {name}"))?;
            let created = self.volumes.lock().expect("lock").insert(name.to_string());
            Ok(EnsureVolumeResult { created })
        }

        async fn copy_to_volume(&self, name: &str, tar: Vec<u8>, dest: &str) -> Result<()> {
            self.record(format!("copy_to_volume {name} {dest} {}b", tar.len()))
        }

        async fn ensure_network(&self, name: &str) -> Result<()> {
            self.record(format!("ensure_network {name}"))
        }

        async fn container_create(&self, spec: &CreateSpec) -> Result<CreateResult> {
            self.record(format!("container_create {}", spec.name))?;
            if spec.ensure_network {
                if let Some(network) = &spec.network {
                    self.record(format!("ensure_network {network}"))?;
                }
            }
            let id = format!(
                "{:064x}",
                self.next_id.fetch_add(1, Ordering::SeqCst) + 0xabc0
            );
            self.containers.lock().expect("lock").insert(
                spec.name.clone(),
                ContainerInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    state: "created".to_string(),
                    status: "Created".to_string(),
                    labels: spec.labels.clone(),
                },
            );
            self.created_specs.lock().expect("lock").push(spec.clone());
            Ok(CreateResult {
                id,
                warnings: Vec::new(),
            })
        }

        async fn container_start(&self, id: &str) -> Result<()> {
            self.record(format!("container_start {id}"))?;
            self.set_state(id, "running")
        }

        async fn container_stop(
            &self,
            id: &str,
            _timeout: Option<u32>,
            _signal: Option<&str>,
        ) -> Result<()> {
            self.record(format!("container_stop {id}"))?;
            self.set_state(id, "exited")
        }

        async fn container_restart(&self, id: &str, _timeout: Option<u32>) -> Result<()> {
            self.record(format!("container_restart {id}"))?;
            self.set_state(id, "running")
        }

        async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
            self.record(format!("container_kill {id} {signal}"))?;
            self.set_state(id, "exited")
        }

        async fn container_pause(&self, id: &str) -> Result<()> {
            self.record(format!("container_pause {id}"))?;
            self.set_state(id, "paused")
        }

        async fn container_unpause(&self, id: &str) -> Result<()> {
            self.record(format!("container_unpause {id}"))?;
            self.set_state(id, "running")
        }

        async fn container_remove(&self, id: &str, force: bool) -> Result<()> {
            self.record(format!("container_remove {id} force={force}"))?;
            let mut containers = self.containers.lock().expect("lock");
            let key = containers
                .iter()
                .find(|(_, c)| c.name == id || c.id == id || c.id.starts_with(id))
                .map(|(k, _)| k.clone());
            match key {
                Some(key) => {
                    containers.remove(&key);
                    Ok(())
                }
                None => Err(DockerError::ContainerNotFound {
                    name: id.to_string(),
                }
                .into()),
            }
        }

        async fn container_rename(&self, id: &str, new_name: &str) -> Result<()> {
            self.record(format!("container_rename {id} {new_name}"))?;
            let mut containers = self.containers.lock().expect("lock");
            let key = containers
                .iter()
                .find(|(_, c)| c.name == id || c.id == id)
                .map(|(k, _)| k.clone());
            match key {
                Some(key) => {
                    if let Some(mut info) = containers.remove(&key) {
                        info.name = new_name.to_string();
                        containers.insert(new_name.to_string(), info);
                    }
                    Ok(())
                }
                None => Err(DockerError::ContainerNotFound {
                    name: id.to_string(),
                }
                .into()),
            }
        }

        async fn container_update(
            &self,
            id: &str,
            _resources: &ResourceLimits,
            _restart_policy: Option<&str>,
        ) -> Result<()> {
            self.record(format!("container_update {id}"))?;
            // Update preserves the current state.
            let containers = self.containers.lock().expect("lock");
            if containers
                .values()
                .any(|c| c.name == id || c.id == id || c.id.starts_with(id))
            {
                Ok(())
            } else {
                Err(DockerError::ContainerNotFound {
                    name: id.to_string(),
                }
                .into())
            }
        }

        async fn container_wait(&self, id: &str) -> Result<i64> {
            self.record(format!("container_wait {id}"))?;
            self.set_state(id, "exited")?;
            Ok(0)
        }

        async fn copy_to_container(&self, id: &str, tar: Vec<u8>, dest: &str) -> Result<()> {
            self.record(format!("copy_to_container {id} {dest} {}b", tar.len()))
        }

        async fn container_inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
            self.record(format!("container_inspect {name_or_id}"))?;
            let containers = self.containers.lock().expect("lock");
            Ok(containers
                .values()
                .find(|c| {
                    c.name == name_or_id || c.id == name_or_id || c.id.starts_with(name_or_id)
                })
                .cloned())
        }

        async fn list_containers(
            &self,
            all: bool,
            label_filters: &[(String, String)],
        ) -> Result<Vec<ContainerInfo>> {
            self.record(format!("list_containers all={all}"))?;
            let containers = self.containers.lock().expect("lock");
            Ok(containers
                .values()
                .filter(|c| all || c.state == "running")
                .filter(|c| {
                    label_filters
                        .iter()
                        .all(|(k, v)| c.labels.get(k) == Some(v))
                })
                .cloned()
                .collect())
        }

        async fn container_logs(&self, id: &str, _opts: &LogOptions) -> Result<String> {
            self.record(format!("container_logs {id}"))?;
            Ok(String::new())
        }

        async fn container_top(&self, id: &str) -> Result<String> {
            self.record(format!("container_top {id}"))?;
            Ok(String::new())
        }

        async fn stats_sample(&self, ids: &[String]) -> Result<Vec<serde_json::Value>> {
            self.record(format!("stats_sample {}", ids.join(",")))?;
            Ok(Vec::new())
        }

        async fn exec_capture(
            &self,
            id: &str,
            cmd: &[String],
            _env: &[String],
            _user: Option<&str>,
            _workdir: Option<&str>,
        ) -> Result<ExecOutput> {
            self.record(format!("exec {id} {}", cmd.join(" ")))?;
            Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_string_parses_pairs() {
        let labels = parse_label_string("com.clawker.managed=true,com.clawker.project=myapp");
        assert_eq!(labels.get("com.clawker.project").map(String::as_str), Some("myapp"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn ps_line_parses_container_info() {
        let line = r#"{"ID":"abc123","Names":"clawker.myapp.dev","Image":"alpine","State":"running","Status":"Up 5 minutes","Labels":"com.clawker.agent=dev"}"#;
        let info = parse_ps_line(line).unwrap();
        assert_eq!(info.id, "abc123");
        assert_eq!(info.name, "clawker.myapp.dev");
        assert_eq!(info.labels.get("com.clawker.agent").map(String::as_str), Some("dev"));
    }

    #[test]
    fn inspect_parses_name_and_labels() {
        let output = r#"[{"Id":"abc","Name":"/clawker.myapp.dev","Config":{"Image":"alpine","Labels":{"com.clawker.project":"myapp"}},"State":{"Status":"exited"}}]"#;
        let info = parse_inspect(output).unwrap().unwrap();
        assert_eq!(info.name, "clawker.myapp.dev");
        assert_eq!(info.state, "exited");
        assert_eq!(
            info.labels.get("com.clawker.project").map(String::as_str),
            Some("myapp")
        );
    }

    #[test]
    fn inspect_empty_array_is_none() {
        assert!(parse_inspect("[]").unwrap().is_none());
    }

    #[test]
    fn failure_classification() {
        assert!(matches!(
            classify_failure("Error response from daemon: No such container: foo".into()),
            DockerError::ContainerNotFound { .. }
        ));
        assert!(matches!(
            classify_failure("Cannot connect to the Docker daemon at unix:///var/run/docker.sock".into()),
            DockerError::ConnectionFailed { .. }
        ));
        assert!(matches!(
            classify_failure("some other failure".into()),
            DockerError::CommandFailed { .. }
        ));
    }

    #[test]
    fn resource_limits_render_docker_flags() {
        let limits = ResourceLimits {
            memory: Some(512 * 1024 * 1024),
            memory_swap: Some(-1),
            nano_cpus: Some(1_500_000_000),
            pids_limit: Some(256),
            blkio_weight: Some(300),
        };
        let mut args = Vec::new();
        limits.append_args(&mut args);
        assert!(args.contains(&"--memory=536870912".to_string()));
        assert!(args.contains(&"--memory-swap=-1".to_string()));
        assert!(args.contains(&"--cpus=1.5".to_string()));
        assert!(args.contains(&"--pids-limit=256".to_string()));
        assert!(args.contains(&"--blkio-weight=300".to_string()));
    }

    #[test]
    fn create_spec_defaults_are_empty() {
        let spec = CreateSpec::default();
        assert!(spec.resources.is_empty());
        assert!(!spec.ensure_network);
    }
}
