//! Workspace mount assembly
//!
//! Resolves the effective workspace mode, computes the full mount list
//! for a container, and ensures the agent's named volumes exist. A
//! freshly-created config volume is reported back so the lifecycle
//! pipeline can run its one-time initialization before first start.
//!
//! Mode asymmetry: in snapshot mode the ignore file is enforced at file
//! granularity while the volume is populated; in bind mode only whole
//! directories can be masked (with empty tmpfs overlays) because the
//! source tree is a live mount.

use crate::config::WorkspaceMode;
use crate::docker::Runtime;
use crate::errors::Result;
use crate::ignore::IgnoreSet;
use crate::mount::MountSpec;
use crate::paths::APP_NAME;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Home directory of the agent user inside the container.
pub const REMOTE_HOME: &str = "/home/agent";

/// Mount point of the read-only share directory.
pub const SHARE_TARGET: &str = "/mnt/clawker-share";

/// Inputs for mount assembly.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub project: String,
    pub agent: String,
    /// Directory mounted (bind) or copied (snapshot) as the workspace
    pub source_dir: PathBuf,
    /// Original project root when `source_dir` is a worktree
    pub project_root_dir: Option<PathBuf>,
    /// Workspace mount point inside the container
    pub remote_path: String,
    pub mode: WorkspaceMode,
}

/// The assembled workspace: mounts plus config-volume bookkeeping.
#[derive(Debug, Clone)]
pub struct WorkspaceSpec {
    pub mode: WorkspaceMode,
    pub source_dir: PathBuf,
    pub remote_path: String,
    pub project_root_dir: Option<PathBuf>,
    pub mounts: Vec<MountSpec>,
    pub config_volume_name: String,
    /// True when this invocation created the config volume; triggers
    /// one-time initialization before first start
    pub config_created: bool,
}

/// Effective mode: CLI flag over project default over bind.
pub fn resolve_mode(
    cli_mode: Option<WorkspaceMode>,
    project_default: Option<WorkspaceMode>,
) -> WorkspaceMode {
    cli_mode.or(project_default).unwrap_or(WorkspaceMode::Bind)
}

/// Agent-scoped config volume name.
pub fn config_volume_name(project: &str, agent: &str) -> String {
    format!("{APP_NAME}.{project}.{agent}.config")
}

/// Agent-scoped history/cache volume name.
pub fn history_volume_name(project: &str, agent: &str) -> String {
    format!("{APP_NAME}.{project}.{agent}.history")
}

/// Snapshot workspace volume name.
pub fn workspace_volume_name(project: &str, agent: &str) -> String {
    format!("{APP_NAME}.{project}.{agent}.workspace")
}

/// Assemble the workspace: ensure volumes, populate the snapshot when in
/// snapshot mode, and compute the mount list.
#[instrument(skip(runtime, opts), fields(project = %opts.project, agent = %opts.agent, mode = %opts.mode))]
pub async fn build_workspace<R: Runtime>(
    runtime: &R,
    opts: &WorkspaceOptions,
) -> Result<WorkspaceSpec> {
    let ignore = IgnoreSet::load(&opts.source_dir);
    let mut mounts = Vec::new();

    match opts.mode {
        WorkspaceMode::Bind => {
            mounts.push(MountSpec::bind(&opts.source_dir, &opts.remote_path, false));
            // File-level ignore patterns cannot be enforced on a live
            // mount; matching directories are masked instead.
            for dir in masked_directories(&opts.source_dir, &ignore) {
                mounts.push(MountSpec::tmpfs(format!(
                    "{}/{}",
                    opts.remote_path.trim_end_matches('/'),
                    dir
                )));
            }
        }
        WorkspaceMode::Snapshot => {
            let volume = workspace_volume_name(&opts.project, &opts.agent);
            runtime.ensure_volume(&volume).await?;
            let archive = snapshot_archive(&opts.source_dir, &ignore)?;
            debug!(volume = %volume, bytes = archive.len(), "Populating snapshot volume");
            runtime.copy_to_volume(&volume, archive, ".").await?;
            mounts.push(MountSpec::volume(volume, &opts.remote_path));
        }
    }

    // Worktrees keep a read-only view of the main repository at its host
    // path so `.git` pointer files resolve inside the container.
    if let Some(root) = &opts.project_root_dir {
        mounts.push(MountSpec::bind(root, root.display().to_string(), true));
    }

    let config_volume = config_volume_name(&opts.project, &opts.agent);
    let ensured = runtime.ensure_volume(&config_volume).await?;
    mounts.push(MountSpec::volume(
        &config_volume,
        format!("{REMOTE_HOME}/.config"),
    ));

    let history_volume = history_volume_name(&opts.project, &opts.agent);
    runtime.ensure_volume(&history_volume).await?;
    mounts.push(MountSpec::volume(
        history_volume,
        format!("{REMOTE_HOME}/.cache"),
    ));

    let share = crate::paths::share_dir();
    if share.is_dir() {
        mounts.push(MountSpec::bind(&share, SHARE_TARGET, true));
    }

    Ok(WorkspaceSpec {
        mode: opts.mode,
        source_dir: opts.source_dir.clone(),
        remote_path: opts.remote_path.clone(),
        project_root_dir: opts.project_root_dir.clone(),
        mounts,
        config_volume_name: config_volume,
        config_created: ensured.created,
    })
}

/// One-time config-volume initialization: stage selected host files into
/// a tar and copy them into the volume. Runs before container create so
/// the first start already sees the initialized state. Returns warnings
/// for host files that were requested but missing.
#[instrument(skip(runtime, spec))]
pub async fn initialize_config_volume<R: Runtime>(
    runtime: &R,
    spec: &WorkspaceSpec,
    includes: &[String],
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let mut builder = tar::Builder::new(Vec::new());

    let mut staged = 0usize;
    for include in default_includes().iter().chain(includes.iter()) {
        let path = expand_home(include);
        if !path.exists() {
            if !default_includes().contains(include) {
                warnings.push(format!("config include not found on host: {include}"));
            }
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let result = if path.is_dir() {
            builder.append_dir_all(&name, &path)
        } else {
            builder.append_path_with_name(&path, &name)
        };
        match result {
            Ok(()) => staged += 1,
            Err(e) => warnings.push(format!("failed to stage {include}: {e}")),
        }
    }

    if staged == 0 {
        debug!("No host configuration to copy into the config volume");
        return Ok(warnings);
    }

    let archive = builder.into_inner().map_err(|e| {
        crate::errors::ClawkerError::Io(std::io::Error::other(format!(
            "failed to finalize config archive: {e}"
        )))
    })?;
    runtime
        .copy_to_volume(&spec.config_volume_name, archive, ".")
        .await?;
    debug!(volume = %spec.config_volume_name, files = staged, "Initialized config volume");
    Ok(warnings)
}

/// Host files always copied into a fresh config volume.
fn default_includes() -> &'static [String] {
    use once_cell::sync::Lazy;
    static DEFAULTS: Lazy<Vec<String>> =
        Lazy::new(|| vec!["~/.gitconfig".to_string(), "~/.claude.json".to_string()]);
    &DEFAULTS
}

/// Expand a leading `~/` against the host home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories_next::UserDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

/// Directories under `source_dir` matched by the ignore set, as
/// workspace-relative slash paths. Masked subtrees are not descended
/// into.
fn masked_directories(source_dir: &Path, ignore: &IgnoreSet) -> Vec<String> {
    let mut masked = Vec::new();
    if ignore.is_empty() {
        return masked;
    }
    collect_masked(source_dir, source_dir, ignore, &mut masked);
    masked.sort();
    masked
}

fn collect_masked(root: &Path, dir: &Path, ignore: &IgnoreSet, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read directory while masking");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if ignore.matches_dir(&rel) {
            out.push(rel);
        } else {
            collect_masked(root, &path, ignore, out);
        }
    }
}

/// Tar the source tree for snapshot mode, honoring the ignore set at
/// file granularity.
fn snapshot_archive(source_dir: &Path, ignore: &IgnoreSet) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    append_tree(&mut builder, source_dir, source_dir, ignore)?;
    builder.into_inner().map_err(|e| {
        crate::errors::ClawkerError::Io(std::io::Error::other(format!(
            "failed to finalize snapshot archive: {e}"
        )))
    })
}

fn append_tree(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    dir: &Path,
    ignore: &IgnoreSet,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if ignore.matches_dir(&rel) {
                continue;
            }
            builder.append_path_with_name(&path, &rel)?;
            append_tree(builder, root, &path, ignore)?;
        } else {
            if ignore.matches_file(&rel) {
                continue;
            }
            builder.append_path_with_name(&path, &rel)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_resolution_prefers_cli_flag() {
        assert_eq!(
            resolve_mode(Some(WorkspaceMode::Snapshot), Some(WorkspaceMode::Bind)),
            WorkspaceMode::Snapshot
        );
        assert_eq!(
            resolve_mode(None, Some(WorkspaceMode::Snapshot)),
            WorkspaceMode::Snapshot
        );
        assert_eq!(resolve_mode(None, None), WorkspaceMode::Bind);
    }

    #[test]
    fn volume_names_are_agent_scoped() {
        assert_eq!(config_volume_name("myapp", "dev"), "clawker.myapp.dev.config");
        assert_eq!(
            history_volume_name("myapp", "dev"),
            "clawker.myapp.dev.history"
        );
        assert_eq!(
            workspace_volume_name("myapp", "dev"),
            "clawker.myapp.dev.workspace"
        );
    }

    #[test]
    fn masked_directories_match_ignore_set() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules")).unwrap();
        std::fs::create_dir_all(tmp.path().join("src/node_modules")).unwrap();
        std::fs::create_dir_all(tmp.path().join("src/keep")).unwrap();
        let ignore = IgnoreSet::from_lines("node_modules/\n");

        let masked = masked_directories(tmp.path(), &ignore);
        assert_eq!(
            masked,
            vec!["node_modules".to_string(), "src/node_modules".to_string()]
        );
    }

    #[test]
    fn snapshot_archive_excludes_ignored_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(tmp.path().join("secret.env"), "KEY=1").unwrap();
        std::fs::create_dir(tmp.path().join("target")).unwrap();
        std::fs::write(tmp.path().join("target/out.bin"), "bin").unwrap();
        let ignore = IgnoreSet::from_lines("*.env\ntarget/\n");

        let archive = snapshot_archive(tmp.path(), &ignore).unwrap();
        let mut reader = tar::Archive::new(&archive[..]);
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.contains(&"keep.rs".to_string()));
        assert!(!names.iter().any(|n| n.contains("secret.env")));
        assert!(!names.iter().any(|n| n.contains("target")));
    }

    #[test]
    fn expand_home_passes_absolute_paths_through() {
        assert_eq!(expand_home("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
