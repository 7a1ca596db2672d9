//! Command implementations
//!
//! Each command loads the configuration store, connects to the runtime
//! where needed, calls into `clawker-core`, and renders the result.
//! Stdout carries identifiers only; humans read stderr.

pub mod config_cmd;
pub mod create;
pub mod exec;
pub mod lifecycle_ops;
pub mod list;
pub mod logs;
pub mod project;
pub mod proxy;

use anyhow::Result;
use clawker_core::docker::CliDocker;
use clawker_core::errors::ClawkerError;
use clawker_core::lifecycle::{resolve_targets, MultiReport};
use clawker_core::store::{ConfigStore, LoadOptions};

use crate::cli::{SingleTargetArgs, TargetArgs};

/// Load the layered configuration for the current working directory.
pub(crate) fn load_store() -> Result<ConfigStore> {
    Ok(ConfigStore::load(LoadOptions::default())?)
}

/// Connect to the container runtime.
pub(crate) async fn connect_runtime() -> Result<CliDocker> {
    Ok(CliDocker::connect().await?)
}

/// The project slug, required for agent-addressed and project-scoped
/// commands.
pub(crate) fn require_project(store: &ConfigStore) -> Result<String> {
    store
        .project_slug()
        .map(str::to_string)
        .ok_or_else(|| {
            ClawkerError::Registry(clawker_core::errors::RegistryError::NotInProject {
                dir: std::env::current_dir()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|_| ".".to_string()),
            })
            .into()
        })
}

/// Expand names and `--agent` selectors into container names.
pub(crate) fn expand_targets(store: &ConfigStore, args: &TargetArgs) -> Result<Vec<String>> {
    if args.names.is_empty() && args.agents.is_empty() {
        anyhow::bail!("no containers specified; pass names or --agent");
    }
    let project = if args.agents.is_empty() {
        String::new()
    } else {
        require_project(store)?
    };
    Ok(resolve_targets(&project, &args.names, &args.agents))
}

/// Resolve a single-target selector to a container name.
pub(crate) fn expand_single(store: &ConfigStore, args: &SingleTargetArgs) -> Result<String> {
    match (&args.name, &args.agent) {
        (Some(name), None) => Ok(name.clone()),
        (None, Some(agent)) => {
            let project = require_project(store)?;
            Ok(clawker_core::container::container_name(&project, agent))
        }
        (Some(_), Some(_)) => anyhow::bail!("pass either a container name or --agent, not both"),
        (None, None) => anyhow::bail!("no container specified; pass a name or --agent"),
    }
}

/// Render a multi-target report: successes (with detail) to stdout,
/// failures to stderr, and the partial-failure summary as the error.
pub(crate) fn render_report(report: MultiReport) -> Result<()> {
    for result in &report.results {
        match &result.error {
            None => match &result.detail {
                Some(detail) => println!("{detail}"),
                None => println!("{}", result.name),
            },
            Some(error) => eprintln!("Error: {error}"),
        }
    }
    match report.partial_failure() {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
