//! Multi-target lifecycle commands: start, stop, restart, kill, pause,
//! unpause, remove, wait, update, rename
//!
//! Each resolves its targets (names or `--agent` within the current
//! project), dispatches the runtime operation per target, and accumulates
//! failures: successes to stdout, errors to stderr, non-zero exit when
//! any target failed.

use anyhow::Result;
use clawker_core::docker::{ResourceLimits, Runtime};
use clawker_core::lifecycle::{apply_container_op, ContainerOp};
use clawker_core::validate;

use crate::cli::{KillArgs, RemoveArgs, RenameArgs, RestartArgs, StopArgs, TargetArgs, UpdateArgs};

/// Operations with no extra flags.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Pause,
    Unpause,
    Wait,
}

pub async fn run_simple(args: TargetArgs, op: Op) -> Result<()> {
    let container_op = match op {
        Op::Pause => ContainerOp::Pause,
        Op::Unpause => ContainerOp::Unpause,
        Op::Wait => ContainerOp::Wait,
    };
    execute(&args, container_op).await
}

/// Start is special-cased: a container starting for the first time (state
/// `created`) gets the project's `agent.post_init` commands run inside it
/// after it comes up.
pub async fn run_start(args: TargetArgs) -> Result<()> {
    let store = super::load_store()?;
    let names = super::expand_targets(&store, &args)?;
    let runtime = super::connect_runtime().await?;

    let mut first_start = std::collections::HashSet::new();
    for name in &names {
        if let Ok(Some(info)) = runtime.container_inspect(name).await {
            if info.state == "created" {
                first_start.insert(name.clone());
            }
        }
    }

    let report = apply_container_op(&runtime, &ContainerOp::Start, &names).await;

    if let Ok(config) = store.project_config() {
        if !config.agent.post_init.is_empty() {
            for result in report.results.iter().filter(|r| r.error.is_none()) {
                if !first_start.contains(&result.name) {
                    continue;
                }
                match clawker_core::lifecycle::run_post_init(&runtime, &result.name, &config).await
                {
                    Ok(warnings) => {
                        for warning in warnings {
                            eprintln!("warning: {warning}");
                        }
                    }
                    Err(e) => {
                        eprintln!("warning: post_init failed for {}: {e}", result.name)
                    }
                }
            }
        }
    }

    super::render_report(report)
}

pub async fn run_stop(args: StopArgs) -> Result<()> {
    execute(
        &args.targets,
        ContainerOp::Stop {
            timeout: args.time,
            signal: args.signal.clone(),
        },
    )
    .await
}

pub async fn run_restart(args: RestartArgs) -> Result<()> {
    execute(&args.targets, ContainerOp::Restart { timeout: args.time }).await
}

pub async fn run_kill(args: KillArgs) -> Result<()> {
    execute(
        &args.targets,
        ContainerOp::Kill {
            signal: args.signal.clone(),
        },
    )
    .await
}

pub async fn run_remove(args: RemoveArgs) -> Result<()> {
    execute(&args.targets, ContainerOp::Remove { force: args.force }).await
}

pub async fn run_update(args: UpdateArgs) -> Result<()> {
    let resources = ResourceLimits {
        memory: args
            .memory
            .as_deref()
            .map(validate::parse_memory_size)
            .transpose()?,
        memory_swap: args
            .memory_swap
            .as_deref()
            .map(validate::parse_memory_swap)
            .transpose()?,
        nano_cpus: args.cpus.as_deref().map(validate::parse_cpus).transpose()?,
        pids_limit: args.pids_limit,
        blkio_weight: args
            .blkio_weight
            .map(validate::validate_blkio_weight)
            .transpose()?,
    };
    if resources.is_empty() && args.restart.is_none() {
        anyhow::bail!("nothing to update; pass at least one resource flag");
    }
    execute(
        &args.targets,
        ContainerOp::Update {
            resources,
            restart_policy: args.restart.clone(),
        },
    )
    .await
}

pub async fn run_rename(args: RenameArgs) -> Result<()> {
    let _store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    runtime.container_rename(&args.name, &args.new_name).await?;
    println!("{}", args.new_name);
    Ok(())
}

async fn execute(targets: &TargetArgs, op: ContainerOp) -> Result<()> {
    let store = super::load_store()?;
    let names = super::expand_targets(&store, targets)?;
    let runtime = super::connect_runtime().await?;
    let report = apply_container_op(&runtime, &op, &names).await;
    super::render_report(report)
}
