//! Interactive passthrough commands: attach, exec, cp
//!
//! These hand the terminal to a docker subprocess (which owns TTY sizing
//! and raw mode) and propagate its exit code.

use anyhow::Result;
use clawker_core::docker::CliDocker;

use crate::cli::{CpArgs, ExecArgs, SingleTargetArgs};

pub async fn run_attach(args: SingleTargetArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let name = super::expand_single(&store, &args)?;
    passthrough(&runtime, &["attach".to_string(), name]).await
}

pub async fn run_exec(mut args: ExecArgs) -> Result<()> {
    // With --agent the container has no positional slot, so the first
    // "name" token is really the start of the command.
    if args.target.agent.is_some() {
        if let Some(first) = args.target.name.take() {
            args.command.insert(0, first);
        }
    }
    if args.command.is_empty() {
        anyhow::bail!("no command specified");
    }

    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let name = super::expand_single(&store, &args.target)?;

    let mut docker_args = vec!["exec".to_string()];
    if args.tty {
        docker_args.push("--tty".to_string());
    }
    if args.interactive {
        docker_args.push("--interactive".to_string());
    }
    for env in &args.env {
        docker_args.push("--env".to_string());
        docker_args.push(env.clone());
    }
    if let Some(user) = &args.user {
        docker_args.push(format!("--user={user}"));
    }
    if let Some(workdir) = &args.workdir {
        docker_args.push(format!("--workdir={workdir}"));
    }
    docker_args.push(name);
    docker_args.extend(args.command.iter().cloned());
    passthrough(&runtime, &docker_args).await
}

pub async fn run_cp(args: CpArgs) -> Result<()> {
    let runtime = super::connect_runtime().await?;
    passthrough(
        &runtime,
        &["cp".to_string(), args.src.clone(), args.dst.clone()],
    )
    .await
}

/// Run docker with inherited stdio; the child's non-zero exit code
/// becomes ours.
async fn passthrough(runtime: &CliDocker, args: &[String]) -> Result<()> {
    let status = tokio::process::Command::new(runtime.docker_path())
        .args(args)
        .status()
        .await?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
