//! `container create` command
//!
//! Phase A (cheap, synchronous): config load, runtime connect, option
//! parsing. Phase B: the create pipeline runs as a worker while the
//! spinner drains its event channel. Phase C: buffered warnings print to
//! stderr, then the short container ID goes to stdout.

use anyhow::Result;
use clawker_core::config::WorkspaceMode;
use clawker_core::docker::ResourceLimits;
use clawker_core::hostproxy::HostProxy;
use clawker_core::lifecycle::{run_create, CreateOptions, NoWorktrees};
use clawker_core::mount::{MountSpec, PortSpec};
use clawker_core::progress::EventSender;
use clawker_core::validate;
use tracing::instrument;

use crate::cli::CreateArgs;
use crate::ui::spinner;

#[instrument(skip(args))]
pub async fn run(args: CreateArgs) -> Result<()> {
    // Flag-level validation fails before any runtime contact.
    let opts = build_options(&args)?;
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let settings = store.settings()?;
    let proxy = HostProxy::new(settings.host_proxy.manager_port());

    let (events, rx) = EventSender::channel();
    let consumer = tokio::spawn(spinner::consume_events(rx));

    let assume_yes = args.yes;
    let confirm = move |reference: &str| {
        if assume_yes {
            return true;
        }
        prompt_rebuild(reference)
    };

    let result = run_create(
        &runtime,
        &store,
        opts,
        Some(&proxy),
        &NoWorktrees,
        &confirm,
        &events,
    )
    .await;
    drop(events);
    let warnings = consumer.await.unwrap_or_default();

    // Warnings render after the spinner stops and before the ID.
    spinner::flush_warnings(&warnings);
    let outcome = result?;
    println!("{}", outcome.short_id());
    Ok(())
}

fn build_options(args: &CreateArgs) -> Result<CreateOptions> {
    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<WorkspaceMode>)
        .transpose()
        .map_err(clawker_core::errors::ClawkerError::from)?;

    let volumes = args
        .volumes
        .iter()
        .map(|v| v.parse::<MountSpec>())
        .collect::<Result<Vec<_>, _>>()?;
    let ports = args
        .ports
        .iter()
        .map(|p| p.parse::<PortSpec>())
        .collect::<Result<Vec<_>, _>>()?;
    let labels = args
        .labels
        .iter()
        .map(|l| match l.split_once('=') {
            Some((k, v)) => Ok((k.to_string(), v.to_string())),
            None => anyhow::bail!("invalid label '{l}'. Expected KEY=VAL"),
        })
        .collect::<Result<Vec<_>>>()?;
    for env in &args.env {
        if !env.contains('=') {
            anyhow::bail!("invalid environment variable '{env}'. Expected KEY=VAL");
        }
    }

    let entrypoint = args
        .entrypoint
        .as_deref()
        .map(shell_words::split)
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid --entrypoint: {e}"))?;

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

    Ok(CreateOptions {
        image: args.image.clone(),
        command: args.command.clone(),
        agent: args.agent.clone(),
        name: args.name.clone(),
        mode,
        env: args.env.clone(),
        volumes,
        ports,
        workdir: args.workdir.clone(),
        user: args.user.clone(),
        entrypoint,
        tty: args.tty,
        interactive: args.interactive,
        network: args.network.clone(),
        labels,
        auto_remove: args.rm,
        worktree: args.worktree.clone(),
        resources,
        restart_policy: args.restart.clone(),
    })
}

/// Interactive consent for rebuilding a missing default image. Declines
/// when stdin is not a terminal.
fn prompt_rebuild(reference: &str) -> bool {
    if !atty::is(atty::Stream::Stdin) {
        return false;
    }
    eprint!("Default image '{reference}' is not built. Build it now? [y/N] ");
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
