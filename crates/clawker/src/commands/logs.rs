//! `container logs`, `container top`, and `container stats`

use anyhow::Result;
use clawker_core::docker::{LogOptions, Runtime};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cli::{LogsArgs, SingleTargetArgs, StatsArgs};

pub async fn run_logs(args: LogsArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let name = super::expand_single(&store, &args.target)?;

    if args.follow {
        // Follow mode hands the stream to docker directly.
        let mut docker_args = vec!["logs".to_string(), "--follow".to_string()];
        if let Some(since) = &args.since {
            docker_args.push(format!("--since={since}"));
        }
        if let Some(tail) = &args.tail {
            docker_args.push(format!("--tail={tail}"));
        }
        if args.timestamps {
            docker_args.push("--timestamps".to_string());
        }
        docker_args.push(name);
        let status = tokio::process::Command::new(runtime.docker_path())
            .args(&docker_args)
            .status()
            .await?;
        if !status.success() {
            std::process::exit(status.code().unwrap_or(1));
        }
        return Ok(());
    }

    let output = runtime
        .container_logs(
            &name,
            &LogOptions {
                since: args.since.clone(),
                until: args.until.clone(),
                tail: args.tail.clone(),
                timestamps: args.timestamps,
            },
        )
        .await?;
    print!("{output}");
    Ok(())
}

pub async fn run_top(args: SingleTargetArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let name = super::expand_single(&store, &args)?;
    print!("{}", runtime.container_top(&name).await?);
    Ok(())
}

pub async fn run_stats(args: StatsArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;

    let names = if args.targets.names.is_empty() && args.targets.agents.is_empty() {
        // Default to every container of the current project.
        let project = super::require_project(&store)?;
        clawker_core::docker::list_containers_by_project(&runtime, &project, false)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect()
    } else {
        super::expand_targets(&store, &args.targets)?
    };
    if names.is_empty() {
        eprintln!("No running containers");
        return Ok(());
    }

    if args.no_stream {
        let frame = sample_all(&runtime, &names).await;
        render_frame(&frame);
        return Ok(());
    }

    // Fan out one sampler per container; a 1-second ticker redraws the
    // frame until interrupted.
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let frame = sample_all(&runtime, &names).await;
                // Clear and redraw without scrollback spam.
                eprint!("\x1b[2J\x1b[H");
                render_frame(&frame);
            }
        }
    }
    Ok(())
}

/// One stats sample per container, collected concurrently.
async fn sample_all(
    runtime: &clawker_core::docker::CliDocker,
    names: &[String],
) -> BTreeMap<String, serde_json::Value> {
    let samples = join_all(names.iter().map(|name| {
        let name = name.clone();
        async move {
            let sample = runtime
                .stats_sample(std::slice::from_ref(&name))
                .await
                .ok()
                .and_then(|mut v| v.pop());
            (name, sample)
        }
    }))
    .await;

    samples
        .into_iter()
        .filter_map(|(name, sample)| sample.map(|s| (name, s)))
        .collect()
}

fn render_frame(frame: &BTreeMap<String, serde_json::Value>) {
    println!(
        "{:<32} {:<10} {:<20} {:<10}",
        "NAME", "CPU %", "MEM USAGE", "MEM %"
    );
    for (name, sample) in frame {
        let field = |key: &str| {
            sample
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string()
        };
        println!(
            "{:<32} {:<10} {:<20} {:<10}",
            name,
            field("CPUPerc"),
            field("MemUsage"),
            field("MemPerc")
        );
    }
}
