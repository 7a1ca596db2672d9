//! `container list` and `container inspect`

use anyhow::Result;
use clawker_core::docker::{list_containers_by_project, Runtime};
use clawker_core::paths::{LABEL_AGENT, LABEL_MANAGED};

use crate::cli::{ListArgs, TargetArgs};

pub async fn run_list(args: ListArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;

    let containers = if args.all_projects {
        runtime
            .list_containers(
                args.all,
                &[(LABEL_MANAGED.to_string(), "true".to_string())],
            )
            .await?
    } else {
        let project = super::require_project(&store)?;
        list_containers_by_project(&runtime, &project, args.all).await?
    };

    println!(
        "{:<32} {:<16} {:<10} {:<24} {}",
        "NAME", "AGENT", "STATE", "IMAGE", "ID"
    );
    for container in &containers {
        let agent = container
            .labels
            .get(LABEL_AGENT)
            .map(String::as_str)
            .unwrap_or("-");
        let short_id = &container.id[..container.id.len().min(12)];
        println!(
            "{:<32} {:<16} {:<10} {:<24} {}",
            container.name, agent, container.state, container.image, short_id
        );
    }
    Ok(())
}

pub async fn run_inspect(args: TargetArgs) -> Result<()> {
    let store = super::load_store()?;
    let runtime = super::connect_runtime().await?;
    let names = super::expand_targets(&store, &args)?;

    let mut details = Vec::new();
    let mut failed = 0usize;
    for name in &names {
        match runtime.container_inspect(name).await? {
            Some(info) => details.push(info),
            None => {
                eprintln!("Error: No such container: {name}");
                failed += 1;
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&details)?);
    if failed > 0 {
        return Err(clawker_core::errors::ClawkerError::PartialFailure {
            op: "inspect".to_string(),
            failed,
        }
        .into());
    }
    Ok(())
}
