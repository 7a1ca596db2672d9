//! `project` command group: registry veneer

use anyhow::Result;
use clawker_core::paths;
use clawker_core::registry::Registry;

pub fn run_add(name: Option<String>, root: Option<String>) -> Result<()> {
    let root = match root {
        Some(root) => std::path::PathBuf::from(root),
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize().unwrap_or(root);
    let name = name.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    });

    let mut registry = Registry::load(&paths::registry_path())?;
    let slug = registry.register(&name, &root);
    registry.save()?;
    println!("{slug}");
    Ok(())
}

pub fn run_list() -> Result<()> {
    let registry = Registry::load(&paths::registry_path())?;
    println!("{:<24} {:<24} {:<8} ROOT", "SLUG", "NAME", "WORKTREES");
    for (slug, entry) in registry.projects() {
        println!(
            "{:<24} {:<24} {:<8} {}",
            slug,
            entry.name,
            entry.worktrees.len(),
            entry.root.display()
        );
    }
    Ok(())
}

pub fn run_remove(slug: &str) -> Result<()> {
    let mut registry = Registry::load(&paths::registry_path())?;
    if !registry.unregister(slug) {
        anyhow::bail!("unknown project: {slug}");
    }
    registry.save()?;
    println!("{slug}");
    Ok(())
}

pub fn run_worktrees(slug: &str, prune: bool) -> Result<()> {
    let mut registry = Registry::load(&paths::registry_path())?;
    if registry.get(slug).is_none() {
        anyhow::bail!("unknown project: {slug}");
    }

    let statuses = registry.worktree_statuses(slug);
    println!("{:<20} {:<24} {:<10} PATH", "NAME", "SLUG", "STATUS");
    for status in &statuses {
        let state = if status.resolve_error {
            "unknown"
        } else if status.is_prunable() {
            "prunable"
        } else {
            "ok"
        };
        println!(
            "{:<20} {:<24} {:<10} {}",
            status.name,
            status.slug,
            state,
            status
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    if prune {
        let mut pruned = 0usize;
        for status in statuses.iter().filter(|s| s.is_prunable()) {
            registry.remove_worktree(slug, &status.name);
            registry.unregister(&status.slug);
            pruned += 1;
        }
        if pruned > 0 {
            registry.save()?;
        }
        eprintln!("pruned {pruned} worktree(s)");
    }
    Ok(())
}
