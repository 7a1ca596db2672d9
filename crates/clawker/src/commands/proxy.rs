//! `proxy` command group: host proxy supervision

use anyhow::Result;
use clawker_core::hostproxy::{self, EnsureOutcome, HostProxy};
use clawker_core::paths;
use std::time::Duration;

pub async fn run_start() -> Result<()> {
    let store = super::load_store()?;
    let settings = store.settings()?;
    let port = settings.host_proxy.manager_port();

    let proxy = HostProxy::new(port);
    match proxy.ensure_running().await? {
        EnsureOutcome::Adopted => {
            eprintln!("Host proxy already running on port {port}");
            return Ok(());
        }
        EnsureOutcome::Started | EnsureOutcome::AlreadyRunning => {
            eprintln!("Host proxy listening on port {port} (Ctrl-C to stop)");
        }
    }

    tokio::signal::ctrl_c().await?;
    proxy.stop(Duration::from_secs(settings.host_proxy.grace_period()))?;
    Ok(())
}

pub async fn run_stop() -> Result<()> {
    let pid_path = paths::host_proxy_pid_path();
    if !hostproxy::is_daemon_running(&pid_path) {
        eprintln!("No host proxy is running");
        return Ok(());
    }
    let Some(pid) = std::fs::read_to_string(&pid_path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
    else {
        eprintln!("No host proxy is running");
        return Ok(());
    };

    // The resident proxy process shuts down cleanly on SIGTERM.
    #[cfg(unix)]
    {
        let status = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()?;
        if !status.success() {
            anyhow::bail!("failed to signal host proxy (pid {pid})");
        }
        eprintln!("Stopped host proxy (pid {pid})");
        Ok(())
    }
    #[cfg(not(unix))]
    {
        anyhow::bail!("proxy stop is only supported on unix hosts (pid {pid})")
    }
}

pub async fn run_status() -> Result<()> {
    let store = super::load_store()?;
    let settings = store.settings()?;
    let port = settings.host_proxy.manager_port();

    if !hostproxy::port_in_use(port) {
        println!("stopped");
        return Ok(());
    }
    if hostproxy::probe_identity(port).await {
        println!("running (port {port})");
    } else {
        println!("foreign service on port {port}");
    }
    Ok(())
}
