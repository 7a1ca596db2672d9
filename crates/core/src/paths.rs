//! Application paths and wire-level naming constants
//!
//! Central definitions for the app prefix, managed-network name, host
//! gateway sentinel, and the on-disk layout under the clawker home
//! directory. Every constant that appears on the wire (labels, container
//! names, injected env vars) derives from [`APP_NAME`].

use directories_next::UserDirs;
use std::path::PathBuf;

/// Application name; the basis for container names, labels, and env vars.
pub const APP_NAME: &str = "clawker";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CLAWKER";

/// Label marking a container as managed by clawker.
pub const LABEL_MANAGED: &str = "com.clawker.managed";

/// Label carrying the owning project slug.
pub const LABEL_PROJECT: &str = "com.clawker.project";

/// Label carrying the agent name.
pub const LABEL_AGENT: &str = "com.clawker.agent";

/// Service identity string returned by the host proxy's `/healthz`.
pub const HOST_PROXY_SERVICE: &str = "clawker-host-proxy";

/// Env var injected into containers with the host proxy URL.
pub const ENV_HOST_PROXY: &str = "CLAWKER_HOST_PROXY";

/// Default managed network name.
const DEFAULT_NETWORK: &str = "clawker-net";

/// Default in-container hostname that resolves to the host.
const DEFAULT_HOST_GATEWAY: &str = "host.docker.internal";

/// Name of the managed docker network every clawker container joins.
pub fn managed_network() -> String {
    std::env::var("CLAWKER_NETWORK").unwrap_or_else(|_| DEFAULT_NETWORK.to_string())
}

/// Hostname containers use to reach services on the host.
pub fn host_gateway() -> String {
    std::env::var("CLAWKER_HOST_GATEWAY").unwrap_or_else(|_| DEFAULT_HOST_GATEWAY.to_string())
}

/// The clawker home directory (`~/.clawker` unless `CLAWKER_HOME` is set).
pub fn app_home() -> PathBuf {
    if let Ok(home) = std::env::var("CLAWKER_HOME") {
        return PathBuf::from(home);
    }
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(format!(".{APP_NAME}")))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}")))
}

/// User settings file path.
pub fn settings_path() -> PathBuf {
    app_home().join("settings.yaml")
}

/// Per-user project overlay file, holding project-scope keys written while
/// outside any registered project.
pub fn user_project_overlay_path() -> PathBuf {
    app_home().join("project.yaml")
}

/// Project registry file path.
pub fn registry_path() -> PathBuf {
    app_home().join("projects.yaml")
}

/// Host proxy PID file path.
pub fn host_proxy_pid_path() -> PathBuf {
    app_home().join("host-proxy.pid")
}

/// Read-only share directory mounted into every container when present.
pub fn share_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(format!(".{APP_NAME}-share")))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}-share")))
}

/// Project configuration file name (`clawker.yaml`).
pub fn project_config_file() -> String {
    format!("{APP_NAME}.yaml")
}

/// Project-level settings overlay file name (`.clawker.settings.yaml`).
pub fn project_settings_file() -> String {
    format!(".{APP_NAME}.settings.yaml")
}

/// Ignore file consulted by snapshot mode (`.clawkerignore`).
pub fn ignore_file() -> String {
    format!(".{APP_NAME}ignore")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_derive_from_app_name() {
        assert!(LABEL_MANAGED.contains(APP_NAME));
        assert!(LABEL_PROJECT.contains(APP_NAME));
        assert!(LABEL_AGENT.contains(APP_NAME));
        assert!(HOST_PROXY_SERVICE.contains(APP_NAME));
    }

    #[test]
    fn file_names_are_stable() {
        assert_eq!(project_config_file(), "clawker.yaml");
        assert_eq!(project_settings_file(), ".clawker.settings.yaml");
        assert_eq!(ignore_file(), ".clawkerignore");
    }
}
