//! Credential and environment injection
//!
//! Derives the extra environment entries and mounts a container receives
//! from the merged configuration plus host state: firewall settings,
//! git/GPG/SSH forwarding, editor preferences, terminal capabilities,
//! user-declared env (literal, env-file, and host pass-through), and the
//! host proxy URL. Appended to the create options after the workspace is
//! assembled and before runtime configs are built.

use crate::config::ProjectConfig;
use crate::container::ContainerIdentity;
use crate::errors::Result;
use crate::mount::MountSpec;
use crate::workspace::{expand_home, WorkspaceSpec};
use std::path::Path;
use tracing::{debug, instrument};

/// Baseline egress domains every firewalled container may reach. Override
/// mode replaces this list entirely.
pub const REQUIRED_DOMAINS: &[&str] = &[
    "api.anthropic.com",
    "statsig.anthropic.com",
    "sentry.io",
    "registry.npmjs.org",
    "github.com",
    "objects.githubusercontent.com",
];

/// In-container path of the forwarded SSH agent socket.
const SSH_SOCKET_TARGET: &str = "/run/clawker/ssh-agent.sock";

/// Host docker socket, mounted only when `security.docker_socket` opts in.
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// In-container directory where the GPG forwarder materializes sockets.
const GPG_SOCKET_DIR: &str = "/run/clawker/gpg";

/// Host terminal capabilities as observed at launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermCaps {
    pub truecolor: bool,
    pub color256: bool,
}

impl TermCaps {
    /// Detect from the host environment (`COLORTERM`, `TERM`).
    pub fn from_env() -> Self {
        let colorterm = std::env::var("COLORTERM").unwrap_or_default();
        let term = std::env::var("TERM").unwrap_or_default();
        Self {
            truecolor: colorterm.contains("truecolor") || colorterm.contains("24bit"),
            color256: term.contains("256color"),
        }
    }
}

/// Inputs to injection derivation.
#[derive(Debug)]
pub struct CredentialContext<'a> {
    pub config: &'a ProjectConfig,
    pub identity: &'a ContainerIdentity,
    pub workspace: &'a WorkspaceSpec,
    /// Whether the host proxy is up (started or adopted)
    pub proxy_running: bool,
    /// Container-reachable host proxy URL
    pub proxy_url: Option<String>,
    pub term: TermCaps,
}

/// Derived injection: env entries, extra mounts, and non-fatal warnings.
#[derive(Debug, Default)]
pub struct Injection {
    pub env: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub warnings: Vec<String>,
}

/// Derive env entries and mounts for a container about to be created.
#[instrument(skip(ctx), fields(project = %ctx.identity.project, agent = %ctx.identity.agent))]
pub fn derive_injection(ctx: &CredentialContext<'_>) -> Result<Injection> {
    let mut injection = Injection::default();
    let config = ctx.config;

    // Identity and workspace provenance.
    injection
        .env
        .push(format!("CLAWKER_PROJECT={}", ctx.identity.project));
    injection
        .env
        .push(format!("CLAWKER_AGENT={}", ctx.identity.agent));
    injection
        .env
        .push(format!("CLAWKER_WORKSPACE_MODE={}", ctx.workspace.mode));
    injection.env.push(format!(
        "CLAWKER_WORKSPACE_SOURCE={}",
        ctx.workspace.source_dir.display()
    ));

    if ctx.proxy_running {
        if let Some(url) = &ctx.proxy_url {
            injection
                .env
                .push(format!("{}={url}", crate::paths::ENV_HOST_PROXY));
        }
    }

    if config.security.docker_socket() {
        injection
            .mounts
            .push(MountSpec::bind(DOCKER_SOCKET, DOCKER_SOCKET, false));
    }

    apply_firewall(config, &mut injection);
    apply_forwarding(ctx, &mut injection);
    apply_editor(config, &mut injection);
    apply_term(ctx.term, &mut injection);
    apply_user_env(ctx, &mut injection)?;

    if let Some(instructions) = &config.build.instructions {
        for (key, value) in &instructions.env {
            injection.env.push(format!("{key}={value}"));
        }
    }

    debug!(
        env_entries = injection.env.len(),
        mounts = injection.mounts.len(),
        warnings = injection.warnings.len(),
        "Derived credential injection"
    );
    Ok(injection)
}

fn apply_firewall(config: &ProjectConfig, injection: &mut Injection) {
    let firewall = &config.security.firewall;
    injection
        .env
        .push(format!("CLAWKER_FIREWALL_ENABLED={}", firewall.enabled()));
    if !firewall.enabled() {
        return;
    }

    let domains: Vec<String> = if firewall.is_override() {
        firewall.override_domains.clone()
    } else {
        REQUIRED_DOMAINS
            .iter()
            .map(|d| d.to_string())
            .chain(firewall.add_domains.iter().cloned())
            .collect()
    };
    injection
        .env
        .push(format!("CLAWKER_FIREWALL_DOMAINS={}", domains.join(",")));
    injection
        .env
        .push(format!("CLAWKER_FIREWALL_OVERRIDE={}", firewall.is_override()));

    // Override mode disables IP-range fetching entirely.
    if !firewall.is_override() && !firewall.ip_range_sources.is_empty() {
        injection.env.push(format!(
            "CLAWKER_FIREWALL_IP_RANGE_SOURCES={}",
            firewall.ip_range_sources.join(",")
        ));
    }
}

fn apply_forwarding(ctx: &CredentialContext<'_>, injection: &mut Injection) {
    let Some(credentials) = &ctx.config.security.git_credentials else {
        return;
    };
    if !credentials.enabled() {
        return;
    }

    // Both forwarders ride on the host proxy; without it they degrade.
    if credentials.gpg_forwarding() {
        if ctx.proxy_running {
            injection.env.push("CLAWKER_GPG_FORWARDING=1".to_string());
            injection.mounts.push(MountSpec::tmpfs(GPG_SOCKET_DIR));
        } else {
            injection
                .warnings
                .push("GPG forwarding requested but the host proxy is not running".to_string());
        }
    }
    if credentials.ssh_forwarding() {
        if !ctx.proxy_running {
            injection
                .warnings
                .push("SSH forwarding requested but the host proxy is not running".to_string());
        } else {
            match std::env::var("SSH_AUTH_SOCK") {
                Ok(sock) if !sock.is_empty() => {
                    injection.env.push("CLAWKER_SSH_FORWARDING=1".to_string());
                    injection
                        .env
                        .push(format!("SSH_AUTH_SOCK={SSH_SOCKET_TARGET}"));
                    injection
                        .mounts
                        .push(MountSpec::bind(sock, SSH_SOCKET_TARGET, false));
                }
                _ => injection
                    .warnings
                    .push("SSH forwarding requested but SSH_AUTH_SOCK is not set".to_string()),
            }
        }
    }
}

fn apply_editor(config: &ProjectConfig, injection: &mut Injection) {
    if let Some(editor) = &config.agent.editor {
        injection.env.push(format!("EDITOR={editor}"));
    }
    if let Some(visual) = &config.agent.visual {
        injection.env.push(format!("VISUAL={visual}"));
    }
}

fn apply_term(term: TermCaps, injection: &mut Injection) {
    if term.truecolor {
        injection.env.push("COLORTERM=truecolor".to_string());
    } else if term.color256 {
        // Promote TERM to a 256color variant when that is all we have.
        injection.env.push("TERM=xterm-256color".to_string());
    }
}

fn apply_user_env(ctx: &CredentialContext<'_>, injection: &mut Injection) -> Result<()> {
    let agent = &ctx.config.agent;

    for (key, value) in &agent.env {
        injection.env.push(format!("{key}={value}"));
    }

    let base_dir = ctx
        .workspace
        .project_root_dir
        .as_deref()
        .unwrap_or(&ctx.workspace.source_dir);
    for file in &agent.env_file {
        let path = resolve_env_file(file, base_dir);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for (key, value) in parse_env_file(&text) {
                    injection.env.push(format!("{key}={value}"));
                }
            }
            Err(e) => injection
                .warnings
                .push(format!("cannot read env file {}: {e}", path.display())),
        }
    }

    // Missing host vars warn but never fail the create.
    for name in &agent.from_env {
        match std::env::var(name) {
            Ok(value) => injection.env.push(format!("{name}={value}")),
            Err(_) => injection
                .warnings
                .push(format!("host environment variable {name} is not set")),
        }
    }
    Ok(())
}

fn resolve_env_file(file: &str, base_dir: &Path) -> std::path::PathBuf {
    let expanded = expand_home(file);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

/// Parse `KEY=VALUE` lines: `#` comments and blanks skipped, surrounding
/// single or double quotes trimmed from values.
pub fn parse_env_file(text: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        entries.push((key.to_string(), value.to_string()));
    }
    entries
}
