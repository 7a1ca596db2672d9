//! Configuration schema and strict-schema validation
//!
//! Typed models for the three configuration files clawker reads:
//! `clawker.yaml` (project), `settings.yaml` / `.clawker.settings.yaml`
//! (user settings and project overlay), and `projects.yaml` (registry,
//! modeled in [`crate::registry`]).
//!
//! Parsing is strict: every file is first walked against a closed key
//! schema and unknown keys are rejected with their full `parent.child`
//! paths, then deserialized into the typed model. Environment overrides
//! bypass this validation and are merged later by the store.
//!
//! Several fields are semantically three-state ("unset / true / false")
//! and are modeled as `Option<bool>` with an accessor documenting the
//! default; this keeps "the user never said" distinguishable from "the
//! user said no".

use crate::errors::{ConfigError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, instrument};

/// Workspace mount mode for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Source directory is live bind-mounted into the container
    Bind,
    /// Source directory is copied into a named volume before start
    Snapshot,
}

impl std::str::FromStr for WorkspaceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bind" => Ok(WorkspaceMode::Bind),
            "snapshot" => Ok(WorkspaceMode::Snapshot),
            other => Err(ConfigError::Validation {
                message: format!(
                    "Invalid workspace mode '{other}'. Supported modes: bind, snapshot"
                ),
            }),
        }
    }
}

impl std::fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceMode::Bind => write!(f, "bind"),
            WorkspaceMode::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Build configuration from `clawker.yaml` `build:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Base image for the project's built image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Extra distro packages layered into the built image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// Free-form build instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<BuildInstructions>,
}

/// Additional instructions applied when building the project image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildInstructions {
    /// Environment baked into the image and re-injected on create
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Extra RUN steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
}

/// Claude Code specific agent settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaudeCodeConfig {
    /// Reuse the host's OAuth credentials inside the container.
    /// Unset means disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_host_auth: Option<bool>,
}

impl ClaudeCodeConfig {
    /// Whether host auth reuse is enabled. Defaults to false when unset.
    pub fn use_host_auth(&self) -> bool {
        self.use_host_auth.unwrap_or(false)
    }
}

/// Agent configuration from `clawker.yaml` `agent:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Literal environment entries injected into the container
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Env files (KEY=VALUE lines) merged into the container environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    /// Host env var names passed through verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_env: Vec<String>,
    /// Commands run inside the container after first start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_init: Vec<String>,
    /// Host paths copied into the agent config volume on initialization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    /// Preferred editor inside the container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    /// VISUAL inside the container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<String>,
    /// Claude Code integration settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_code: Option<ClaudeCodeConfig>,
}

/// Workspace configuration from `clawker.yaml` `workspace:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Mount point of the source tree inside the container
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    /// Default mount mode when the CLI does not pass `--mode`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<WorkspaceMode>,
}

fn default_remote_path() -> String {
    "/workspace".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            default_mode: None,
        }
    }
}

/// Egress firewall configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    /// Unset means disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// Domains allowed in addition to the required baseline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_domains: Vec<String>,
    /// Non-empty switches to override mode: the baseline and all IP-range
    /// fetching are disabled and only these domains are allowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub override_domains: Vec<String>,
    /// Named IP-range sources fetched by the in-container firewall
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_range_sources: Vec<String>,
}

impl FirewallConfig {
    /// Whether the firewall is enabled. Defaults to false when unset.
    pub fn enabled(&self) -> bool {
        self.enable.unwrap_or(false)
    }

    /// Override mode replaces the required baseline entirely.
    pub fn is_override(&self) -> bool {
        !self.override_domains.is_empty()
    }
}

/// Git credential forwarding sub-flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitCredentialsConfig {
    /// Forward git credential lookups through the host proxy.
    /// Unset means enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// Relay GPG signing through the host's gpg-agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_forwarding: Option<bool>,
    /// Forward the host SSH agent socket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_forwarding: Option<bool>,
}

impl GitCredentialsConfig {
    /// Whether credential forwarding is enabled. Defaults to true when unset.
    pub fn enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }

    /// Whether GPG forwarding is enabled. Defaults to false when unset.
    pub fn gpg_forwarding(&self) -> bool {
        self.gpg_forwarding.unwrap_or(false)
    }

    /// Whether SSH forwarding is enabled. Defaults to false when unset.
    pub fn ssh_forwarding(&self) -> bool {
        self.ssh_forwarding.unwrap_or(false)
    }
}

/// Security configuration from `clawker.yaml` `security:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Egress firewall settings
    #[serde(default)]
    pub firewall: FirewallConfig,
    /// Mount the docker socket into the container. Unset means no.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<bool>,
    /// Extra Linux capabilities for the container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    /// Git credential / GPG / SSH forwarding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_credentials: Option<GitCredentialsConfig>,
    /// Start the host proxy before container create. Unset means yes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_host_proxy: Option<bool>,
}

impl SecurityConfig {
    /// Whether the docker socket is mounted. Defaults to false when unset.
    pub fn docker_socket(&self) -> bool {
        self.docker_socket.unwrap_or(false)
    }

    /// Whether the host proxy is wanted. Defaults to true when unset.
    pub fn enable_host_proxy(&self) -> bool {
        self.enable_host_proxy.unwrap_or(true)
    }
}

/// Project configuration (`clawker.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: String,
    /// Project slug; injected by the registry, not written by users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Image used when `IMAGE == "@"` and no user-level default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
    /// Built-image definition
    #[serde(default)]
    pub build: BuildConfig,
    /// Agent environment and initialization
    #[serde(default)]
    pub agent: AgentConfig,
    /// Workspace mount configuration
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Security and forwarding configuration
    #[serde(default)]
    pub security: SecurityConfig,
    /// Agent loop settings; free-form, consumed inside the container
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<serde_yaml::Value>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            project: None,
            default_image: None,
            build: BuildConfig::default(),
            agent: AgentConfig::default(),
            workspace: WorkspaceConfig::default(),
            security: SecurityConfig::default(),
            loop_config: None,
        }
    }
}

/// Logging settings (`settings.yaml` `logging:`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Log level filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Also log to a file. Unset means disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_enabled: Option<bool>,
    /// Log file path when file logging is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl LoggingSettings {
    /// Whether file logging is enabled. Defaults to false when unset.
    pub fn file_enabled(&self) -> bool {
        self.file_enabled.unwrap_or(false)
    }
}

/// Monitoring settings (`settings.yaml` `monitoring:`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringSettings {
    /// Unset means disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Sampling interval in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

/// Host proxy manager settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyManagerSettings {
    /// TCP port the host proxy listens on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Host proxy daemon supervision settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyDaemonSettings {
    /// Daemon port (when detached supervision is used)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Seconds between liveness polls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    /// Seconds allowed for graceful drain on stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<u64>,
    /// Consecutive poll failures tolerated before restart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_errs: Option<u32>,
}

/// Host proxy settings (`settings.yaml` `host_proxy:`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostProxySettings {
    #[serde(default)]
    pub manager: ProxyManagerSettings,
    #[serde(default)]
    pub daemon: ProxyDaemonSettings,
}

/// Default host proxy manager port.
pub const DEFAULT_PROXY_PORT: u16 = 18080;

impl HostProxySettings {
    /// Effective manager port, falling back to [`DEFAULT_PROXY_PORT`].
    pub fn manager_port(&self) -> u16 {
        self.manager.port.unwrap_or(DEFAULT_PROXY_PORT)
    }

    /// Seconds allowed for graceful drain on stop. Defaults to 30.
    pub fn grace_period(&self) -> u64 {
        self.daemon.grace_period.unwrap_or(30)
    }
}

/// User settings (`settings.yaml`, overlaid by `.clawker.settings.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub host_proxy: HostProxySettings,
    /// User-level default image for `IMAGE == "@"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
}

/// Closed key schema for strict validation.
///
/// `Node` lists the allowed children; `Leaf` accepts any scalar or
/// sequence; `FreeMap` accepts a mapping with user-chosen keys (e.g.
/// `agent.env`); `Any` accepts anything (free-form subtrees like `loop`).
#[derive(Debug, Clone, Copy)]
pub enum KeySchema {
    Node(&'static [(&'static str, KeySchema)]),
    Leaf,
    FreeMap,
    Any,
}

/// Schema for `clawker.yaml`.
pub const PROJECT_SCHEMA: KeySchema = KeySchema::Node(&[
    ("version", KeySchema::Leaf),
    ("project", KeySchema::Leaf),
    ("default_image", KeySchema::Leaf),
    (
        "build",
        KeySchema::Node(&[
            ("image", KeySchema::Leaf),
            ("packages", KeySchema::Leaf),
            (
                "instructions",
                KeySchema::Node(&[("env", KeySchema::FreeMap), ("run", KeySchema::Leaf)]),
            ),
        ]),
    ),
    (
        "agent",
        KeySchema::Node(&[
            ("env", KeySchema::FreeMap),
            ("env_file", KeySchema::Leaf),
            ("from_env", KeySchema::Leaf),
            ("post_init", KeySchema::Leaf),
            ("includes", KeySchema::Leaf),
            ("editor", KeySchema::Leaf),
            ("visual", KeySchema::Leaf),
            (
                "claude_code",
                KeySchema::Node(&[("use_host_auth", KeySchema::Leaf)]),
            ),
        ]),
    ),
    (
        "workspace",
        KeySchema::Node(&[
            ("remote_path", KeySchema::Leaf),
            ("default_mode", KeySchema::Leaf),
        ]),
    ),
    (
        "security",
        KeySchema::Node(&[
            (
                "firewall",
                KeySchema::Node(&[
                    ("enable", KeySchema::Leaf),
                    ("add_domains", KeySchema::Leaf),
                    ("override_domains", KeySchema::Leaf),
                    ("ip_range_sources", KeySchema::Leaf),
                ]),
            ),
            ("docker_socket", KeySchema::Leaf),
            ("cap_add", KeySchema::Leaf),
            (
                "git_credentials",
                KeySchema::Node(&[
                    ("enable", KeySchema::Leaf),
                    ("gpg_forwarding", KeySchema::Leaf),
                    ("ssh_forwarding", KeySchema::Leaf),
                ]),
            ),
            ("enable_host_proxy", KeySchema::Leaf),
        ]),
    ),
    ("loop", KeySchema::Any),
]);

/// Schema for `settings.yaml` and the project settings overlay.
pub const SETTINGS_SCHEMA: KeySchema = KeySchema::Node(&[
    (
        "logging",
        KeySchema::Node(&[
            ("level", KeySchema::Leaf),
            ("file_enabled", KeySchema::Leaf),
            ("file_path", KeySchema::Leaf),
        ]),
    ),
    (
        "monitoring",
        KeySchema::Node(&[
            ("enabled", KeySchema::Leaf),
            ("interval_secs", KeySchema::Leaf),
        ]),
    ),
    (
        "host_proxy",
        KeySchema::Node(&[
            ("manager", KeySchema::Node(&[("port", KeySchema::Leaf)])),
            (
                "daemon",
                KeySchema::Node(&[
                    ("port", KeySchema::Leaf),
                    ("poll_interval", KeySchema::Leaf),
                    ("grace_period", KeySchema::Leaf),
                    ("max_consecutive_errs", KeySchema::Leaf),
                ]),
            ),
        ]),
    ),
    ("default_image", KeySchema::Leaf),
]);

/// Schema for `projects.yaml`. Worktrees are a legacy flexible map.
pub const REGISTRY_SCHEMA: KeySchema = KeySchema::Node(&[(
    "projects",
    KeySchema::FreeMap, // slug -> entry; entries validated by the typed model
)]);

impl KeySchema {
    /// Look up a child schema by key. Only meaningful on `Node`.
    pub fn child(&self, key: &str) -> Option<&KeySchema> {
        match self {
            KeySchema::Node(children) => children
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, schema)| schema),
            _ => None,
        }
    }
}

/// Collect the full paths of keys not present in the schema.
pub fn unknown_key_paths(value: &serde_yaml::Value, schema: &KeySchema) -> Vec<String> {
    let mut paths = Vec::new();
    collect_unknown(value, schema, String::new(), &mut paths);
    paths
}

fn collect_unknown(
    value: &serde_yaml::Value,
    schema: &KeySchema,
    prefix: String,
    out: &mut Vec<String>,
) {
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        _ => return,
    };
    match schema {
        KeySchema::Node(_) => {
            for (key, child_value) in mapping {
                let key_str = match key.as_str() {
                    Some(s) => s.to_string(),
                    // Non-string keys never match a closed schema
                    None => format!("{key:?}"),
                };
                let path = if prefix.is_empty() {
                    key_str.clone()
                } else {
                    format!("{prefix}.{key_str}")
                };
                match schema.child(&key_str) {
                    Some(child_schema) => {
                        collect_unknown(child_value, child_schema, path, out);
                    }
                    None => out.push(path),
                }
            }
        }
        // Free-form subtrees accept anything beneath them
        KeySchema::FreeMap | KeySchema::Any | KeySchema::Leaf => {}
    }
}

/// Parse a YAML file strictly against a schema, then deserialize.
#[instrument(skip(schema))]
pub fn load_strict<T: serde::de::DeserializeOwned>(
    path: &Path,
    schema: &KeySchema,
) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.display().to_string(),
            }
        } else {
            ConfigError::Io { source: e }
        }
    })?;
    parse_strict(&text, schema, &path.display().to_string())
}

/// Parse YAML text strictly against a schema, then deserialize.
pub fn parse_strict<T: serde::de::DeserializeOwned>(
    text: &str,
    schema: &KeySchema,
    origin: &str,
) -> Result<T> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;

    let unknown = unknown_key_paths(&value, schema);
    if !unknown.is_empty() {
        debug!(origin, keys = ?unknown, "Rejecting unknown configuration keys");
        return Err(ConfigError::UnknownKeys {
            path: origin.to_string(),
            keys: unknown,
        }
        .into());
    }

    serde_yaml::from_value(value).map_err(|e| {
        ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
