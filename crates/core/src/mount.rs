//! Mount and port-binding specifications
//!
//! Structured mount types convertible to docker CLI `--mount` arguments.
//! Supports bind mounts, named volumes, and tmpfs overlays, plus the
//! `SRC:DST[:opts]` shorthand used by the `-v` flag and `HOST:CTR[/proto]`
//! port bindings used by `-p`.

use crate::errors::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Types of mounts a container can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    /// Bind mount from the host filesystem
    Bind,
    /// Named docker volume
    Volume,
    /// Temporary in-memory filesystem
    Tmpfs,
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountType::Bind => write!(f, "bind"),
            MountType::Volume => write!(f, "volume"),
            MountType::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A single mount entry on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub kind: MountType,
    /// Host path (bind) or volume name (volume); unset for tmpfs
    pub source: Option<String>,
    /// Mount point inside the container
    pub target: String,
    /// Read-only mount
    pub read_only: bool,
}

impl MountSpec {
    /// Bind-mount a host path.
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            kind: MountType::Bind,
            source: Some(source.into().display().to_string()),
            target: target.into(),
            read_only,
        }
    }

    /// Mount a named volume.
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountType::Volume,
            source: Some(name.into()),
            target: target.into(),
            read_only: false,
        }
    }

    /// Mask a path with an empty tmpfs.
    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            kind: MountType::Tmpfs,
            source: None,
            target: target.into(),
            read_only: false,
        }
    }

    /// Render as a docker CLI `--mount` argument value.
    pub fn to_docker_arg(&self) -> String {
        let mut parts = vec![format!("type={}", self.kind)];
        if let Some(source) = &self.source {
            parts.push(format!("source={source}"));
        }
        parts.push(format!("target={}", self.target));
        if self.read_only {
            parts.push("readonly".to_string());
        }
        parts.join(",")
    }
}

impl FromStr for MountSpec {
    type Err = crate::errors::ClawkerError;

    /// Parse the `-v SRC:DST[:ro]` shorthand. A source beginning with `/`
    /// or `.` is a bind mount; anything else names a volume.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ValidationError::InvalidValue {
                message: format!("Invalid volume specification '{s}'. Expected SRC:DST[:ro]"),
            }
            .into());
        }
        let read_only = match parts.get(2) {
            None => false,
            Some(&"ro") => true,
            Some(&"rw") => false,
            Some(other) => {
                return Err(ValidationError::InvalidValue {
                    message: format!("Invalid volume option '{other}' in '{s}'"),
                }
                .into())
            }
        };
        let kind = if parts[0].starts_with('/') || parts[0].starts_with('.') {
            MountType::Bind
        } else {
            MountType::Volume
        };
        Ok(Self {
            kind,
            source: Some(parts[0].to_string()),
            target: parts[1].to_string(),
            read_only,
        })
    }
}

/// A host-to-container port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

impl PortSpec {
    /// Render as a docker CLI `-p` argument value.
    pub fn to_docker_arg(&self) -> String {
        format!(
            "{}:{}/{}",
            self.host_port, self.container_port, self.protocol
        )
    }
}

impl FromStr for PortSpec {
    type Err = crate::errors::ClawkerError;

    /// Parse `HOST:CTR[/proto]`.
    fn from_str(s: &str) -> Result<Self> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, proto)) if proto == "tcp" || proto == "udp" => (ports, proto),
            Some((_, proto)) => {
                return Err(ValidationError::InvalidValue {
                    message: format!("Invalid port protocol '{proto}' in '{s}'"),
                }
                .into())
            }
            None => (s, "tcp"),
        };
        let (host, container) = ports.split_once(':').ok_or_else(|| {
            ValidationError::InvalidValue {
                message: format!("Invalid port specification '{s}'. Expected HOST:CTR[/proto]"),
            }
        })?;
        let parse = |part: &str| {
            part.parse::<u16>().map_err(|_| ValidationError::InvalidValue {
                message: format!("Invalid port number '{part}' in '{s}'"),
            })
        };
        Ok(Self {
            host_port: parse(host)?,
            container_port: parse(container)?,
            protocol: protocol.to_string(),
        })
    }
}
