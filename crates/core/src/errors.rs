//! Error types and handling
//!
//! This module provides domain-specific error types for the container
//! lifecycle pipeline, configuration engine, registry, and host proxy.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    /// Configuration file parsing error
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Strict-schema rejection: unknown keys in a configuration file
    #[error("Unknown configuration keys in {path}: {}", keys.join(", "))]
    UnknownKeys { path: String, keys: Vec<String> },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// A write targeted a key owned by a different scope
    #[error("Key '{key}' is owned by scope '{owner}', not '{requested}'")]
    ScopeOwnership {
        key: String,
        owner: String,
        requested: String,
    },

    /// Key does not map to any known scope
    #[error("Unknown configuration key: {key}")]
    UnknownKey { key: String },

    /// Configuration file I/O error
    #[error("Configuration I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Project registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The working directory is not inside any registered project
    #[error("Not in a registered project: {dir}")]
    NotInProject { dir: String },

    /// No project registered under the given slug
    #[error("Unknown project: {slug}")]
    UnknownProject { slug: String },

    /// Registry file parsing error
    #[error("Failed to parse project registry: {message}")]
    Parse { message: String },

    /// Registry I/O error
    #[error("Registry I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Container runtime errors
#[derive(Error, Debug)]
pub enum DockerError {
    /// Docker CLI binary not found on PATH
    #[error("Docker is not installed or not in PATH")]
    NotInstalled,

    /// Docker daemon not reachable
    #[error("Cannot connect to the container runtime: {message}")]
    ConnectionFailed { message: String },

    /// A docker CLI invocation failed; carries the runtime's stderr verbatim
    #[error("{message}")]
    CommandFailed { message: String },

    /// Named container does not exist
    #[error("No such container: {name}")]
    ContainerNotFound { name: String },

    /// Docker produced output we could not parse
    #[error("Failed to parse runtime output: {message}")]
    InvalidOutput { message: String },
}

/// Host proxy errors
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configured port is held by a process that is not a clawker host proxy
    #[error("Port {port} is in use by a foreign service")]
    PortInUse { port: u16 },

    /// Listener could not be bound or the server thread failed
    #[error("Host proxy server error: {message}")]
    Server { message: String },

    /// PID file I/O error
    #[error("Host proxy PID file error: {source}")]
    PidFile {
        #[from]
        source: std::io::Error,
    },
}

/// Pre-create option validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Mutually exclusive flags were both given
    #[error("{message}")]
    ConflictingFlags { message: String },

    /// A flag value is outside its allowed domain
    #[error("{message}")]
    InvalidValue { message: String },
}

/// Domain errors for clawker
#[derive(Error, Debug)]
pub enum ClawkerError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registry-related errors
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Runtime-related errors
    #[error(transparent)]
    Docker(#[from] DockerError),

    /// Host proxy errors
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Flag/option validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No image could be resolved for container creation
    #[error("No image specified and no default image configured")]
    NoImage,

    /// Default image missing and the rebuild delegate declined or failed
    #[error("Default image '{reference}' is not built: {message}")]
    ImageMissing { reference: String, message: String },

    /// Advisory file lock could not be acquired within the timeout
    #[error("Timed out waiting for lock on {path}")]
    LockTimeout { path: String },

    /// Post-create onboarding artifact injection failed
    #[error("Failed to inject onboarding artifact into container {container}: {message}")]
    OnboardingInject { container: String, message: String },

    /// Multi-target command where some targets failed
    #[error("failed to {op} {failed} container(s)")]
    PartialFailure { op: String, failed: usize },

    /// The command already reported its error precisely; exit non-zero
    /// without printing another summary.
    #[error("silent error")]
    Silent,

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClawkerError {
    /// Concrete remediation steps for error kinds that have a known fix.
    ///
    /// Returned lines are rendered by the CLI under a "Next steps:" block.
    pub fn next_steps(&self) -> Vec<String> {
        match self {
            ClawkerError::Docker(DockerError::NotInstalled)
            | ClawkerError::Docker(DockerError::ConnectionFailed { .. }) => vec![
                "Check that Docker (or a compatible runtime) is installed".to_string(),
                "Start the runtime daemon and retry".to_string(),
            ],
            ClawkerError::NoImage => vec![
                "Pass an image reference explicitly: clawker container create IMAGE".to_string(),
                "Set default_image in clawker.yaml".to_string(),
                "Set default_image in ~/.clawker/settings.yaml".to_string(),
                "Build the project image: clawker image build".to_string(),
            ],
            ClawkerError::Registry(RegistryError::NotInProject { .. }) => vec![
                "Run 'clawker project add' from the project root".to_string(),
            ],
            ClawkerError::LockTimeout { .. } => {
                vec!["Another clawker invocation may hold the lock; retry".to_string()]
            }
            ClawkerError::ImageMissing { reference, .. } => vec![format!(
                "Build the image first: clawker image build (target {reference})"
            )],
            _ => Vec::new(),
        }
    }
}

/// Convenience type alias for Results with ClawkerError
pub type Result<T> = std::result::Result<T, ClawkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_message_matches_cli_summary() {
        let err = ClawkerError::PartialFailure {
            op: "stop".to_string(),
            failed: 1,
        };
        assert_eq!(err.to_string(), "failed to stop 1 container(s)");
    }

    #[test]
    fn no_image_lists_four_fallback_steps() {
        assert_eq!(ClawkerError::NoImage.next_steps().len(), 4);
    }

    #[test]
    fn scope_ownership_error_names_both_scopes() {
        let err = ConfigError::ScopeOwnership {
            key: "build.image".to_string(),
            owner: "project".to_string(),
            requested: "settings".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("project"));
        assert!(msg.contains("settings"));
    }
}
