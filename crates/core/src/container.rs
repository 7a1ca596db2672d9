//! Container identity and label schema
//!
//! Every managed container is identified by a `(project slug, agent name)`
//! tuple. The composed name `clawker.<project>.<agent>` is what appears on
//! the wire, but labels are the source of truth: all filtering goes
//! through `com.clawker.*` labels, never name parsing.

use crate::paths::{APP_NAME, LABEL_AGENT, LABEL_MANAGED, LABEL_PROJECT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Identity of a managed container within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    /// Owning project slug
    pub project: String,
    /// Agent name within the project
    pub agent: String,
}

impl ContainerIdentity {
    /// Create an identity from a project slug and agent name.
    pub fn new(project: impl Into<String>, agent: impl Into<String>) -> Self {
        let identity = Self {
            project: project.into(),
            agent: agent.into(),
        };
        debug!(project = %identity.project, agent = %identity.agent, "Container identity");
        identity
    }

    /// The composed container name: `clawker.<project>.<agent>`.
    pub fn container_name(&self) -> String {
        container_name(&self.project, &self.agent)
    }

    /// The managed/project/agent label set for this identity.
    pub fn labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), self.project.clone()),
            (LABEL_AGENT.to_string(), self.agent.clone()),
        ])
    }
}

/// Compose the container name for a project slug and agent name.
pub fn container_name(project: &str, agent: &str) -> String {
    format!("{APP_NAME}.{project}.{agent}")
}
