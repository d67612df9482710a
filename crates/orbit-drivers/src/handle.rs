//! Self-contained provider handle of a command-driven resource.

use serde::{Deserialize, Serialize};

use orbit_core::{ProbeArtifact, ProviderHandle, ResourceArtifact, ResourceKind};
use orbit_lifecycle::DriverError;

/// What a [`CommandDriver`](crate::CommandDriver) stores in a resource's
/// [`ProviderHandle`]: the rendered destroy and probe commands plus the
/// patterns used to classify their failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandHandle {
    pub name: String,
    pub kind: ResourceKind,
    pub destroy: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeArtifact>,
    /// Fed to `destroy` on stdin, like it was to `create`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default)]
    pub not_found: Vec<String>,
    #[serde(default)]
    pub permanent: Vec<String>,
    /// Parsed stdout of the create command, kept for inspection.
    #[serde(default)]
    pub created: serde_json::Value,
}

impl CommandHandle {
    pub fn from_artifact(artifact: &ResourceArtifact, created: serde_json::Value) -> Self {
        Self {
            name: artifact.name.clone(),
            kind: artifact.kind,
            destroy: artifact.destroy.clone(),
            probe: artifact.probe.clone(),
            manifest: artifact.manifest.clone(),
            not_found: artifact.not_found.clone(),
            permanent: artifact.permanent.clone(),
            created,
        }
    }

    pub fn decode(handle: &ProviderHandle) -> Result<Self, DriverError> {
        serde_json::from_value(handle.0.clone())
            .map_err(|e| DriverError::Permanent(format!("unreadable provider handle: {e}")))
    }

    pub fn encode(&self) -> Result<ProviderHandle, DriverError> {
        serde_json::to_value(self)
            .map(ProviderHandle)
            .map_err(|e| DriverError::Permanent(format!("provider handle not serializable: {e}")))
    }
}
