//! Command-line provisioning driver.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use orbit_core::{ProviderHandle, ResourceArtifact, ResourceKind};
use orbit_lifecycle::{Created, DriverError, DriverSet, ResourceDriver};
use orbit_readiness::ProbeStatus;

use crate::handle::CommandHandle;
use crate::process::{CommandOutput, RunError, run_command};

/// Drives one resource kind through its rendered CLI commands.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    kind: ResourceKind,
}

impl CommandDriver {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

/// A [`DriverSet`] with a [`CommandDriver`] for every resource kind.
pub fn command_drivers() -> DriverSet {
    ResourceKind::ALL
        .into_iter()
        .fold(DriverSet::new(), |set, kind| {
            set.with(Arc::new(CommandDriver::new(kind)))
        })
}

#[async_trait]
impl ResourceDriver for CommandDriver {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create(&self, artifact: &ResourceArtifact) -> Result<Created, DriverError> {
        let output = run_command(&artifact.create, artifact.manifest.as_deref())
            .await
            .map_err(run_error)?;
        if !output.success {
            return Err(classify_failure(&output, &artifact.permanent));
        }

        // The resource exists from here on: always hand back a handle, even
        // when outputs cannot be extracted, so it gets registered.
        let created = match parse_json(&output.stdout) {
            Some(value) => value,
            None => {
                if !artifact.outputs.is_empty() {
                    warn!(resource = %artifact.name, "create output is not JSON; outputs left empty");
                }
                Value::Null
            }
        };

        let mut outputs = BTreeMap::new();
        for (name, pointer) in &artifact.outputs {
            match created.pointer(pointer) {
                Some(value) => {
                    outputs.insert(name.clone(), scalar(value));
                }
                None => warn!(resource = %artifact.name, output = %name, pointer = %pointer, "output not found in create response"),
            }
        }

        info!(resource = %artifact.name, kind = %self.kind, outputs = outputs.len(), "create command succeeded");
        let handle = CommandHandle::from_artifact(artifact, created).encode()?;
        Ok(Created { handle, outputs })
    }

    async fn destroy(&self, handle: &ProviderHandle) -> Result<(), DriverError> {
        let handle = CommandHandle::decode(handle)?;
        let output = run_command(&handle.destroy, handle.manifest.as_deref())
            .await
            .map_err(run_error)?;

        if output.success {
            return Ok(());
        }
        if handle.not_found.iter().any(|p| output.mentions(p)) {
            debug!(resource = %handle.name, "resource already gone");
            return Ok(());
        }
        Err(classify_failure(&output, &handle.permanent))
    }

    async fn probe(&self, handle: &ProviderHandle) -> ProbeStatus {
        let handle = match CommandHandle::decode(handle) {
            Ok(h) => h,
            Err(e) => return ProbeStatus::Error(e.to_string()),
        };
        let Some(probe) = &handle.probe else {
            return ProbeStatus::Error(format!("`{}` has no probe command", handle.name));
        };

        let output = match run_command(&probe.command, None).await {
            Ok(output) if output.success => output,
            Ok(output) => {
                debug!(resource = %handle.name, error = %output.failure_summary(), "probe command failed");
                return ProbeStatus::Pending;
            }
            Err(RunError::NotFound(program)) => {
                return ProbeStatus::Error(format!("`{program}` is not installed or not on PATH"));
            }
            Err(e) => {
                debug!(resource = %handle.name, error = %e, "probe command could not run");
                return ProbeStatus::Pending;
            }
        };

        let Some(status) = parse_json(&output.stdout)
            .as_ref()
            .and_then(|v| v.pointer(&probe.status_pointer))
            .map(scalar)
        else {
            debug!(resource = %handle.name, pointer = %probe.status_pointer, "status not reported yet");
            return ProbeStatus::Pending;
        };

        if probe.ready.contains(&status) {
            ProbeStatus::Ready
        } else if probe.error.contains(&status) {
            ProbeStatus::Error(format!("status {status}"))
        } else {
            debug!(resource = %handle.name, status = %status, "not ready");
            ProbeStatus::Pending
        }
    }
}

fn run_error(err: RunError) -> DriverError {
    match err {
        RunError::Io { .. } => DriverError::Retryable(err.to_string()),
        RunError::Empty | RunError::NotFound(_) => DriverError::Permanent(err.to_string()),
    }
}

fn classify_failure(output: &CommandOutput, permanent: &[String]) -> DriverError {
    let summary = output.failure_summary();
    if permanent.iter().any(|p| output.mentions(p)) {
        DriverError::Permanent(summary)
    } else {
        DriverError::Retryable(summary)
    }
}

fn parse_json(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Render a JSON value the way status lists are written in orbit.toml.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
