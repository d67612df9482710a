//! Error types for the lifecycle orchestrator.

use std::time::Duration;

use orbit_core::{ResourceId, ResourceKind, SessionState, TemplateError};
use orbit_readiness::ReadinessError;
use orbit_state::{RegistryError, StateError};
use thiserror::Error;

use crate::teardown::TeardownReport;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// A plan step references a step that is not declared before it.
    #[error("dependency violation: step `{step}` depends on `{missing}`, which is not declared before it")]
    DependencyViolation { step: ResourceId, missing: ResourceId },

    #[error("step `{0}` is declared more than once")]
    DuplicateStep(ResourceId),

    #[error("no driver registered for {0} resources")]
    NoDriver(ResourceKind),

    #[error("failed to create `{resource_id}`: {message}")]
    Provider {
        resource_id: ResourceId,
        message: String,
    },

    #[error("`{resource_id}` did not become ready within {timeout:?}")]
    ProbeTimeout {
        resource_id: ResourceId,
        timeout: Duration,
    },

    #[error("`{resource_id}` failed readiness: {message}")]
    ProbeFailed {
        resource_id: ResourceId,
        message: String,
    },

    #[error("provisioning was cancelled")]
    Cancelled,

    #[error("endpoints are only available once the session is READY (it is {0})")]
    NotReady(SessionState),

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session `{0}` not found")]
    SessionNotFound(String),

    #[error("provisioning step `{0}` panicked")]
    StepPanicked(ResourceId),

    /// Provisioning failed or was cancelled; teardown already ran.
    #[error("provisioning aborted: {cause} ({})", .teardown.summary())]
    Aborted {
        cause: Box<LifecycleError>,
        teardown: TeardownReport,
    },

    /// Provisioning failed and the teardown that followed could not run to
    /// completion; resources may still exist.
    #[error("provisioning aborted: {cause}; teardown did not complete: {teardown_error}")]
    TeardownFailed {
        cause: Box<LifecycleError>,
        teardown_error: Box<LifecycleError>,
    },
}

impl LifecycleError {
    /// The error that started an abort, or `self`.
    pub fn root_cause(&self) -> &LifecycleError {
        match self {
            LifecycleError::Aborted { cause, .. } | LifecycleError::TeardownFailed { cause, .. } => {
                cause.root_cause()
            }
            other => other,
        }
    }
}

impl From<ReadinessError> for LifecycleError {
    fn from(err: ReadinessError) -> Self {
        match err {
            ReadinessError::ProbeTimeout {
                resource_id,
                timeout,
            } => LifecycleError::ProbeTimeout {
                resource_id,
                timeout,
            },
            ReadinessError::ProbeFailed {
                resource_id,
                message,
            } => LifecycleError::ProbeFailed {
                resource_id,
                message,
            },
            ReadinessError::Cancelled { .. } => LifecycleError::Cancelled,
        }
    }
}
