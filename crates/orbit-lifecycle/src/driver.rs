//! Resource drivers — the provider capability the orchestrator is generic over.
//!
//! A driver owns one [`ResourceKind`]. It turns a rendered
//! [`ResourceArtifact`] into a live resource and hands back an opaque
//! [`ProviderHandle`] that is sufficient, on its own, to destroy and probe
//! that resource later, possibly from a different process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use orbit_core::{ProviderHandle, ResourceArtifact, ResourceKind};
use orbit_readiness::{ProbeStatus, ReadinessCheck};

use crate::error::{LifecycleError, LifecycleResult};

/// Provider failure, classified by whether trying again can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Throttling, timeouts, transient API errors.
    #[error("{0}")]
    Retryable(String),

    /// Permission denied, malformed request, missing tooling.
    #[error("{0}")]
    Permanent(String),
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            DriverError::Retryable(m) | DriverError::Permanent(m) => m,
        }
    }
}

/// A freshly created resource.
#[derive(Debug, Clone, Default)]
pub struct Created {
    pub handle: ProviderHandle,
    /// Values extracted from the create response (e.g. an assigned address).
    pub outputs: BTreeMap<String, String>,
}

/// Provider capability for one resource kind.
///
/// `destroy` must treat a resource that no longer exists as success.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn create(&self, artifact: &ResourceArtifact) -> Result<Created, DriverError>;

    async fn destroy(&self, handle: &ProviderHandle) -> Result<(), DriverError>;

    async fn probe(&self, handle: &ProviderHandle) -> ProbeStatus;
}

/// Drivers keyed by the kind they handle.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: HashMap<ResourceKind, Arc<dyn ResourceDriver>>,
}

impl DriverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` for its kind, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn ResourceDriver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    pub fn with(mut self, driver: Arc<dyn ResourceDriver>) -> Self {
        self.register(driver);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceDriver>> {
        self.drivers.get(&kind).cloned()
    }

    pub fn require(&self, kind: ResourceKind) -> LifecycleResult<Arc<dyn ResourceDriver>> {
        self.get(kind).ok_or(LifecycleError::NoDriver(kind))
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.drivers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Readiness through a driver's own probe.
pub struct DriverProbe {
    driver: Arc<dyn ResourceDriver>,
    handle: ProviderHandle,
}

impl DriverProbe {
    pub fn new(driver: Arc<dyn ResourceDriver>, handle: ProviderHandle) -> Self {
        Self { driver, handle }
    }
}

#[async_trait]
impl ReadinessCheck for DriverProbe {
    async fn check(&self) -> ProbeStatus {
        self.driver.probe(&self.handle).await
    }
}
