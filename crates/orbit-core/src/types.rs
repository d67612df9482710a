//! Domain types shared across Orbit crates.
//!
//! Everything here is serializable so it can be written to the durable
//! session store and replayed by a later teardown-only invocation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a resource within a session (its logical name).
pub type ResourceId = String;

/// Identifier of a lifecycle session.
pub type SessionId = String;

/// Logical endpoint name → reachable address.
pub type Endpoints = BTreeMap<String, String>;

// ── Resources ──────────────────────────────────────────────────────

/// The kind of a provisioned resource. Selects the driver that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    NetworkAddress,
    Workload,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cluster,
        ResourceKind::NetworkAddress,
        ResourceKind::Workload,
        ResourceKind::Service,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::NetworkAddress => "network_address",
            ResourceKind::Workload => "workload",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Driver-specific identity of a created resource.
///
/// Opaque to everything except the driver that produced it. It must carry
/// enough information to destroy the resource without any in-memory state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderHandle(pub serde_json::Value);

/// One entry of a session's resource registry.
///
/// Records are append-only. The only field that changes after the append
/// is `destroyed_at`, set once when teardown succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub provider_handle: ProviderHandle,
    /// Unix timestamp (seconds) of the registry append.
    pub created_at: u64,
    /// Records this one was created on top of. Must already be registered.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    /// Unix timestamp (seconds) of successful destruction.
    #[serde(default)]
    pub destroyed_at: Option<u64>,
}

impl ResourceRecord {
    pub fn new(
        id: impl Into<ResourceId>,
        kind: ResourceKind,
        provider_handle: ProviderHandle,
        depends_on: impl IntoIterator<Item = ResourceId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            provider_handle,
            created_at: epoch_secs(),
            depends_on: depends_on.into_iter().collect(),
            destroyed_at: None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at.is_some()
    }
}

/// A fully rendered provisioning artifact for one planned resource.
///
/// Produced by the template renderer at plan-build time and consumed by the
/// provisioning driver for the resource's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceArtifact {
    pub name: ResourceId,
    pub kind: ResourceKind,
    pub create: Vec<String>,
    pub destroy: Vec<String>,
    pub probe: Option<ProbeArtifact>,
    /// Rendered manifest body, fed to the create command on stdin.
    pub manifest: Option<String>,
    /// Output name → JSON pointer into the create command's output.
    pub outputs: BTreeMap<String, String>,
    /// Output patterns meaning "the resource is already gone".
    pub not_found: Vec<String>,
    /// Output patterns meaning "retrying will not help".
    pub permanent: Vec<String>,
}

/// Rendered status query for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeArtifact {
    pub command: Vec<String>,
    pub status_pointer: String,
    pub ready: Vec<String>,
    pub error: Vec<String>,
}

// ── Sessions ───────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Provisioning,
    Ready,
    TearingDown,
    Destroyed,
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Provisioning => "PROVISIONING",
            SessionState::Ready => "READY",
            SessionState::TearingDown => "TEARING_DOWN",
            SessionState::Destroyed => "DESTROYED",
            SessionState::Failed => "FAILED",
        }
    }

    /// Whether the transition `self → to` is part of the lifecycle.
    ///
    /// `PROVISIONING → TEARING_DOWN` covers cancellation and sessions
    /// recovered after a crash mid-provisioning; `TEARING_DOWN →
    /// TEARING_DOWN` covers resuming an interrupted teardown.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Provisioning, TearingDown)
                | (Ready, TearingDown)
                | (Failed, TearingDown)
                | (TearingDown, TearingDown)
                | (TearingDown, Destroyed)
                | (TearingDown, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Teardown ───────────────────────────────────────────────────────

/// Result of trying to destroy one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeardownResult {
    Destroyed,
    /// Not destroyed in this run but may succeed on a later `down`
    /// (e.g. held back because a dependent could not be destroyed).
    RetryableFailure,
    /// Destroy gave up after the retry ceiling or a non-retryable error.
    PermanentFailure,
}

impl TeardownResult {
    pub fn label(&self) -> &'static str {
        match self {
            TeardownResult::Destroyed => "DESTROYED",
            TeardownResult::RetryableFailure => "RETRYABLE_FAILURE",
            TeardownResult::PermanentFailure => "PERMANENT_FAILURE",
        }
    }
}

/// Per-record teardown outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownOutcome {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub result: TeardownResult,
    pub attempts: u32,
    pub error: Option<String>,
}

/// A resource teardown could not destroy. Requires operator attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakEntry {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub provider_handle: ProviderHandle,
    pub result: TeardownResult,
    pub reason: String,
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
