//! Error types for the Orbit state store and registry.

use orbit_core::ResourceId;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Violations of the registry's append-only ordering rules.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("dependency violation: `{id}` depends on unregistered `{missing}`")]
    DependencyViolation { id: ResourceId, missing: ResourceId },

    #[error("resource `{0}` is already registered")]
    DuplicateId(ResourceId),

    #[error("resource `{0}` is not registered")]
    UnknownRecord(ResourceId),

    /// The durable log references a record created after its dependent.
    #[error("order violation: `{id}` (ordinal {ordinal}) depends on `{dependency}` (ordinal {dependency_ordinal})")]
    OrderViolation {
        id: ResourceId,
        ordinal: u64,
        dependency: ResourceId,
        dependency_ordinal: u64,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
