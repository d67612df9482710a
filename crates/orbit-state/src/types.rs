//! Persisted session types.

use serde::{Deserialize, Serialize};

use orbit_core::{Endpoints, LeakEntry, SessionId, SessionState, epoch_secs};

/// Durable metadata of one lifecycle session.
///
/// The session's resource records live in their own table; this row holds
/// everything else needed to resume or report on the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMeta {
    pub id: SessionId,
    /// The `[session] name` the session was started from.
    pub name: String,
    pub state: SessionState,
    /// Published once the session reaches READY.
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Resources the last teardown could not destroy.
    #[serde(default)]
    pub leaks: Vec<LeakEntry>,
    /// Unix timestamp (seconds) when the session was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

impl SessionMeta {
    pub fn new(id: &str, name: &str) -> Self {
        let now = epoch_secs();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: SessionState::Provisioning,
            endpoints: Endpoints::new(),
            leaks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session still owns cloud resources (or might).
    pub fn is_open(&self) -> bool {
        self.state != SessionState::Destroyed
    }
}

/// Composite key of a resource record.
pub fn record_key(session_id: &str, ordinal: u64) -> String {
    format!("{session_id}:{ordinal:010}")
}
