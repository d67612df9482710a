//! LifecycleSession — the handle a provisioning run is threaded through.
//!
//! A session owns its durable metadata row and its resource registry.
//! Nothing about a session lives in process-global state: it is created or
//! recovered explicitly and passed to the orchestrator.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use orbit_core::{Endpoints, LeakEntry, ResourceRecord, SessionState, epoch_millis, epoch_secs};
use orbit_state::{ResourceRegistry, SessionMeta, StateStore};

use crate::error::{LifecycleError, LifecycleResult};

/// Generate a session id from the configured session name.
///
/// The id doubles as the cloud-side name prefix, so it is lowercased and
/// restricted to `[a-z0-9-]`.
pub fn new_session_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() { c } else { '-' }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "orbit" } else { slug };
    format!("{slug}-{}", epoch_millis())
}

pub struct LifecycleSession {
    meta: SessionMeta,
    registry: Arc<Mutex<ResourceRegistry>>,
    store: StateStore,
}

impl LifecycleSession {
    /// Start a new session in PROVISIONING. Fails if the id is taken.
    pub fn create(store: StateStore, session_id: &str, name: &str) -> LifecycleResult<Self> {
        let meta = SessionMeta::new(session_id, name);
        store.create_session(&meta)?;
        info!(session = %session_id, name = %name, "session created");
        Ok(Self {
            registry: Arc::new(Mutex::new(ResourceRegistry::new(store.clone(), session_id))),
            meta,
            store,
        })
    }

    /// Reload a session and replay its registry from the store.
    pub fn recover(store: StateStore, session_id: &str) -> LifecycleResult<Self> {
        let meta = store
            .get_session(session_id)?
            .ok_or_else(|| LifecycleError::SessionNotFound(session_id.to_string()))?;
        let registry = ResourceRegistry::load(store.clone(), session_id)?;
        info!(
            session = %session_id,
            state = %meta.state,
            records = registry.len(),
            live = registry.live_count(),
            "session recovered"
        );
        Ok(Self {
            meta,
            registry: Arc::new(Mutex::new(registry)),
            store,
        })
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn state(&self) -> SessionState {
        self.meta.state
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Resources the last teardown left behind.
    pub fn leaks(&self) -> &[LeakEntry] {
        &self.meta.leaks
    }

    /// Published endpoints. Only available while READY.
    pub fn endpoints(&self) -> LifecycleResult<Endpoints> {
        if self.meta.state != SessionState::Ready {
            return Err(LifecycleError::NotReady(self.meta.state));
        }
        Ok(self.meta.endpoints.clone())
    }

    /// The ordered registry log, destroyed records included.
    pub async fn snapshot(&self) -> Vec<ResourceRecord> {
        self.registry.lock().await.snapshot()
    }

    pub(crate) fn registry(&self) -> Arc<Mutex<ResourceRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Move to `to` and persist. The in-memory state only changes once
    /// the store accepted the write.
    pub(crate) fn transition(&mut self, to: SessionState) -> LifecycleResult<()> {
        let from = self.meta.state;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        let mut next = self.meta.clone();
        next.state = to;
        next.updated_at = epoch_secs();
        self.store.put_session(&next)?;
        self.meta = next;
        info!(session = %self.meta.id, %from, %to, "session state changed");
        Ok(())
    }

    /// Stage endpoints; persisted with the next transition.
    pub(crate) fn set_endpoints(&mut self, endpoints: Endpoints) {
        self.meta.endpoints = endpoints;
    }

    /// Stage the leak report; persisted with the next transition.
    pub(crate) fn set_leaks(&mut self, leaks: Vec<LeakEntry>) {
        self.meta.leaks = leaks;
    }
}

impl std::fmt::Debug for LifecycleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSession")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
