//! StateStore — redb-backed persistence for Orbit sessions.
//!
//! Provides typed operations over session metadata and the per-session
//! resource log. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use orbit_core::{ResourceRecord, SessionState};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Insert a new session. Fails if the id is taken.
    pub fn create_session(&self, meta: &SessionMeta) -> StateResult<()> {
        let value = serde_json::to_vec(meta).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            if table.get(meta.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(meta.id.clone()));
            }
            table
                .insert(meta.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %meta.id, "session created");
        Ok(())
    }

    /// Overwrite an existing session's metadata.
    pub fn put_session(&self, meta: &SessionMeta) -> StateResult<()> {
        let value = serde_json::to_vec(meta).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            table
                .insert(meta.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %meta.id, state = %meta.state, "session stored");
        Ok(())
    }

    /// Get a session by id.
    pub fn get_session(&self, session_id: &str) -> StateResult<Option<SessionMeta>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        match table.get(session_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let meta: SessionMeta =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// List all sessions, oldest first.
    pub fn list_sessions(&self) -> StateResult<Vec<SessionMeta>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let meta: SessionMeta =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(meta);
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    /// The most recently created session that is not yet DESTROYED.
    pub fn latest_open_session(&self) -> StateResult<Option<SessionMeta>> {
        Ok(self.list_sessions()?.into_iter().rev().find(SessionMeta::is_open))
    }

    /// Remove a session and all of its records. Returns true if it existed.
    pub fn delete_session(&self, session_id: &str) -> StateResult<bool> {
        let keys = self.record_keys(session_id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut sessions = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            existed = sessions.remove(session_id).map_err(map_err!(Write))?.is_some();
            let mut records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            for key in &keys {
                records.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %session_id, existed, records = keys.len(), "session deleted");
        Ok(existed)
    }

    /// Delete every DESTROYED session together with its records.
    ///
    /// FAILED sessions are kept: their records and leak reports are what a
    /// later teardown or a manual cleanup works from. Returns the ids removed.
    pub fn prune_destroyed(&self) -> StateResult<Vec<String>> {
        let mut pruned = Vec::new();
        for meta in self.list_sessions()? {
            if meta.state == SessionState::Destroyed && self.delete_session(&meta.id)? {
                pruned.push(meta.id);
            }
        }
        debug!(pruned = pruned.len(), "destroyed sessions pruned");
        Ok(pruned)
    }

    // ── Records ────────────────────────────────────────────────────

    /// Append a record at `ordinal`. Fails if the slot is already taken.
    pub fn append_record(
        &self,
        session_id: &str,
        ordinal: u64,
        record: &ResourceRecord,
    ) -> StateResult<()> {
        let key = record_key(session_id, ordinal);
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, resource = %record.id, "record appended");
        Ok(())
    }

    /// Rewrite an existing record in place (used to set `destroyed_at`).
    pub fn update_record(
        &self,
        session_id: &str,
        ordinal: u64,
        record: &ResourceRecord,
    ) -> StateResult<()> {
        let key = record_key(session_id, ordinal);
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All records of a session as `(ordinal, record)`, in ordinal order.
    pub fn list_records(&self, session_id: &str) -> StateResult<Vec<(u64, ResourceRecord)>> {
        let prefix = format!("{session_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let Some(ordinal) = key.value().strip_prefix(&prefix) else {
                continue;
            };
            let ordinal: u64 = ordinal
                .parse()
                .map_err(|_| StateError::Deserialize(format!("bad record key {}", key.value())))?;
            let record: ResourceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((ordinal, record));
        }
        results.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(results)
    }

    fn record_keys(&self, session_id: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{session_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let keys = table
            .iter()
            .map_err(map_err!(Read))?
            .filter_map(|entry| {
                let (key, _) = entry.ok()?;
                let k = key.value().to_string();
                k.starts_with(&prefix).then_some(k)
            })
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::{ProviderHandle, ResourceKind, SessionState};

    fn record(id: &str, deps: &[&str]) -> ResourceRecord {
        ResourceRecord::new(
            id,
            ResourceKind::Cluster,
            ProviderHandle(serde_json::json!({ "name": id })),
            deps.iter().map(|d| d.to_string()),
        )
    }

    #[test]
    fn session_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let meta = SessionMeta::new("lt-1", "lt");

        store.create_session(&meta).unwrap();
        assert_eq!(store.get_session("lt-1").unwrap(), Some(meta));
    }

    #[test]
    fn session_create_rejects_duplicate() {
        let store = StateStore::open_in_memory().unwrap();
        let meta = SessionMeta::new("lt-1", "lt");
        store.create_session(&meta).unwrap();

        let err = store.create_session(&meta).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn session_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_session("nope").unwrap().is_none());
    }

    #[test]
    fn latest_open_session_skips_destroyed() {
        let store = StateStore::open_in_memory().unwrap();
        let mut first = SessionMeta::new("lt-1", "lt");
        first.created_at = 100;
        let mut second = SessionMeta::new("lt-2", "lt");
        second.created_at = 200;
        second.state = SessionState::Destroyed;
        store.create_session(&first).unwrap();
        store.create_session(&second).unwrap();

        let latest = store.latest_open_session().unwrap().unwrap();
        assert_eq!(latest.id, "lt-1");
    }

    #[test]
    fn records_list_in_ordinal_order() {
        let store = StateStore::open_in_memory().unwrap();
        for (ordinal, id) in [(2, "b"), (1, "a"), (10, "c")] {
            store.append_record("s", ordinal, &record(id, &[])).unwrap();
        }
        store.append_record("other", 1, &record("x", &[])).unwrap();

        let ids: Vec<_> = store
            .list_records("s")
            .unwrap()
            .into_iter()
            .map(|(ordinal, r)| (ordinal, r.id))
            .collect();
        assert_eq!(
            ids,
            vec![(1, "a".to_string()), (2, "b".to_string()), (10, "c".to_string())]
        );
    }

    #[test]
    fn append_record_never_overwrites() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_record("s", 1, &record("a", &[])).unwrap();

        let err = store.append_record("s", 1, &record("b", &[])).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert_eq!(store.list_records("s").unwrap()[0].1.id, "a");
    }

    #[test]
    fn update_record_requires_existing_slot() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_record("s", 1, &record("a", &[])).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn delete_session_removes_records() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_session(&SessionMeta::new("s", "lt")).unwrap();
        store.append_record("s", 1, &record("a", &[])).unwrap();
        store.append_record("s", 2, &record("b", &["a"])).unwrap();

        assert!(store.delete_session("s").unwrap());
        assert!(store.list_records("s").unwrap().is_empty());
        assert!(!store.delete_session("s").unwrap());
    }

    #[test]
    fn prune_removes_only_destroyed_sessions() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, state) in [
            ("done", SessionState::Destroyed),
            ("leaky", SessionState::Failed),
            ("live", SessionState::Ready),
        ] {
            let mut meta = SessionMeta::new(id, "lt");
            meta.state = state;
            store.create_session(&meta).unwrap();
            store.append_record(id, 1, &record("a", &[])).unwrap();
        }

        assert_eq!(store.prune_destroyed().unwrap(), vec!["done".to_string()]);
        assert!(store.get_session("done").unwrap().is_none());
        assert!(store.list_records("done").unwrap().is_empty());
        assert_eq!(store.list_records("leaky").unwrap().len(), 1);
        assert_eq!(store.list_sessions().unwrap().len(), 2);
        assert!(store.prune_destroyed().unwrap().is_empty());
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orbit.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.create_session(&SessionMeta::new("s", "lt")).unwrap();
            store.append_record("s", 1, &record("a", &[])).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert!(store.get_session("s").unwrap().is_some());
        assert_eq!(store.list_records("s").unwrap().len(), 1);
    }
}
