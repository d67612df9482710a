//! ResourceRegistry — the append-only record of everything a session created.
//!
//! The registry is the source of truth for teardown. Its append order is a
//! valid creation order (a record may only depend on records appended before
//! it), so its reverse is a valid destruction order. Every mutation is
//! written through to the [`StateStore`] before it returns.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use orbit_core::{ResourceId, ResourceRecord, SessionId, epoch_secs};

use crate::error::{RegistryError, RegistryResult};
use crate::store::StateStore;

/// A record plus the slot it occupies in the durable log.
struct Entry {
    ordinal: u64,
    /// False if the append never reached the store.
    persisted: bool,
    record: ResourceRecord,
}

/// Ordered, durable registry of one session's resources.
pub struct ResourceRegistry {
    session_id: SessionId,
    store: StateStore,
    /// Entries in append order, ordinals strictly increasing.
    entries: Vec<Entry>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceRegistry {
    /// An empty registry for a new session.
    pub fn new(store: StateStore, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            store,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild a session's registry by replaying its durable log.
    ///
    /// Stored ordinals are kept as-is, gaps included, so later updates hit
    /// the same keys. The log is re-validated: a record referencing a
    /// missing or later-created dependency means the stored copy was
    /// corrupted or edited by hand, and replay is refused.
    pub fn load(store: StateStore, session_id: &str) -> RegistryResult<Self> {
        let stored = store.list_records(session_id)?;
        let mut registry = Self::new(store, session_id);
        let mut expected = 1u64;
        for (ordinal, record) in stored {
            if ordinal != expected {
                warn!(
                    session = %session_id,
                    expected,
                    found = ordinal,
                    "gap in registry log"
                );
            }
            expected = ordinal + 1;
            registry.index.insert(record.id.clone(), registry.entries.len());
            registry.entries.push(Entry {
                ordinal,
                persisted: true,
                record,
            });
        }
        registry.validate()?;
        debug!(session = %session_id, records = registry.entries.len(), "registry replayed");
        Ok(registry)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append a record and persist it. Returns the record's ordinal.
    ///
    /// Fails with `DependencyViolation` if any `depends_on` entry has not
    /// been appended yet.
    pub fn append(&mut self, record: ResourceRecord) -> RegistryResult<u64> {
        if self.index.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        if let Some(missing) = record.depends_on.iter().find(|d| !self.index.contains_key(*d)) {
            return Err(RegistryError::DependencyViolation {
                id: record.id.clone(),
                missing: missing.clone(),
            });
        }

        let ordinal = self.next_ordinal();
        let persisted = self.store.append_record(&self.session_id, ordinal, &record);

        // Keep the record even if the write failed: the resource exists, and
        // this process can still tear it down from memory.
        self.index.insert(record.id.clone(), self.entries.len());
        debug!(session = %self.session_id, resource = %record.id, ordinal, "resource registered");
        self.entries.push(Entry {
            ordinal,
            persisted: persisted.is_ok(),
            record,
        });

        persisted?;
        Ok(ordinal)
    }

    /// Mark a record destroyed and persist it.
    ///
    /// Idempotent: returns `false` if the record was already destroyed. The
    /// in-memory record only changes once the store has the update, so a
    /// failed write leaves the record live.
    pub fn mark_destroyed(&mut self, id: &str) -> RegistryResult<bool> {
        let Some(&pos) = self.index.get(id) else {
            return Err(RegistryError::UnknownRecord(id.to_string()));
        };
        let entry = &mut self.entries[pos];
        if entry.record.is_destroyed() {
            return Ok(false);
        }

        let mut updated = entry.record.clone();
        updated.destroyed_at = Some(epoch_secs());
        if entry.persisted {
            self.store
                .update_record(&self.session_id, entry.ordinal, &updated)?;
        } else {
            self.store
                .append_record(&self.session_id, entry.ordinal, &updated)?;
            entry.persisted = true;
        }
        entry.record = updated;
        debug!(session = %self.session_id, resource = %id, ordinal = entry.ordinal, "resource marked destroyed");
        Ok(true)
    }

    /// The full ordered log, destroyed records included.
    pub fn snapshot(&self) -> Vec<ResourceRecord> {
        self.records().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.index.get(id).map(|&pos| &self.entries[pos].record)
    }

    /// Durable ordinal of a record.
    pub fn ordinal(&self, id: &str) -> Option<u64> {
        self.index.get(id).map(|&pos| self.entries[pos].ordinal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.records().filter(|r| !r.is_destroyed()).count()
    }

    /// Live records in destruction order: last created first.
    ///
    /// Refuses to emit anything if the log breaks the dependency rules, since
    /// a record emitted out of order could be destroyed while something
    /// built on top of it still exists.
    pub fn reverse_order(&self) -> RegistryResult<Vec<ResourceRecord>> {
        self.validate()?;
        Ok(self
            .entries
            .iter()
            .rev()
            .map(|e| &e.record)
            .filter(|r| !r.is_destroyed())
            .cloned()
            .collect())
    }

    /// Live records grouped into teardown layers.
    ///
    /// Layers are contiguous runs of [`reverse_order`](Self::reverse_order)
    /// whose members do not depend on each other, so each layer may be
    /// destroyed concurrently while layers run strictly in sequence.
    pub fn teardown_layers(&self) -> RegistryResult<Vec<Vec<ResourceRecord>>> {
        let mut layers: Vec<Vec<ResourceRecord>> = Vec::new();
        let mut current: Vec<ResourceRecord> = Vec::new();
        let mut current_deps: HashSet<ResourceId> = HashSet::new();

        for record in self.reverse_order()? {
            if current_deps.contains(&record.id) {
                layers.push(std::mem::take(&mut current));
                current_deps.clear();
            }
            current_deps.extend(record.depends_on.iter().cloned());
            current.push(record);
        }
        if !current.is_empty() {
            layers.push(current);
        }
        Ok(layers)
    }

    /// Ids of records that declared `id` as a dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<ResourceId> {
        self.records()
            .filter(|r| r.depends_on.contains(id))
            .map(|r| r.id.clone())
            .collect()
    }

    fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    fn next_ordinal(&self) -> u64 {
        self.entries.last().map_or(1, |e| e.ordinal + 1)
    }

    /// Check that every dependency points at an earlier record.
    fn validate(&self) -> RegistryResult<()> {
        for (pos, entry) in self.entries.iter().enumerate() {
            let record = &entry.record;
            for dep in &record.depends_on {
                match self.index.get(dep) {
                    None => {
                        return Err(RegistryError::DependencyViolation {
                            id: record.id.clone(),
                            missing: dep.clone(),
                        });
                    }
                    Some(&dep_pos) if dep_pos >= pos => {
                        return Err(RegistryError::OrderViolation {
                            id: record.id.clone(),
                            ordinal: entry.ordinal,
                            dependency: dep.clone(),
                            dependency_ordinal: self.entries[dep_pos].ordinal,
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}
