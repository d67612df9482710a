//! Teardown engine.
//!
//! Destroys a session's live records in reverse creation order, driven
//! entirely by the registry. Layers from
//! [`ResourceRegistry::teardown_layers`] run one after another; records
//! inside a layer are destroyed concurrently on a bounded worker pool.
//!
//! A record that cannot be destroyed does not stop its siblings. Records it
//! depends on are held back (their dependent still exists) and reported
//! as leaks alongside it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use orbit_core::{LeakEntry, ResourceId, ResourceRecord, TeardownOutcome, TeardownResult};
use orbit_state::ResourceRegistry;

use crate::driver::{DriverSet, ResourceDriver};
use crate::error::LifecycleResult;
use crate::retry::{RetryPolicy, retry_transient};

/// Per-record outcomes of one teardown run, plus what was left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub outcomes: Vec<TeardownOutcome>,
    pub leaks: Vec<LeakEntry>,
}

impl TeardownReport {
    /// True when nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    pub fn destroyed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result == TeardownResult::Destroyed)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} destroyed, {} leaked",
            self.destroyed(),
            self.leaks.len()
        )
    }

    fn push(&mut self, record: &ResourceRecord, outcome: TeardownOutcome) {
        if outcome.result != TeardownResult::Destroyed {
            self.leaks.push(LeakEntry {
                resource_id: record.id.clone(),
                kind: record.kind,
                provider_handle: record.provider_handle.clone(),
                result: outcome.result,
                reason: outcome.error.clone().unwrap_or_default(),
            });
        }
        self.outcomes.push(outcome);
    }
}

#[derive(Clone)]
pub struct TeardownEngine {
    drivers: DriverSet,
    policy: RetryPolicy,
    max_parallel: usize,
}

impl TeardownEngine {
    pub fn new(drivers: DriverSet, policy: RetryPolicy, max_parallel: usize) -> Self {
        Self {
            drivers,
            policy,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Destroy every live record in `registry`.
    ///
    /// Only fails if the registry itself is unusable; provider failures are
    /// reported per record in the returned report.
    pub async fn run(&self, registry: &Arc<Mutex<ResourceRegistry>>) -> LifecycleResult<TeardownReport> {
        let (session_id, layers, dependents) = {
            let reg = registry.lock().await;
            let layers = reg.teardown_layers()?;
            let dependents: HashMap<ResourceId, Vec<ResourceId>> = layers
                .iter()
                .flatten()
                .map(|r| (r.id.clone(), reg.dependents_of(&r.id)))
                .collect();
            (reg.session_id().to_string(), layers, dependents)
        };

        let live: usize = layers.iter().map(Vec::len).sum();
        info!(session = %session_id, live, layers = layers.len(), "teardown started");

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut report = TeardownReport::default();
        let mut failed: HashSet<ResourceId> = HashSet::new();

        for layer in layers {
            let mut tasks: JoinSet<TeardownOutcome> = JoinSet::new();
            let mut running: HashMap<tokio::task::Id, ResourceRecord> = HashMap::new();

            for record in layer {
                let blocker = dependents
                    .get(&record.id)
                    .and_then(|ds| ds.iter().find(|d| failed.contains(*d)))
                    .cloned();
                if let Some(blocker) = blocker {
                    warn!(
                        session = %session_id,
                        resource = %record.id,
                        blocked_by = %blocker,
                        "not destroying: a dependent still exists"
                    );
                    failed.insert(record.id.clone());
                    report.push(
                        &record,
                        outcome(
                            &record,
                            TeardownResult::RetryableFailure,
                            0,
                            Some(format!("dependent `{blocker}` was not destroyed")),
                        ),
                    );
                    continue;
                }

                let Some(driver) = self.drivers.get(record.kind) else {
                    error!(session = %session_id, resource = %record.id, kind = %record.kind, "no driver for resource kind");
                    failed.insert(record.id.clone());
                    report.push(
                        &record,
                        outcome(
                            &record,
                            TeardownResult::PermanentFailure,
                            0,
                            Some(format!("no driver registered for {} resources", record.kind)),
                        ),
                    );
                    continue;
                };

                // Acquired before spawning so destroys start in reverse order.
                let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
                let policy = self.policy.clone();
                let task_record = record.clone();
                let handle = tasks.spawn(async move {
                    let _permit = permit;
                    destroy_record(driver, task_record, policy).await
                });
                running.insert(handle.id(), record);
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                let (id, result) = match joined {
                    Ok((id, result)) => (id, Ok(result)),
                    Err(err) => (err.id(), Err(err)),
                };
                let Some(record) = running.remove(&id) else {
                    continue;
                };
                let mut result = result.unwrap_or_else(|err| {
                    error!(session = %session_id, resource = %record.id, error = %err, "destroy task panicked");
                    outcome(
                        &record,
                        TeardownResult::PermanentFailure,
                        0,
                        Some(format!("destroy task panicked: {err}")),
                    )
                });

                if result.result == TeardownResult::Destroyed {
                    if let Err(e) = registry.lock().await.mark_destroyed(&record.id) {
                        // The record stays live so the session stays resumable;
                        // a later destroy gets not-found, which is success.
                        error!(session = %session_id, resource = %record.id, error = %e, "failed to persist destroyed marker");
                        result.result = TeardownResult::RetryableFailure;
                        result.error = Some(format!("destroyed, but the registry could not record it: {e}"));
                    }
                } else {
                    failed.insert(record.id.clone());
                }
                report.push(&record, result);
            }
        }

        if report.is_clean() {
            info!(session = %session_id, destroyed = report.destroyed(), "teardown complete");
        } else {
            warn!(
                session = %session_id,
                destroyed = report.destroyed(),
                leaked = report.leaks.len(),
                "teardown left resources behind"
            );
        }
        Ok(report)
    }
}

async fn destroy_record(
    driver: Arc<dyn ResourceDriver>,
    record: ResourceRecord,
    policy: RetryPolicy,
) -> TeardownOutcome {
    let driver = driver.as_ref();
    let handle = &record.provider_handle;
    let (result, attempts) =
        retry_transient(&policy, &format!("destroy {}", record.id), move || driver.destroy(handle)).await;

    match result {
        Ok(()) => {
            info!(resource = %record.id, kind = %record.kind, attempts, "resource destroyed");
            outcome(&record, TeardownResult::Destroyed, attempts, None)
        }
        Err(e) => {
            error!(resource = %record.id, kind = %record.kind, attempts, error = %e, "resource could not be destroyed");
            outcome(
                &record,
                TeardownResult::PermanentFailure,
                attempts,
                Some(e.to_string()),
            )
        }
    }
}

fn outcome(
    record: &ResourceRecord,
    result: TeardownResult,
    attempts: u32,
    error: Option<String>,
) -> TeardownOutcome {
    TeardownOutcome {
        resource_id: record.id.clone(),
        kind: record.kind,
        result,
        attempts,
        error,
    }
}
