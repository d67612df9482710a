//! Orchestrator — drives a session through provisioning and teardown.
//!
//! Provisioning runs the plan as a dependency graph: a step starts once
//! every step it depends on has been created *and* passed its readiness
//! gate, and independent steps run concurrently up to
//! `max_parallel_steps`. Each created resource is committed to the
//! registry before its readiness probe starts, so it is covered by
//! teardown from that moment on.
//!
//! Any step error, a panicked step, or the cancellation signal stops new
//! steps from starting, aborts in-flight readiness probes, waits for the
//! remaining steps to settle, and tears the session down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use orbit_core::{Endpoints, OrbitConfig, ResourceId, ResourceRecord, SessionState};
use orbit_readiness::{HttpCheck, ReadinessCheck, ReadinessProbe, wait_cancelled, wait_ready};
use orbit_state::{RegistryError, ResourceRegistry};

use crate::driver::{DriverProbe, DriverSet, ResourceDriver};
use crate::error::{LifecycleError, LifecycleResult};
use crate::plan::{Plan, PlanStep, ReadinessMode};
use crate::retry::RetryPolicy;
use crate::session::LifecycleSession;
use crate::teardown::{TeardownEngine, TeardownReport};

/// Concurrency and retry knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    pub max_parallel_steps: usize,
    pub max_parallel_destroys: usize,
    pub retry: RetryPolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            max_parallel_destroys: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl LifecycleSettings {
    pub fn from_config(config: &OrbitConfig) -> Self {
        Self {
            max_parallel_steps: config.lifecycle.max_parallel_steps.max(1),
            max_parallel_destroys: config.lifecycle.max_parallel_destroys.max(1),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

pub struct Orchestrator {
    drivers: DriverSet,
    settings: LifecycleSettings,
    teardown: TeardownEngine,
}

impl Orchestrator {
    pub fn new(drivers: DriverSet, settings: LifecycleSettings) -> Self {
        let teardown = TeardownEngine::new(
            drivers.clone(),
            settings.retry.clone(),
            settings.max_parallel_destroys,
        );
        Self {
            drivers,
            settings,
            teardown,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Provision `plan` into a fresh session and publish its endpoints.
    ///
    /// On success the session is READY. On failure or cancellation every
    /// resource created so far has already been torn down when this
    /// returns, and the error is [`LifecycleError::Aborted`] carrying the
    /// cause and the teardown report. If that teardown itself cannot run,
    /// the error is [`LifecycleError::TeardownFailed`], which keeps the cause.
    pub async fn provision(
        &self,
        session: &mut LifecycleSession,
        plan: &Plan,
        cancel: watch::Receiver<bool>,
    ) -> LifecycleResult<Endpoints> {
        if session.state() != SessionState::Provisioning {
            return Err(LifecycleError::InvalidTransition {
                from: session.state(),
                to: SessionState::Ready,
            });
        }
        info!(session = %session.id(), steps = plan.len(), "provisioning started");

        let result = match self.run_plan(session, plan, cancel).await {
            Ok(endpoints) => {
                session.set_endpoints(endpoints.clone());
                session.transition(SessionState::Ready).map(|()| endpoints)
            }
            Err(e) => Err(e),
        };

        let cause = match result {
            Ok(endpoints) => {
                info!(session = %session.id(), endpoints = endpoints.len(), "session ready");
                return Ok(endpoints);
            }
            Err(cause) => cause,
        };

        if matches!(cause, LifecycleError::Cancelled) {
            warn!(session = %session.id(), "provisioning cancelled, tearing down");
        } else {
            error!(session = %session.id(), error = %cause, "provisioning failed, tearing down");
            if let Err(e) = session.transition(SessionState::Failed) {
                warn!(session = %session.id(), error = %e, "could not record FAILED state");
            }
        }

        match self.teardown(session).await {
            Ok(teardown) => Err(LifecycleError::Aborted {
                cause: Box::new(cause),
                teardown,
            }),
            Err(e) => {
                error!(session = %session.id(), cause = %cause, error = %e, "teardown after failed provisioning did not complete");
                Err(LifecycleError::TeardownFailed {
                    cause: Box::new(cause),
                    teardown_error: Box::new(e),
                })
            }
        }
    }

    /// Destroy every live resource of `session`.
    ///
    /// Idempotent: a DESTROYED session returns an empty report. Ends in
    /// DESTROYED when nothing is left, otherwise in FAILED with the leak
    /// report persisted on the session.
    pub async fn teardown(&self, session: &mut LifecycleSession) -> LifecycleResult<TeardownReport> {
        if session.state() == SessionState::Destroyed {
            debug!(session = %session.id(), "session already destroyed");
            return Ok(TeardownReport::default());
        }
        session.transition(SessionState::TearingDown)?;

        let registry = session.registry();
        let report = self.teardown.run(&registry).await?;
        let live = registry.lock().await.live_count();

        if report.is_clean() && live == 0 {
            session.set_leaks(Vec::new());
            session.transition(SessionState::Destroyed)?;
            info!(session = %session.id(), destroyed = report.destroyed(), "session destroyed");
        } else {
            session.set_leaks(report.leaks.clone());
            session.transition(SessionState::Failed)?;
            warn!(
                session = %session.id(),
                leaked = report.leaks.len(),
                "session has leaked resources; run `orbit down` again or clean up manually"
            );
        }
        Ok(report)
    }

    async fn run_plan(
        &self,
        session: &LifecycleSession,
        plan: &Plan,
        mut cancel: watch::Receiver<bool>,
    ) -> LifecycleResult<Endpoints> {
        // Every kind needs a driver before the first resource exists.
        for step in plan.steps() {
            self.drivers.require(step.kind)?;
        }

        let registry = session.registry();
        let (abort_tx, abort_rx) = watch::channel(false);

        let mut pending: Vec<&PlanStep> = plan.steps().iter().collect();
        let mut completed: HashSet<ResourceId> = HashSet::new();
        let mut endpoints = Endpoints::new();
        let mut tasks: JoinSet<LifecycleResult<StepOutput>> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, ResourceId> = HashMap::new();
        let mut failure: Option<LifecycleError> = None;

        loop {
            if failure.is_none() && *cancel.borrow() {
                info!(session = %session.id(), in_flight = tasks.len(), "cancellation requested");
                failure = Some(LifecycleError::Cancelled);
                let _ = abort_tx.send(true);
            }

            if failure.is_none() {
                let mut i = 0;
                while i < pending.len() && tasks.len() < self.settings.max_parallel_steps {
                    if !pending[i].depends_on.iter().all(|d| completed.contains(d)) {
                        i += 1;
                        continue;
                    }
                    let step = pending.remove(i);
                    let ctx = StepContext {
                        step: step.clone(),
                        driver: self.drivers.require(step.kind)?,
                        registry: Arc::clone(&registry),
                        abort: abort_rx.clone(),
                        upstream: endpoints.clone(),
                    };
                    debug!(session = %session.id(), step = %step.name, "step started");
                    let handle = tasks.spawn(run_step(ctx));
                    running.insert(handle.id(), step.name.clone());
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                _ = wait_cancelled(&mut cancel), if failure.is_none() => {}
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, Ok(output)))) => {
                        running.remove(&id);
                        debug!(session = %session.id(), step = %output.name, "step complete");
                        completed.insert(output.name);
                        endpoints.extend(output.endpoints);
                    }
                    Some(Ok((id, Err(e)))) => {
                        let step = running.remove(&id).unwrap_or_default();
                        if failure.is_none() {
                            error!(session = %session.id(), step = %step, error = %e, "step failed");
                            failure = Some(e);
                            let _ = abort_tx.send(true);
                        } else {
                            debug!(session = %session.id(), step = %step, error = %e, "step stopped after abort");
                        }
                    }
                    Some(Err(join_err)) => {
                        let step = running.remove(&join_err.id()).unwrap_or_default();
                        error!(session = %session.id(), step = %step, error = %join_err, "step panicked");
                        if failure.is_none() {
                            failure = Some(LifecycleError::StepPanicked(step));
                            let _ = abort_tx.send(true);
                        }
                    }
                    None => break,
                },
            }
        }

        match failure {
            Some(e) => Err(e),
            None => match pending.first() {
                // Unreachable for a plan built through `Plan::new`.
                Some(step) => Err(LifecycleError::DependencyViolation {
                    step: step.name.clone(),
                    missing: step
                        .depends_on
                        .iter()
                        .find(|d| !completed.contains(*d))
                        .cloned()
                        .unwrap_or_default(),
                }),
                None => Ok(endpoints),
            },
        }
    }
}

struct StepContext {
    step: PlanStep,
    driver: Arc<dyn ResourceDriver>,
    registry: Arc<Mutex<ResourceRegistry>>,
    abort: watch::Receiver<bool>,
    /// Endpoints exposed by steps completed before this one started.
    upstream: Endpoints,
}

struct StepOutput {
    name: ResourceId,
    endpoints: Endpoints,
}

/// Create, register, and gate one resource.
async fn run_step(ctx: StepContext) -> LifecycleResult<StepOutput> {
    let StepContext {
        step,
        driver,
        registry,
        abort,
        upstream,
    } = ctx;

    info!(resource = %step.name, kind = %step.kind, "creating resource");
    let created = driver
        .create(&step.artifact)
        .await
        .map_err(|e| LifecycleError::Provider {
            resource_id: step.name.clone(),
            message: e.to_string(),
        })?;

    let record = ResourceRecord::new(
        step.name.clone(),
        step.kind,
        created.handle.clone(),
        step.depends_on.iter().cloned(),
    );
    let appended = registry.lock().await.append(record);
    match appended {
        Ok(ordinal) => info!(resource = %step.name, ordinal, "resource registered"),
        // The registry kept the record in memory, so teardown still covers it.
        Err(RegistryError::State(e)) => return Err(e.into()),
        Err(e) => {
            error!(resource = %step.name, error = %e, "resource could not be registered, destroying it");
            if let Err(destroy_err) = driver.destroy(&created.handle).await {
                error!(
                    resource = %step.name,
                    handle = %created.handle.0,
                    error = %destroy_err,
                    "unregistered resource could not be destroyed; remove it manually"
                );
            }
            return Err(e.into());
        }
    }

    let mut endpoints = Endpoints::new();
    for output in &step.expose {
        let value = created
            .outputs
            .get(output)
            .ok_or_else(|| LifecycleError::Provider {
                resource_id: step.name.clone(),
                message: format!("create did not produce output `{output}`"),
            })?;
        endpoints.insert(format!("{}.{output}", step.name), value.clone());
    }

    let Some(spec) = &step.readiness else {
        return Ok(StepOutput {
            name: step.name,
            endpoints,
        });
    };

    let check: Arc<dyn ReadinessCheck> = match &spec.mode {
        ReadinessMode::Driver => Arc::new(DriverProbe::new(
            Arc::clone(&driver),
            created.handle.clone(),
        )),
        ReadinessMode::Http { path, output } => {
            let address = match output.split_once('.') {
                Some(_) => upstream.get(output),
                None => created.outputs.get(output),
            }
            .ok_or_else(|| LifecycleError::ProbeFailed {
                resource_id: step.name.clone(),
                message: format!("no address available for `{output}`"),
            })?;
            let per_request = spec
                .interval
                .clamp(Duration::from_secs(1), Duration::from_secs(10));
            Arc::new(HttpCheck::new(address, path, per_request))
        }
    };

    let probe = ReadinessProbe {
        resource_id: step.name.clone(),
        check,
        timeout: spec.timeout,
        interval: spec.interval,
    };
    info!(resource = %step.name, timeout = ?spec.timeout, "waiting for readiness");
    let polls = wait_ready(&probe, abort).await?;
    info!(resource = %step.name, polls, "resource ready");

    Ok(StepOutput {
        name: step.name,
        endpoints,
    })
}
