//! End-to-end lifecycle tests against an in-memory cloud.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use orbit_core::{
    ProviderHandle, ResourceArtifact, ResourceKind, ResourceRecord, SessionState, TeardownResult,
};
use orbit_lifecycle::{
    Created, DriverError, DriverSet, LifecycleError, LifecycleSession, LifecycleSettings,
    Orchestrator, Plan, PlanStep, ReadinessMode, ReadinessSpec, ResourceDriver, RetryPolicy,
};
use orbit_readiness::ProbeStatus;
use orbit_state::{ResourceRegistry, StateStore};

// ── Fake cloud ─────────────────────────────────────────────────────

#[derive(Default)]
struct Cloud {
    live: Mutex<BTreeSet<String>>,
    events: Mutex<Vec<String>>,
    create_failures: Mutex<HashMap<String, DriverError>>,
    destroy_script: Mutex<HashMap<String, VecDeque<Result<(), DriverError>>>>,
    probe_script: Mutex<HashMap<String, VecDeque<ProbeStatus>>>,
    destroy_calls: Mutex<HashMap<String, u32>>,
}

impl Cloud {
    fn fail_create(&self, name: &str, err: DriverError) {
        self.create_failures.lock().unwrap().insert(name.into(), err);
    }

    fn script_destroy(&self, name: &str, script: Vec<Result<(), DriverError>>) {
        self.destroy_script.lock().unwrap().insert(name.into(), script.into());
    }

    /// The last status repeats forever.
    fn script_probe(&self, name: &str, script: Vec<ProbeStatus>) {
        self.probe_script.lock().unwrap().insert(name.into(), script.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn events_with(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    fn live(&self) -> BTreeSet<String> {
        self.live.lock().unwrap().clone()
    }

    fn destroy_calls(&self, name: &str) -> u32 {
        self.destroy_calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

struct FakeDriver {
    kind: ResourceKind,
    cloud: Arc<Cloud>,
}

fn handle_name(handle: &ProviderHandle) -> String {
    handle.0["name"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl ResourceDriver for FakeDriver {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create(&self, artifact: &ResourceArtifact) -> Result<Created, DriverError> {
        if let Some(err) = self.cloud.create_failures.lock().unwrap().get(&artifact.name) {
            return Err(err.clone());
        }
        self.cloud.live.lock().unwrap().insert(artifact.name.clone());
        self.cloud.events.lock().unwrap().push(format!("create:{}", artifact.name));
        Ok(Created {
            handle: ProviderHandle(serde_json::json!({ "name": artifact.name })),
            outputs: artifact.outputs.clone(),
        })
    }

    async fn destroy(&self, handle: &ProviderHandle) -> Result<(), DriverError> {
        let name = handle_name(handle);
        *self.cloud.destroy_calls.lock().unwrap().entry(name.clone()).or_default() += 1;
        let scripted = self
            .cloud
            .destroy_script
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or(Ok(()))?;
        self.cloud.live.lock().unwrap().remove(&name);
        self.cloud.events.lock().unwrap().push(format!("destroy:{name}"));
        Ok(())
    }

    async fn probe(&self, handle: &ProviderHandle) -> ProbeStatus {
        let name = handle_name(handle);
        self.cloud.events.lock().unwrap().push(format!("probe:{name}"));
        let mut scripts = self.cloud.probe_script.lock().unwrap();
        match scripts.get_mut(&name) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(ProbeStatus::Ready),
            Some(script) => script.front().cloned().unwrap_or(ProbeStatus::Ready),
            None => ProbeStatus::Ready,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn drivers(cloud: &Arc<Cloud>, kinds: &[ResourceKind]) -> DriverSet {
    kinds.iter().fold(DriverSet::new(), |set, kind| {
        set.with(Arc::new(FakeDriver {
            kind: *kind,
            cloud: Arc::clone(cloud),
        }))
    })
}

fn orchestrator(cloud: &Arc<Cloud>, max_parallel_destroys: usize) -> Orchestrator {
    Orchestrator::new(
        drivers(cloud, &ResourceKind::ALL),
        LifecycleSettings {
            max_parallel_steps: 4,
            max_parallel_destroys,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                backoff_multiplier: 2.0,
                attempt_timeout: Duration::from_secs(60),
            },
        },
    )
}

fn artifact(name: &str, kind: ResourceKind) -> ResourceArtifact {
    ResourceArtifact {
        name: name.to_string(),
        kind,
        create: vec!["create".into()],
        destroy: vec!["destroy".into()],
        probe: None,
        manifest: None,
        outputs: BTreeMap::new(),
        not_found: Vec::new(),
        permanent: Vec::new(),
    }
}

fn step(name: &str, deps: &[&str]) -> PlanStep {
    PlanStep::new(artifact(name, ResourceKind::Workload)).depends_on(deps.iter().copied())
}

fn probed(step: PlanStep, timeout_secs: u64) -> PlanStep {
    step.readiness(ReadinessSpec {
        timeout: Duration::from_secs(timeout_secs),
        interval: Duration::from_secs(1),
        mode: ReadinessMode::Driver,
    })
}

fn session(store: &StateStore) -> LifecycleSession {
    LifecycleSession::create(store.clone(), "s-1", "test").unwrap()
}

fn never_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

fn root_cause(err: &LifecycleError) -> &LifecycleError {
    match err {
        LifecycleError::Aborted { cause, .. } => cause,
        other => panic!("expected an aborted provisioning, got {other:?}"),
    }
}

// ── Provisioning ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn provision_creates_in_dependency_order_and_publishes_endpoints() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);

    let mut ip = artifact("ip", ResourceKind::NetworkAddress);
    ip.outputs.insert("address".into(), "34.1.2.3".into());
    let plan = Plan::new(vec![
        probed(PlanStep::new(ip).expose(["address"]), 60),
        probed(step("cluster", &[]), 60),
        step("exporter", &["cluster"]),
        step("ingress", &["cluster", "ip", "exporter"]),
    ])
    .unwrap();

    let endpoints = orchestrator(&cloud, 2)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(endpoints["ip.address"], "34.1.2.3");
    assert_eq!(session.endpoints().unwrap(), endpoints);

    let creates = cloud.events_with("create:");
    let pos = |name: &str| creates.iter().position(|e| e == &format!("create:{name}")).unwrap();
    assert!(pos("cluster") < pos("exporter"));
    assert!(pos("exporter") < pos("ingress"));
    assert!(pos("ip") < pos("ingress"));

    let records = session.snapshot().await;
    assert_eq!(records.len(), 4);
    assert_eq!(records.last().unwrap().id, "ingress");

    let persisted = store.get_session("s-1").unwrap().unwrap();
    assert_eq!(persisted.state, SessionState::Ready);
    assert_eq!(persisted.endpoints, endpoints);
}

#[tokio::test(start_paused = true)]
async fn dependents_wait_for_readiness() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_probe(
        "cluster",
        vec![ProbeStatus::Pending, ProbeStatus::Pending, ProbeStatus::Ready],
    );
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![
        probed(step("cluster", &[]), 60),
        step("exporter", &["cluster"]),
    ])
    .unwrap();

    orchestrator(&cloud, 2)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();

    assert_eq!(
        cloud.events(),
        vec![
            "create:cluster",
            "probe:cluster",
            "probe:cluster",
            "probe:cluster",
            "create:exporter",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failure_at_step_k_tears_down_the_first_k_minus_one() {
    let cloud = Arc::new(Cloud::default());
    cloud.fail_create("c", DriverError::Permanent("quota exceeded".into()));
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"]), step("d", &["c"])]).unwrap();

    let err = orchestrator(&cloud, 1)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        LifecycleError::Provider { resource_id, message } if resource_id == "c" && message.contains("quota")
    ));
    let LifecycleError::Aborted { teardown, .. } = &err else {
        unreachable!()
    };
    assert_eq!(teardown.destroyed(), 2);
    assert!(teardown.is_clean());

    assert_eq!(cloud.events_with("create:"), vec!["create:a", "create:b"]);
    assert_eq!(cloud.events_with("destroy:"), vec!["destroy:b", "destroy:a"]);
    assert!(cloud.live().is_empty());
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(cloud.events_with("create:d").is_empty());
}

#[tokio::test(start_paused = true)]
async fn readiness_failure_tears_down_the_unready_resource() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_probe(
        "cluster",
        vec![ProbeStatus::Pending, ProbeStatus::Error("status DEGRADED".into())],
    );
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![step("ip", &[]), probed(step("cluster", &["ip"]), 60)]).unwrap();

    let err = orchestrator(&cloud, 1)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        LifecycleError::ProbeFailed { resource_id, message } if resource_id == "cluster" && message == "status DEGRADED"
    ));
    assert_eq!(cloud.events_with("destroy:"), vec!["destroy:cluster", "destroy:ip"]);
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_aborts_provisioning() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_probe("cluster", vec![ProbeStatus::Pending]);
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![probed(step("cluster", &[]), 30)]).unwrap();

    let err = orchestrator(&cloud, 1)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        LifecycleError::ProbeTimeout { timeout, .. } if *timeout == Duration::from_secs(30)
    ));
    assert!(cloud.live().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_provisioning_and_tears_down() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_probe("cluster", vec![ProbeStatus::Pending]);
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![
        step("ip", &[]),
        probed(step("cluster", &[]), 3600),
        step("exporter", &["cluster"]),
    ])
    .unwrap();

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = tx.send(true);
    });

    let err = orchestrator(&cloud, 2)
        .provision(&mut session, &plan, rx)
        .await
        .unwrap_err();

    assert!(matches!(root_cause(&err), LifecycleError::Cancelled));
    assert!(cloud.events_with("create:exporter").is_empty());
    assert!(cloud.live().is_empty());
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn missing_driver_fails_before_anything_is_created() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = Orchestrator::new(
        drivers(&cloud, &[ResourceKind::Workload]),
        LifecycleSettings::default(),
    );
    let plan = Plan::new(vec![
        step("exporter", &[]),
        PlanStep::new(artifact("ingress", ResourceKind::Service)),
    ])
    .unwrap();

    let err = orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        LifecycleError::NoDriver(ResourceKind::Service)
    ));
    assert!(cloud.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_exposed_output_is_torn_down() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![step("ip", &[]).expose(["address"])]).unwrap();

    let err = orchestrator(&cloud, 1)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(root_cause(&err), LifecycleError::Provider { .. }));
    assert_eq!(cloud.events_with("destroy:"), vec!["destroy:ip"]);
}

#[tokio::test(start_paused = true)]
async fn provision_requires_a_fresh_session() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![step("a", &[])]).unwrap();
    let orchestrator = orchestrator(&cloud, 1);

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let err = orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    assert_eq!(cloud.events_with("create:").len(), 1);
}

#[tokio::test]
async fn http_readiness_probes_a_dependency_address() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        }
    });

    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let mut ip = artifact("ip", ResourceKind::NetworkAddress);
    ip.outputs.insert("address".into(), address.clone());
    let ingress = PlanStep::new(artifact("ingress", ResourceKind::Service))
        .depends_on(["ip"])
        .readiness(ReadinessSpec {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(100),
            mode: ReadinessMode::Http {
                path: "/metrics".into(),
                output: "ip.address".into(),
            },
        });
    let plan = Plan::new(vec![PlanStep::new(ip).expose(["address"]), ingress]).unwrap();

    let endpoints = orchestrator(&cloud, 1)
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    assert_eq!(endpoints["ip.address"], address);
}

// ── Endpoints ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn endpoints_are_only_available_while_ready() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    assert!(matches!(
        session.endpoints(),
        Err(LifecycleError::NotReady(SessionState::Provisioning))
    ));

    let orchestrator = orchestrator(&cloud, 1);
    let mut ip = artifact("ip", ResourceKind::NetworkAddress);
    ip.outputs.insert("address".into(), "10.0.0.9".into());
    let plan = Plan::new(vec![PlanStep::new(ip).expose(["address"])]).unwrap();
    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let published = session.endpoints().unwrap();

    orchestrator.teardown(&mut session).await.unwrap();
    assert_eq!(published["ip.address"], "10.0.0.9");
    assert!(matches!(
        session.endpoints(),
        Err(LifecycleError::NotReady(SessionState::Destroyed))
    ));
}

// ── Teardown ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn teardown_runs_in_reverse_creation_order() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let plan = Plan::new(vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])]).unwrap();
    let orchestrator = Orchestrator::new(
        drivers(&cloud, &ResourceKind::ALL),
        LifecycleSettings {
            max_parallel_steps: 1,
            max_parallel_destroys: 1,
            ..LifecycleSettings::default()
        },
    );

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let report = orchestrator.teardown(&mut session).await.unwrap();

    assert!(report.is_clean());
    assert_eq!(
        cloud.events_with("destroy:"),
        vec!["destroy:c", "destroy:b", "destroy:a"]
    );
    assert_eq!(session.state(), SessionState::Destroyed);

    let records = session.snapshot().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.is_destroyed()));
}

#[tokio::test(start_paused = true)]
async fn cluster_address_workload_scenario() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_probe("A", vec![ProbeStatus::Pending, ProbeStatus::Ready]);
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 2);
    let plan = Plan::new(vec![
        probed(PlanStep::new(artifact("A", ResourceKind::Cluster)), 60),
        PlanStep::new(artifact("B", ResourceKind::NetworkAddress)),
        PlanStep::new(artifact("C", ResourceKind::Workload)).depends_on(["A"]),
    ])
    .unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let creates = cloud.events_with("create:");
    assert_eq!(creates.len(), 3);
    assert_eq!(creates[2], "create:C");

    let report = orchestrator.teardown(&mut session).await.unwrap();
    assert_eq!(report.destroyed(), 3);

    let destroys = cloud.events_with("destroy:");
    let pos = |name: &str| destroys.iter().position(|e| e == &format!("destroy:{name}")).unwrap();
    assert!(pos("C") < pos("A"));
    assert_eq!(destroys.len(), 3);
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(
        store.get_session("s-1").unwrap().unwrap().state,
        SessionState::Destroyed
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_is_idempotent() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 2);
    let plan = Plan::new(vec![step("a", &[]), step("b", &["a"])]).unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let first = orchestrator.teardown(&mut session).await.unwrap();
    let second = orchestrator.teardown(&mut session).await.unwrap();

    assert_eq!(first.destroyed(), 2);
    assert!(second.outcomes.is_empty());
    assert_eq!(cloud.events_with("destroy:").len(), 2);
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn unrecorded_destroy_keeps_the_session_resumable() {
    let cloud = Arc::new(Cloud::default());
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 1);
    let plan = Plan::new(vec![step("a", &[]), step("b", &["a"])]).unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    // The record log is lost, so destroyed markers cannot be written.
    store.delete_session("s-1").unwrap();

    let report = orchestrator.teardown(&mut session).await.unwrap();

    assert!(cloud.live().is_empty());
    assert_eq!(report.destroyed(), 0);
    assert_eq!(report.leaks.len(), 2);
    assert!(report.leaks.iter().all(|l| l.result == TeardownResult::RetryableFailure));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.snapshot().await.iter().all(|r| !r.is_destroyed()));
    assert_eq!(store.get_session("s-1").unwrap().unwrap().state, SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn transient_destroy_failures_are_retried() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_destroy(
        "cluster",
        vec![
            Err(DriverError::Retryable("rate limited".into())),
            Err(DriverError::Retryable("503".into())),
        ],
    );
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 2);
    let plan = Plan::new(vec![step("cluster", &[])]).unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let report = orchestrator.teardown(&mut session).await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.outcomes[0].attempts, 3);
    assert_eq!(cloud.destroy_calls("cluster"), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_reports_a_permanent_leak() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_destroy(
        "cluster",
        vec![Err(DriverError::Retryable("503".into())); 10],
    );
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 2);
    let plan = Plan::new(vec![step("cluster", &[])]).unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let report = orchestrator.teardown(&mut session).await.unwrap();

    assert_eq!(cloud.destroy_calls("cluster"), 3);
    assert_eq!(report.leaks.len(), 1);
    assert_eq!(report.leaks[0].result, TeardownResult::PermanentFailure);
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn destroy_failure_is_isolated_and_blocks_only_its_dependencies() {
    let cloud = Arc::new(Cloud::default());
    cloud.script_destroy("b", vec![Err(DriverError::Permanent("permission denied".into()))]);
    let store = StateStore::open_in_memory().unwrap();
    let mut session = session(&store);
    let orchestrator = orchestrator(&cloud, 1);
    let plan = Plan::new(vec![step("a", &[]), step("b", &["a"]), step("c", &[])]).unwrap();

    orchestrator
        .provision(&mut session, &plan, never_cancelled())
        .await
        .unwrap();
    let report = orchestrator.teardown(&mut session).await.unwrap();

    // `c` still goes; `a` is held back because `b` is still built on it.
    assert_eq!(cloud.events_with("destroy:"), vec!["destroy:c"]);
    let result_of = |id: &str| {
        report
            .outcomes
            .iter()
            .find(|o| o.resource_id == id)
            .map(|o| o.result)
            .unwrap()
    };
    assert_eq!(result_of("c"), TeardownResult::Destroyed);
    assert_eq!(result_of("b"), TeardownResult::PermanentFailure);
    assert_eq!(result_of("a"), TeardownResult::RetryableFailure);
    assert_eq!(session.state(), SessionState::Failed);

    let persisted = store.get_session("s-1").unwrap().unwrap();
    let leaked: Vec<_> = persisted.leaks.iter().map(|l| l.resource_id.as_str()).collect();
    assert_eq!(leaked.len(), 2);
    assert!(leaked.contains(&"a") && leaked.contains(&"b"));
    assert_eq!(persisted.leaks[0].provider_handle.0["name"], persisted.leaks[0].resource_id.as_str());

    // The next teardown picks up exactly what is left.
    let retry = orchestrator.teardown(&mut session).await.unwrap();
    assert!(retry.is_clean());
    assert_eq!(
        cloud.events_with("destroy:"),
        vec!["destroy:c", "destroy:b", "destroy:a"]
    );
    assert_eq!(cloud.destroy_calls("c"), 1);
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(session.leaks().is_empty());
}

// ── Recovery ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn crashed_session_is_torn_down_from_the_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");
    let cloud = Arc::new(Cloud::default());

    // A run that created two of three resources and then died.
    {
        let store = StateStore::open(&path).unwrap();
        let _session = LifecycleSession::create(store.clone(), "s-1", "test").unwrap();
        let mut registry = ResourceRegistry::new(store, "s-1");
        for (id, deps) in [("cluster", vec![]), ("exporter", vec!["cluster".to_string()])] {
            cloud.live.lock().unwrap().insert(id.to_string());
            registry
                .append(ResourceRecord::new(
                    id,
                    ResourceKind::Workload,
                    ProviderHandle(serde_json::json!({ "name": id })),
                    deps,
                ))
                .unwrap();
        }
    }

    let store = StateStore::open(&path).unwrap();
    let mut session = LifecycleSession::recover(store.clone(), "s-1").unwrap();
    assert_eq!(session.state(), SessionState::Provisioning);

    let report = orchestrator(&cloud, 2).teardown(&mut session).await.unwrap();

    assert_eq!(report.destroyed(), 2);
    assert_eq!(
        cloud.events_with("destroy:"),
        vec!["destroy:exporter", "destroy:cluster"]
    );
    assert!(cloud.live().is_empty());
    assert_eq!(
        store.get_session("s-1").unwrap().unwrap().state,
        SessionState::Destroyed
    );
}
