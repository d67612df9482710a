//! Provisioning plans.
//!
//! A plan is the ordered list of steps a session provisions. Declaration
//! order is a valid creation order: a step may only depend on steps
//! declared before it, which the constructor enforces.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use orbit_core::{
    OrbitConfig, ReadinessConfig, ResourceArtifact, ResourceId, ResourceKind, TemplateRenderer,
    TemplateVars, parse_duration,
};

use crate::error::{LifecycleError, LifecycleResult};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// How readiness of a step is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessMode {
    /// The driver's own probe (a status field read through the provider).
    Driver,
    /// An HTTP GET against an address produced during provisioning.
    ///
    /// `output` names one of the step's outputs, or `<dependency>.<output>`.
    Http { path: String, output: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSpec {
    pub timeout: Duration,
    pub interval: Duration,
    pub mode: ReadinessMode,
}

impl ReadinessSpec {
    fn from_config(config: &ReadinessConfig) -> Self {
        let mode = match (&config.http_path, &config.http_output) {
            (Some(path), Some(output)) => ReadinessMode::Http {
                path: path.clone(),
                output: output.clone(),
            },
            _ => ReadinessMode::Driver,
        };
        Self {
            timeout: parse_duration(&config.timeout).unwrap_or(DEFAULT_PROBE_TIMEOUT),
            interval: parse_duration(&config.interval).unwrap_or(DEFAULT_PROBE_INTERVAL),
            mode,
        }
    }
}

/// One resource to create.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub name: ResourceId,
    pub kind: ResourceKind,
    pub depends_on: Vec<ResourceId>,
    pub artifact: ResourceArtifact,
    /// `None` means the step is complete as soon as it is registered.
    pub readiness: Option<ReadinessSpec>,
    /// Outputs published as `<name>.<output>` endpoints.
    pub expose: Vec<String>,
}

impl PlanStep {
    pub fn new(artifact: ResourceArtifact) -> Self {
        Self {
            name: artifact.name.clone(),
            kind: artifact.kind,
            depends_on: Vec::new(),
            artifact,
            readiness: None,
            expose: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn readiness(mut self, spec: ReadinessSpec) -> Self {
        self.readiness = Some(spec);
        self
    }

    pub fn expose<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose = outputs.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    /// Build a plan, rejecting forward, dangling, and self references.
    pub fn new(steps: Vec<PlanStep>) -> LifecycleResult<Self> {
        let mut declared: HashSet<&str> = HashSet::new();
        for step in &steps {
            if let Some(missing) = step
                .depends_on
                .iter()
                .find(|d| !declared.contains(d.as_str()))
            {
                return Err(LifecycleError::DependencyViolation {
                    step: step.name.clone(),
                    missing: missing.clone(),
                });
            }
            if !declared.insert(step.name.as_str()) {
                return Err(LifecycleError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(Self { steps })
    }

    /// Render every `[[resources]]` entry of `config` for `session_id`.
    ///
    /// `session_dir` is the session's scratch directory, exposed to
    /// templates as `session_dir`. Nothing is created here, so a template
    /// error costs nothing.
    pub fn from_config(
        config: &OrbitConfig,
        base_dir: &Path,
        session_id: &str,
        session_dir: &Path,
        renderer: &TemplateRenderer,
    ) -> LifecycleResult<Self> {
        let vars = TemplateVars::for_session(config, session_id, session_dir);
        let steps = config
            .resources
            .iter()
            .map(|resource| -> LifecycleResult<PlanStep> {
                let artifact = renderer.render_resource(resource, &vars, base_dir)?;
                let mut step = PlanStep::new(artifact)
                    .depends_on(resource.depends_on.iter().cloned())
                    .expose(resource.expose.iter().cloned());
                step.readiness = resource.readiness.as_ref().map(ReadinessSpec::from_config);
                Ok(step)
            })
            .collect::<LifecycleResult<Vec<_>>>()?;
        Self::new(steps)
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
