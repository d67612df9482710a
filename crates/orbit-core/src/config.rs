//! orbit.toml configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::ResourceKind;

/// Errors raised while loading or validating `orbit.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub vars: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix for session ids and cloud resource names.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub project: String,
    pub zone: String,
    pub node_count: u32,
    pub machine_type: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            zone: "us-central1-a".to_string(),
            node_count: 3,
            machine_type: "e2-standard-4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    pub image: String,
    pub port: u16,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            image: "prom/node-exporter:latest".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on provisioning steps running at once.
    pub max_parallel_steps: usize,
    /// Size of the teardown worker pool.
    pub max_parallel_destroys: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            max_parallel_destroys: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: String,
    pub max_delay: String,
    /// Timeout applied to each individual destroy attempt.
    pub attempt_timeout: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: "2s".to_string(),
            max_delay: "60s".to_string(),
            attempt_timeout: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub create: Vec<String>,
    pub destroy: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Vec<String>>,
    /// Manifest template path, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub expose: Vec<String>,
    #[serde(default)]
    pub not_found: Vec<String>,
    #[serde(default)]
    pub permanent: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout: String,
    #[serde(default = "default_probe_interval")]
    pub interval: String,
    /// JSON pointer to the status field in the probe command's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_pointer: Option<String>,
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
    /// HTTP path probed instead of running the probe command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,
    /// Address to probe: one of this resource's outputs, or
    /// `<dependency>.<output>` for an address exposed by a dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_output: Option<String>,
}

fn default_probe_timeout() -> String {
    "15m".to_string()
}

fn default_probe_interval() -> String {
    "10s".to_string()
}

impl OrbitConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: OrbitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Check the structural rules a plan depends on.
    ///
    /// Dependencies may only point at resources declared earlier in the
    /// file, so declaration order is always a valid creation order.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.session.name.trim().is_empty() {
            return Err(invalid("session.name must not be empty"));
        }
        if self.lifecycle.max_parallel_steps == 0 || self.lifecycle.max_parallel_destroys == 0 {
            return Err(invalid("lifecycle parallelism must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        for (field, value) in [
            ("retry.initial_delay", &self.retry.initial_delay),
            ("retry.max_delay", &self.retry.max_delay),
            ("retry.attempt_timeout", &self.retry.attempt_timeout),
        ] {
            check_duration(field, value)?;
        }
        if self.resources.is_empty() {
            return Err(invalid("at least one [[resources]] entry is required"));
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for res in &self.resources {
            let name = res.name.as_str();
            if name.trim().is_empty() {
                return Err(invalid("resource name must not be empty"));
            }
            if name.contains('.') {
                return Err(invalid(format!("resource `{name}`: name must not contain '.'")));
            }
            for dep in &res.depends_on {
                if dep == name {
                    return Err(invalid(format!("resource `{name}` depends on itself")));
                }
                if !declared.contains(dep.as_str()) {
                    let reason = if self.resource(dep).is_some() {
                        "is declared after it"
                    } else {
                        "does not exist"
                    };
                    return Err(invalid(format!(
                        "resource `{name}` depends on `{dep}`, which {reason}"
                    )));
                }
            }
            if !declared.insert(name) {
                return Err(invalid(format!("duplicate resource name `{name}`")));
            }
            if res.create.is_empty() || res.destroy.is_empty() {
                return Err(invalid(format!(
                    "resource `{name}`: create and destroy commands are required"
                )));
            }
            if res.probe.as_ref().is_some_and(|p| p.is_empty()) {
                return Err(invalid(format!("resource `{name}`: probe command is empty")));
            }
            for exposed in &res.expose {
                if !res.outputs.contains_key(exposed) {
                    return Err(invalid(format!(
                        "resource `{name}`: exposed output `{exposed}` is not in [outputs]"
                    )));
                }
            }
            if let Some(readiness) = &res.readiness {
                self.validate_readiness(res, readiness)?;
            }
        }
        Ok(())
    }

    fn validate_readiness(&self, res: &ResourceConfig, readiness: &ReadinessConfig) -> ConfigResult<()> {
        let name = &res.name;
        check_duration(&format!("{name}.readiness.timeout"), &readiness.timeout)?;
        check_duration(&format!("{name}.readiness.interval"), &readiness.interval)?;

        match (&readiness.status_pointer, &readiness.http_path) {
            (Some(_), Some(_)) => Err(invalid(format!(
                "resource `{name}`: readiness takes either status_pointer or http_path, not both"
            ))),
            (None, None) => Err(invalid(format!(
                "resource `{name}`: readiness needs status_pointer or http_path"
            ))),
            (Some(_), None) => {
                if res.probe.is_none() {
                    return Err(invalid(format!(
                        "resource `{name}`: status_pointer readiness requires a probe command"
                    )));
                }
                if readiness.ready.is_empty() {
                    return Err(invalid(format!(
                        "resource `{name}`: readiness.ready must list at least one status"
                    )));
                }
                Ok(())
            }
            (None, Some(_)) => {
                let Some(output) = &readiness.http_output else {
                    return Err(invalid(format!(
                        "resource `{name}`: http_path readiness requires http_output"
                    )));
                };
                let resolvable = match output.split_once('.') {
                    Some((dep, dep_output)) => {
                        res.depends_on.iter().any(|d| d == dep)
                            && self
                                .resource(dep)
                                .is_some_and(|d| d.expose.iter().any(|e| e == dep_output))
                    }
                    None => res.outputs.contains_key(output),
                };
                if !resolvable {
                    return Err(invalid(format!(
                        "resource `{name}`: http_output `{output}` is neither an output nor an \
                         exposed output of a dependency"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Scaffold an orbit.toml reproducing the classic load-test setup:
    /// a GKE cluster, a global address, a metrics exporter, and an ingress
    /// publishing the exporter on that address.
    pub fn scaffold(name: &str, project: &str) -> Self {
        let project_args = |mut args: Vec<&str>| {
            args.extend(["--project", "{{ cluster.project }}"]);
            args.into_iter().map(String::from).collect::<Vec<_>>()
        };
        // kubectl runs against a kubeconfig owned by the session, fetched
        // on first use, so the operator's ~/.kube/config is never touched.
        let kube = |cmd: &str| {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "mkdir -p '{{{{ session_dir }}}}' && \
                     export KUBECONFIG='{{{{ session_dir }}}}/kubeconfig.yaml' && \
                     if [ ! -s \"$KUBECONFIG\" ]; then \
                     gcloud container clusters get-credentials {{{{ session_id }}}} \
                     --project {{{{ cluster.project }}}} --zone {{{{ cluster.zone }}}} >/dev/null || exit 1; \
                     fi && {cmd}"
                ),
            ]
        };

        let cluster = ResourceConfig {
            name: "cluster".to_string(),
            kind: ResourceKind::Cluster,
            depends_on: vec![],
            create: project_args(vec![
                "gcloud", "container", "clusters", "create", "{{ session_id }}",
                "--zone", "{{ cluster.zone }}",
                "--num-nodes", "{{ cluster.node_count }}",
                "--machine-type", "{{ cluster.machine_type }}",
                "--release-channel", "regular",
                "--scopes", "https://www.googleapis.com/auth/cloud-platform",
                "--async", "--format", "json",
            ]),
            destroy: project_args(vec![
                "gcloud", "container", "clusters", "delete", "{{ session_id }}",
                "--zone", "{{ cluster.zone }}", "--quiet",
            ]),
            probe: Some(project_args(vec![
                "gcloud", "container", "clusters", "describe", "{{ session_id }}",
                "--zone", "{{ cluster.zone }}", "--format", "json",
            ])),
            manifest: None,
            outputs: BTreeMap::new(),
            expose: vec![],
            not_found: vec![],
            permanent: vec!["PERMISSION_DENIED".to_string()],
            readiness: Some(ReadinessConfig {
                timeout: "20m".to_string(),
                interval: "15s".to_string(),
                status_pointer: Some("/status".to_string()),
                ready: vec!["RUNNING".to_string()],
                error: vec!["ERROR".to_string(), "DEGRADED".to_string()],
                http_path: None,
                http_output: None,
            }),
        };

        let address = ResourceConfig {
            name: "address".to_string(),
            kind: ResourceKind::NetworkAddress,
            depends_on: vec![],
            create: project_args(vec![
                "gcloud", "compute", "addresses", "create", "{{ session_id }}-ip",
                "--global", "--format", "json",
            ]),
            destroy: project_args(vec![
                "gcloud", "compute", "addresses", "delete", "{{ session_id }}-ip",
                "--global", "--quiet",
            ]),
            probe: Some(project_args(vec![
                "gcloud", "compute", "addresses", "describe", "{{ session_id }}-ip",
                "--global", "--format", "json",
            ])),
            manifest: None,
            outputs: BTreeMap::from([("address".to_string(), "/0/address".to_string())]),
            expose: vec!["address".to_string()],
            not_found: vec![],
            permanent: vec!["PERMISSION_DENIED".to_string()],
            readiness: Some(ReadinessConfig {
                timeout: "5m".to_string(),
                interval: "5s".to_string(),
                status_pointer: Some("/status".to_string()),
                ready: vec!["RESERVED".to_string(), "IN_USE".to_string()],
                error: vec![],
                http_path: None,
                http_output: None,
            }),
        };

        let exporter = ResourceConfig {
            name: "exporter".to_string(),
            kind: ResourceKind::Workload,
            depends_on: vec!["cluster".to_string()],
            create: kube("kubectl apply -f - -o json"),
            destroy: kube(
                "kubectl delete deployment,service {{ session_id }}-exporter --ignore-not-found",
            ),
            probe: Some(kube("kubectl get deployment {{ session_id }}-exporter -o json")),
            manifest: Some("templates/exporter.yaml".to_string()),
            outputs: BTreeMap::new(),
            expose: vec![],
            not_found: vec![],
            permanent: vec![],
            readiness: Some(ReadinessConfig {
                timeout: "10m".to_string(),
                interval: "10s".to_string(),
                status_pointer: Some("/status/readyReplicas".to_string()),
                ready: vec!["1".to_string()],
                error: vec![],
                http_path: None,
                http_output: None,
            }),
        };

        let ingress = ResourceConfig {
            name: "ingress".to_string(),
            kind: ResourceKind::Service,
            depends_on: vec![
                "cluster".to_string(),
                "address".to_string(),
                "exporter".to_string(),
            ],
            create: kube("kubectl apply -f - -o json"),
            destroy: kube("kubectl delete ingress {{ session_id }}-ingress --ignore-not-found"),
            probe: None,
            manifest: Some("templates/ingress.yaml".to_string()),
            outputs: BTreeMap::new(),
            expose: vec![],
            not_found: vec![],
            permanent: vec![],
            readiness: Some(ReadinessConfig {
                timeout: "15m".to_string(),
                interval: "15s".to_string(),
                status_pointer: None,
                ready: vec![],
                error: vec![],
                http_path: Some("/metrics".to_string()),
                http_output: Some("address.address".to_string()),
            }),
        };

        OrbitConfig {
            session: SessionConfig {
                name: name.to_string(),
            },
            cluster: ClusterConfig {
                project: project.to_string(),
                ..Default::default()
            },
            exporter: ExporterConfig::default(),
            vars: BTreeMap::new(),
            lifecycle: LifecycleConfig::default(),
            retry: RetryConfig::default(),
            resources: vec![cluster, address, exporter, ingress],
        }
    }
}

/// Manifest templates written next to a scaffolded orbit.toml.
pub const SCAFFOLD_TEMPLATES: &[(&str, &str)] = &[
    (
        "templates/exporter.yaml",
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ session_id }}-exporter
  labels:
    app: {{ session_id }}-exporter
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {{ session_id }}-exporter
  template:
    metadata:
      labels:
        app: {{ session_id }}-exporter
    spec:
      containers:
        - name: exporter
          image: {{ exporter.image }}
          ports:
            - containerPort: {{ exporter.port }}
---
apiVersion: v1
kind: Service
metadata:
  name: {{ session_id }}-exporter
spec:
  type: NodePort
  selector:
    app: {{ session_id }}-exporter
  ports:
    - port: 80
      targetPort: {{ exporter.port }}
"#,
    ),
    (
        "templates/ingress.yaml",
        r#"apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {{ session_id }}-ingress
  annotations:
    kubernetes.io/ingress.global-static-ip-name: {{ session_id }}-ip
spec:
  defaultBackend:
    service:
      name: {{ session_id }}-exporter
      port:
        number: 80
"#,
    ),
];

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn check_duration(field: &str, value: &str) -> ConfigResult<()> {
    match parse_duration(value) {
        Some(_) => Ok(()),
        None => Err(invalid(format!("{field}: `{value}` is not a duration"))),
    }
}
