//! Template renderer — turns resource descriptors into provisioning artifacts.
//!
//! Uses minijinja with the default Jinja syntax (`{{ var }}`) and strict
//! undefined handling, so a typo in a variable name fails the whole plan
//! before anything is created instead of producing a half-rendered command.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde_json::json;
use thiserror::Error;

use crate::config::{OrbitConfig, ResourceConfig};
use crate::types::{ProbeArtifact, ResourceArtifact};

/// Patterns treated as "already gone" for every resource in addition to
/// the ones configured per resource.
pub const DEFAULT_NOT_FOUND: &[&str] = &["not found", "NotFound", "could not be found"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to render {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Variables available to every template.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    value: serde_json::Value,
}

impl TemplateVars {
    /// Build the variable set for one session.
    ///
    /// Exposes `session_id`, `session_dir`, `session.name`, `cluster.*`,
    /// `exporter.*`, and `vars.*`. `session_dir` is a scratch directory
    /// owned by the session (session-scoped kubeconfig and the like).
    pub fn for_session(config: &OrbitConfig, session_id: &str, session_dir: &Path) -> Self {
        let session_dir = session_dir.display().to_string();
        Self {
            value: json!({
                "session_id": session_id,
                "session_dir": session_dir,
                "session": { "id": session_id, "name": config.session.name, "dir": session_dir },
                "cluster": config.cluster,
                "exporter": config.exporter,
                "vars": config.vars,
            }),
        }
    }

    /// Arbitrary variables, mostly useful in tests.
    pub fn from_value(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// The same variables with `resource.name` and `resource.kind` set.
    fn for_resource(&self, resource: &ResourceConfig) -> serde_json::Value {
        let mut value = self.value.clone();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "resource".to_string(),
                json!({ "name": resource.name, "kind": resource.kind }),
            );
        }
        value
    }
}

/// Stateless renderer over a strict minijinja environment.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render one template string.
    pub fn render(&self, name: &str, template: &str, vars: &serde_json::Value) -> TemplateResult<String> {
        self.env
            .render_str(template, vars)
            .map_err(|source| TemplateError::Render {
                name: name.to_string(),
                source,
            })
    }

    /// Render a resource descriptor into a concrete artifact.
    ///
    /// `base_dir` resolves relative manifest paths (the config file's
    /// directory).
    pub fn render_resource(
        &self,
        resource: &ResourceConfig,
        vars: &TemplateVars,
        base_dir: &Path,
    ) -> TemplateResult<ResourceArtifact> {
        let ctx = vars.for_resource(resource);
        let name = resource.name.as_str();

        let create = self.render_argv(&format!("{name}.create"), &resource.create, &ctx)?;
        let destroy = self.render_argv(&format!("{name}.destroy"), &resource.destroy, &ctx)?;

        let probe = match (&resource.probe, &resource.readiness) {
            (Some(command), readiness) => Some(ProbeArtifact {
                command: self.render_argv(&format!("{name}.probe"), command, &ctx)?,
                status_pointer: readiness
                    .as_ref()
                    .and_then(|r| r.status_pointer.clone())
                    .unwrap_or_else(|| "/status".to_string()),
                ready: readiness.as_ref().map(|r| r.ready.clone()).unwrap_or_default(),
                error: readiness.as_ref().map(|r| r.error.clone()).unwrap_or_default(),
            }),
            (None, _) => None,
        };

        let manifest = match &resource.manifest {
            Some(rel) => {
                let path = base_dir.join(rel);
                let source = std::fs::read_to_string(&path)
                    .map_err(|source| TemplateError::Read { path: path.clone(), source })?;
                Some(self.render(&format!("{name}.manifest"), &source, &ctx)?)
            }
            None => None,
        };

        let mut not_found: Vec<String> = DEFAULT_NOT_FOUND.iter().map(|s| s.to_string()).collect();
        not_found.extend(resource.not_found.iter().cloned());

        Ok(ResourceArtifact {
            name: resource.name.clone(),
            kind: resource.kind,
            create,
            destroy,
            probe,
            manifest,
            outputs: resource.outputs.clone(),
            not_found,
            permanent: resource.permanent.clone(),
        })
    }

    fn render_argv(
        &self,
        name: &str,
        argv: &[String],
        ctx: &serde_json::Value,
    ) -> TemplateResult<Vec<String>> {
        argv.iter().map(|arg| self.render(name, arg, ctx)).collect()
    }
}
