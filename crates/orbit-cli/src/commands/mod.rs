pub mod down;
pub mod init;
pub mod list;
pub mod prune;
pub mod status;
pub mod up;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, warn};
use orbit_core::{ConfigError, TemplateError, TeardownResult};
use orbit_lifecycle::{LifecycleError, TeardownReport};
use orbit_state::StateStore;

/// Process exit status of an `orbit` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success = 0,
    /// Provisioning failed; its teardown left nothing behind.
    ProvisionFailed = 1,
    /// A teardown left resources behind.
    Leaked = 2,
    /// Bad arguments, config, or templates.
    Usage = 3,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// An operator mistake rather than a runtime failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Map an error to its exit code.
pub fn classify(err: &anyhow::Error) -> Exit {
    for cause in err.chain() {
        if cause.is::<ConfigError>() || cause.is::<TemplateError>() || cause.is::<UsageError>() {
            return Exit::Usage;
        }
        if let Some(e) = cause.downcast_ref::<LifecycleError>() {
            // Teardown did not finish, so resources may still exist.
            if matches!(e, LifecycleError::TeardownFailed { .. }) {
                return Exit::Leaked;
            }
            match e.root_cause() {
                LifecycleError::Template(_)
                | LifecycleError::DependencyViolation { .. }
                | LifecycleError::DuplicateStep(_)
                | LifecycleError::SessionNotFound(_) => return Exit::Usage,
                _ => {}
            }
        }
    }
    Exit::ProvisionFailed
}

/// Open (creating if needed) the session database under `state_dir`.
pub fn open_store(state_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;
    let path = state_dir.join("orbit.redb");
    StateStore::open(&path).with_context(|| format!("opening session database {}", path.display()))
}

/// Scratch directory owned by one session (its kubeconfig lives here).
pub fn session_dir(state_dir: &Path, session_id: &str) -> PathBuf {
    state_dir.join("sessions").join(session_id)
}

/// Remove a session's scratch directory once nothing of it is left.
pub fn remove_session_dir(state_dir: &Path, session_id: &str) {
    let dir = session_dir(state_dir, session_id);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => debug!(session = %session_id, dir = %dir.display(), "session directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(session = %session_id, dir = %dir.display(), error = %e, "could not remove session directory"),
    }
}

/// Print a teardown report in text form.
pub fn print_teardown(report: &TeardownReport) {
    println!("teardown: {}", report.summary());
    for outcome in &report.outcomes {
        let marker = match outcome.result {
            TeardownResult::Destroyed => "✓",
            TeardownResult::RetryableFailure => "…",
            TeardownResult::PermanentFailure => "✗",
        };
        match &outcome.error {
            Some(error) => println!("  {marker} {} ({}): {error}", outcome.resource_id, outcome.kind),
            None => println!("  {marker} {} ({})", outcome.resource_id, outcome.kind),
        }
    }
    if !report.is_clean() {
        println!("leaked resources need attention; run `orbit down` again or remove them by hand:");
        for leak in &report.leaks {
            println!("  {} ({}) {}", leak.resource_id, leak.kind, leak.provider_handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_errors_are_usage_errors() {
        let err = anyhow::Error::new(ConfigError::Invalid("bad".into())).context("loading orbit.toml");
        assert_eq!(classify(&err), Exit::Usage);
        assert_eq!(classify(&anyhow::Error::new(UsageError("no".into()))), Exit::Usage);
    }

    #[test]
    fn aborted_template_failure_is_a_usage_error() {
        let err = anyhow::Error::new(LifecycleError::Aborted {
            cause: Box::new(LifecycleError::SessionNotFound("s".into())),
            teardown: TeardownReport::default(),
        });
        assert_eq!(classify(&err), Exit::Usage);
    }

    #[test]
    fn incomplete_teardown_exits_as_leaked() {
        let err = anyhow::Error::new(LifecycleError::TeardownFailed {
            cause: Box::new(LifecycleError::Cancelled),
            teardown_error: Box::new(LifecycleError::SessionNotFound("s".into())),
        })
        .context("provisioning session s");
        assert_eq!(classify(&err), Exit::Leaked);
    }

    #[test]
    fn runtime_failures_exit_one() {
        let err = anyhow::Error::new(LifecycleError::ProbeTimeout {
            resource_id: "cluster".into(),
            timeout: Duration::from_secs(60),
        });
        assert_eq!(classify(&err), Exit::ProvisionFailed);
    }

    #[test]
    fn session_dir_is_removed_with_its_kubeconfig() {
        let state = tempfile::tempdir().unwrap();
        let dir = session_dir(state.path(), "lt-7");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("kubeconfig.yaml"), "apiVersion: v1\n").unwrap();

        remove_session_dir(state.path(), "lt-7");
        assert!(!dir.exists());
        // Already gone is fine.
        remove_session_dir(state.path(), "lt-7");
    }

    #[test]
    fn store_is_created_under_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("nested/.orbit");
        open_store(&state_dir).unwrap();
        assert!(state_dir.join("orbit.redb").exists());
    }
}
