//! Readiness poller.
//!
//! Polls a resource's status at a fixed interval until it is READY, ERROR,
//! the probe times out, or polling is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Status reported by a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Not ready yet; poll again.
    Pending,
    /// The resource can accept traffic or workloads.
    Ready,
    /// The resource reached a state it will not recover from.
    Error(String),
}

/// One atomic status read of a resource.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn check(&self) -> ProbeStatus;
}

/// A transient readiness probe for one resource.
#[derive(Clone)]
pub struct ReadinessProbe {
    pub resource_id: String,
    pub check: Arc<dyn ReadinessCheck>,
    pub timeout: Duration,
    pub interval: Duration,
}

impl std::fmt::Debug for ReadinessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProbe")
            .field("resource_id", &self.resource_id)
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("`{resource_id}` did not become ready within {timeout:?}")]
    ProbeTimeout { resource_id: String, timeout: Duration },

    #[error("`{resource_id}` failed readiness: {message}")]
    ProbeFailed { resource_id: String, message: String },

    #[error("readiness polling for `{resource_id}` was cancelled")]
    Cancelled { resource_id: String },
}

pub type ReadinessResult<T> = Result<T, ReadinessError>;

/// Resolves once `cancel` carries `true`.
///
/// Never resolves if the sender is dropped without cancelling.
pub async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Poll `probe` until it is ready. Returns the number of polls made.
///
/// The deadline and the cancellation signal are raced against both the
/// in-flight check and the sleep between polls, so neither a slow check nor
/// a long interval delays a timeout or cancellation.
pub async fn wait_ready(
    probe: &ReadinessProbe,
    mut cancel: watch::Receiver<bool>,
) -> ReadinessResult<u32> {
    let deadline = Instant::now() + probe.timeout;
    let resource_id = probe.resource_id.as_str();
    let cancelled = || ReadinessError::Cancelled {
        resource_id: resource_id.to_string(),
    };
    let timed_out = || ReadinessError::ProbeTimeout {
        resource_id: resource_id.to_string(),
        timeout: probe.timeout,
    };

    let mut polls = 0u32;
    loop {
        let status = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => return Err(cancelled()),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            status = probe.check.check() => status,
        };
        polls += 1;

        match status {
            ProbeStatus::Ready => {
                debug!(resource = %resource_id, polls, "resource ready");
                return Ok(polls);
            }
            ProbeStatus::Error(message) => {
                return Err(ReadinessError::ProbeFailed {
                    resource_id: resource_id.to_string(),
                    message,
                });
            }
            ProbeStatus::Pending => {
                debug!(resource = %resource_id, polls, "resource not ready yet");
            }
        }

        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => return Err(cancelled()),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            _ = tokio::time::sleep(probe.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed script of statuses, then repeats the last one.
    struct Scripted {
        script: Mutex<Vec<ProbeStatus>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut script: Vec<ProbeStatus>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ReadinessCheck for Scripted {
        async fn check(&self) -> ProbeStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop().unwrap()
            } else {
                script.last().cloned().unwrap_or(ProbeStatus::Pending)
            }
        }
    }

    /// A check that never answers.
    struct Hangs;

    #[async_trait]
    impl ReadinessCheck for Hangs {
        async fn check(&self) -> ProbeStatus {
            std::future::pending().await
        }
    }

    fn probe(check: Arc<dyn ReadinessCheck>, timeout_secs: u64) -> ReadinessProbe {
        ReadinessProbe {
            resource_id: "cluster".to_string(),
            check,
            timeout: Duration::from_secs(timeout_secs),
            interval: Duration::from_secs(1),
        }
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_pending_polls() {
        let check = Scripted::new(vec![
            ProbeStatus::Pending,
            ProbeStatus::Pending,
            ProbeStatus::Ready,
        ]);
        let polls = wait_ready(&probe(check.clone(), 60), never_cancelled())
            .await
            .unwrap();
        assert_eq!(polls, 3);
        assert_eq!(check.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_propagated_verbatim() {
        let check = Scripted::new(vec![
            ProbeStatus::Pending,
            ProbeStatus::Error("status DEGRADED".to_string()),
        ]);
        let err = wait_ready(&probe(check, 60), never_cancelled())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReadinessError::ProbeFailed {
                resource_id: "cluster".to_string(),
                message: "status DEGRADED".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_ready() {
        let check = Scripted::new(vec![ProbeStatus::Pending]);
        let started = Instant::now();
        let err = wait_ready(&probe(check, 5), never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::ProbeTimeout { .. }));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_interrupts_a_hung_check() {
        let err = wait_ready(&probe(Arc::new(Hangs), 3), never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::ProbeTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling_promptly() {
        let (tx, rx) = watch::channel(false);
        let check = Scripted::new(vec![ProbeStatus::Pending]);
        let probe = probe(check.clone(), 3600);

        let handle = tokio::spawn(async move { wait_ready(&probe, rx).await });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ReadinessError::Cancelled { .. }));
        assert!(check.calls.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_never_polls() {
        let (tx, rx) = watch::channel(true);
        let check = Scripted::new(vec![ProbeStatus::Ready]);
        let err = wait_ready(&probe(check.clone(), 60), rx).await.unwrap_err();
        drop(tx);
        assert!(matches!(err, ReadinessError::Cancelled { .. }));
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let check = Scripted::new(vec![ProbeStatus::Pending, ProbeStatus::Ready]);
        assert_eq!(wait_ready(&probe(check, 60), rx).await.unwrap(), 2);
    }
}
