//! orbit-readiness — waits for freshly created resources to become usable.
//!
//! A [`ReadinessProbe`] pairs a [`ReadinessCheck`] with a timeout and a poll
//! interval. [`wait_ready`] polls until the check reports READY, reports
//! ERROR, the timeout elapses, or the cancellation signal fires.
//!
//! # Architecture
//!
//! ```text
//! wait_ready(probe, cancel)
//!   ├── check() → PENDING | READY | ERROR     (one atomic status read)
//!   ├── sleep(interval)                       (raced against deadline + cancel)
//!   └── Ok(polls) | ProbeFailed | ProbeTimeout | Cancelled
//! ```
//!
//! Cancellation uses a `tokio::sync::watch::Receiver<bool>`: flipping it to
//! `true` stops polling at once, including a check already in flight.

pub mod http_check;
pub mod poller;

pub use http_check::{HttpCheck, http_probe};
pub use poller::{
    ProbeStatus, ReadinessCheck, ReadinessError, ReadinessProbe, ReadinessResult, wait_cancelled,
    wait_ready,
};
