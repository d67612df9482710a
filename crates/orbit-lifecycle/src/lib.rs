//! orbit-lifecycle — provisions an ephemeral cluster and guarantees it is torn down.
//!
//! The [`Orchestrator`] executes a [`Plan`] against a [`LifecycleSession`]:
//! each step is created through the [`ResourceDriver`] for its kind,
//! committed to the session's durable registry, then gated on readiness.
//! Whatever happens (success, a failed step, cancellation, a crash and a
//! later `down`), teardown is driven from the registry alone.
//!
//! # Components
//!
//! - **`driver`** — `ResourceDriver` capability `{create, destroy, probe}` and `DriverSet` dispatch by kind
//! - **`plan`** — rendered, dependency-checked provisioning plan
//! - **`session`** — `LifecycleSession`, the explicitly passed session handle
//! - **`orchestrator`** — provisioning state machine
//! - **`teardown`** — reverse-order, failure-isolated destruction
//! - **`retry`** — bounded exponential backoff for transient provider errors
//!
//! # State machine
//!
//! ```text
//! PROVISIONING ──► READY ──► TEARING_DOWN ──► DESTROYED
//!      │                          ▲      └──► FAILED (leak report)
//!      └──► FAILED ───────────────┘
//! ```

pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod retry;
pub mod session;
pub mod teardown;

pub use driver::{Created, DriverError, DriverProbe, DriverSet, ResourceDriver};
pub use error::{LifecycleError, LifecycleResult};
pub use orchestrator::{LifecycleSettings, Orchestrator};
pub use plan::{Plan, PlanStep, ReadinessMode, ReadinessSpec};
pub use retry::{RetryPolicy, retry_transient};
pub use session::{LifecycleSession, new_session_id};
pub use teardown::{TeardownEngine, TeardownReport};
