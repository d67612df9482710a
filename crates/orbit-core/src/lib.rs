//! orbit-core — shared types for the Orbit ephemeral cluster tool.
//!
//! Holds the domain types persisted by the state store (resource records,
//! session states, teardown outcomes), the `orbit.toml` parser, and the
//! template renderer that turns resource descriptors into concrete
//! provisioning artifacts.

pub mod config;
pub mod duration;
pub mod template;
pub mod types;

pub use config::{ConfigError, OrbitConfig, ReadinessConfig, ResourceConfig, RetryConfig};
pub use duration::parse_duration;
pub use template::{TemplateError, TemplateRenderer, TemplateVars};
pub use types::*;
