//! orbit-state — durable session state for Orbit.
//!
//! Backed by [redb](https://docs.rs/redb). Every session and every resource
//! record is committed in its own write transaction, so a process that
//! crashes mid-provisioning leaves behind exactly what it had created and a
//! later `orbit down` can replay it.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Resource records are keyed `{session_id}:{ordinal:010}`, so a prefix scan
//! returns a session's records in creation order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).
//! The `ResourceRegistry` layers the append-only ordering rules on top.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{RegistryError, RegistryResult, StateError, StateResult};
pub use registry::ResourceRegistry;
pub use store::StateStore;
pub use types::*;
