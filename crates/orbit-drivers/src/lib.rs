//! orbit-drivers — provisioning drivers that shell out to provider CLIs.
//!
//! Each resource kind is handled by a [`CommandDriver`] that runs the
//! rendered `create` / `destroy` / `probe` argv of a resource. Everything
//! needed to destroy or probe a resource later is captured in its provider
//! handle, so a fresh process can tear a session down from the durable
//! registry alone.

pub mod command;
pub mod handle;
pub mod process;

pub use command::{CommandDriver, command_drivers};
pub use handle::CommandHandle;
pub use process::{CommandOutput, RunError, run_command};
