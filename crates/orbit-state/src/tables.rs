//! redb table definitions for the Orbit state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Session metadata keyed by `{session_id}`.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Resource records keyed by `{session_id}:{ordinal:010}`.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
