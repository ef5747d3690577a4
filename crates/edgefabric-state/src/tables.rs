//! redb table definitions for the authority store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized).

use redb::TableDefinition;

/// Authority copies of synchronized records keyed by logical key.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Terminal task outcomes keyed by task id.
pub const TASK_OUTCOMES: TableDefinition<&str, &[u8]> = TableDefinition::new("task_outcomes");
