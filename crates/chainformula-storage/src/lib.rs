//! chainformula-storage — pluggable storage backends for ChainFormula.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Every backend implements both `EventStore` (history-aware event reads)
//! and `ComputationStore` (computation persistence) from
//! `chainformula-core`.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
