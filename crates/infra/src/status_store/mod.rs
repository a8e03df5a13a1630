//! Append-only job status log.
//!
//! Every lifecycle transition inserts a row; nothing is updated in place. A
//! job's current state is derived by folding its rows (see
//! `batchline_core::JobState`).

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryStatusStore;
pub use sqlite::SqliteStatusStore;
pub use r#trait::{StatusStore, StatusStoreError};
