//! `batchline-core` — domain building blocks for batch job tracking.
//!
//! This crate contains **pure domain** primitives (no IO): identifiers, the
//! status vocabulary, lifecycle events, status records and the fold that turns
//! a job's append-only history into its current state.

pub mod error;
pub mod event;
pub mod id;
pub mod progress;
pub mod record;
pub mod state;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use event::{JobEvent, RemoteOperation, CANCELLED_BY_USER};
pub use id::{BatchId, FileId, JobId};
pub use progress::RequestCounts;
pub use record::{NewStatusRecord, StatusRecord};
pub use state::{JobState, Stage};
pub use status::BatchStatus;
