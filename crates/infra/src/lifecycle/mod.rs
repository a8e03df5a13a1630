//! Batch job lifecycle: context, manager, reports and shard discovery.

pub mod context;
pub mod manager;
pub mod report;
pub mod shard;

pub use context::JobContext;
pub use manager::BatchJobManager;
pub use report::{CancelOutcome, CancelReport, FetchReport, PollReport};
pub use shard::{discover_shards, Shard};
