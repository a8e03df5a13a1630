//! Infrastructure layer: status store, remote provider, lifecycle manager,
//! result normalization and configuration.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod provider;
pub mod status_store;
pub mod tracker;

mod integration_tests;

pub use config::{BatchConfig, ConfigError};
pub use error::{ErrorKind, LifecycleError, LifecycleResult};
pub use lifecycle::{
    discover_shards, BatchJobManager, CancelOutcome, CancelReport, FetchReport, JobContext,
    PollReport, Shard,
};
pub use normalize::{normalize, MalformedLine, MalformedPolicy, NormalizedRow, NormalizedTable};
pub use provider::{BatchProvider, InMemoryBatchProvider, OpenAiBatchProvider, ProviderError};
pub use status_store::{InMemoryStatusStore, SqliteStatusStore, StatusStore, StatusStoreError};
pub use tracker::{wait_for_terminal, PollSchedule};
