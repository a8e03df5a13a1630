//! Remote batch provider.
//!
//! [`BatchProvider`] is the seam between the lifecycle manager and the
//! external API. [`OpenAiBatchProvider`] talks HTTP; [`InMemoryBatchProvider`]
//! is a scriptable double that counts calls.

pub mod in_memory;
pub mod openai;
pub mod r#trait;

pub use in_memory::{CallCounts, InMemoryBatchProvider, Operation};
pub use openai::{OpenAiBatchProvider, DEFAULT_BASE_URL};
pub use r#trait::{
    BatchError, BatchProvider, CreateBatch, ProviderError, RemoteBatch, CHAT_COMPLETIONS_ENDPOINT,
    COMPLETION_WINDOW,
};
