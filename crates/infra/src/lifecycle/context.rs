use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::normalize::MalformedPolicy;
use crate::provider::BatchProvider;
use crate::status_store::StatusStore;

/// Everything a lifecycle manager needs from its environment.
///
/// Cheap to clone; one context can drive any number of managers.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn StatusStore>,
    pub provider: Arc<dyn BatchProvider>,
    pub output_dir: PathBuf,
    pub malformed_policy: MalformedPolicy,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn StatusStore>,
        provider: Arc<dyn BatchProvider>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            provider,
            output_dir: output_dir.into(),
            malformed_policy: MalformedPolicy::default(),
        }
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl core::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobContext")
            .field("output_dir", &self.output_dir)
            .field("malformed_policy", &self.malformed_policy)
            .finish_non_exhaustive()
    }
}
