//! Tracing and logging (shared setup).

/// Initialize process-wide tracing with defaults.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{init_with, LogFormat, ObservabilityConfig, ObservabilityError};
