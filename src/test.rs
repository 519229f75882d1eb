#![cfg(any(test, feature = "test"))]
//! Test support: an in-memory backend, and views and listeners that record what they are told.
pub mod backend;

pub use backend::CallCounts;
pub use backend::MemoryBackend;
pub use backend::MemoryBackendError;
pub use recorder::ListenerEvent;
pub use recorder::ModelEvent;
pub use recorder::RecordingListener;
pub use recorder::RecordingModel;

/// Installs a log subscriber writing to the test output. `RUST_LOG` controls the verbosity. Safe to call from every
/// test.
#[cfg(feature = "test")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
