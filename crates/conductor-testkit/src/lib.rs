//! Shared test infrastructure for Conductor: in-memory port doubles,
//! fixture builders, and a loopback server helper.

pub mod doubles;
pub mod fixtures;
pub mod helpers;

pub use doubles::{InMemoryAgentRepository, InMemoryArtifactStorage, InMemoryResultRepository, InMemoryRunRepository};
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,conductor_testkit=debug")))
        .with_test_writer()
        .try_init();
}
