//! Shared helpers for checkdag's integration tests: config builders, fake
//! work and probes, and a recording group executor.

pub mod builders;
pub mod fake_executor;
pub mod fakes;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Real-time limit applied by [`with_timeout`].
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a test-captured tracing subscriber once per test binary.
///
/// Output shows up for failing tests only, or with `-- --nocapture`.
/// `RUST_LOG` picks the level and defaults to `info`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test if `f` takes longer than [`TEST_TIMEOUT`].
///
/// Do not combine with paused tokio time and long sleeps: the limit is
/// measured on the same clock.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test timed out after {TEST_TIMEOUT:?}"))
}
