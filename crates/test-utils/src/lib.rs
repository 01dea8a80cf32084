pub mod builders;
pub mod fake_pool;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// How long a single controller run may take in tests.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(10);

static INIT: Once = Once::new();

/// Test subscriber, installed once per test binary.
///
/// Output goes through the test writer, so it only shows for failing tests.
/// `RUST_LOG=tcc=debug` adds the per-node gating and delivery events.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than [`RUN_TIMEOUT`].
///
/// A run that never returns almost always has a node (or the termination)
/// stuck behind a gate that no message will open. The debug log names every
/// node that left its gate, so the missing one is the culprit.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(RUN_TIMEOUT, f).await {
        Ok(out) => out,
        Err(_) => panic!(
            "run still pending after {RUN_TIMEOUT:?}: some gate never opened \
             (rerun with RUST_LOG=tcc=debug to see which tasks ran)"
        ),
    }
}
