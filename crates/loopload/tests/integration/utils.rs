use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use loopload::LoadContext;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Installs a logger whose output is captured by the test runner.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("loopload=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts loader invocations, handing the 1-based call number to `f`.
pub fn numbered<T, F, Fut>(
    calls: &Arc<AtomicUsize>,
    f: F,
) -> impl Fn(LoadContext) -> Fut + Send + Sync + 'static
where
    F: Fn(usize, LoadContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let calls = Arc::clone(calls);
    move |ctx| f(calls.fetch_add(1, Ordering::SeqCst) + 1, ctx)
}
