use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::{Context, Result};
use loopload::{LoadContext, LoopLoad};

use crate::config::Config;

/// The value kept warm by the demo.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Generation {
    /// Number of successful loads so far.
    pub number: u64,
    pub loaded_at: Option<SystemTime>,
}

/// Builds the demo slot. Every load produces the next generation.
pub fn generation_slot(config: &Config) -> LoopLoad<Generation> {
    let counter = Arc::new(AtomicU64::new(0));
    LoopLoad::new(
        "demo_generation",
        move |_ctx: LoadContext| {
            let counter = Arc::clone(&counter);
            async move {
                let number = counter.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(number, "Producing new generation");
                anyhow::Ok(Generation {
                    number,
                    loaded_at: Some(SystemTime::now()),
                })
            }
        },
        config.slot.clone(),
    )
}

/// Starts the demo slot and reports its value until a shutdown signal arrives.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loopload-demo")
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async move {
        let slot = generation_slot(&config);
        slot.start(LoadContext::new().with_timeout(config.startup_timeout))
            .await
            .context("failed to load the initial value")?;

        let mut report = tokio::time::interval(config.report_interval);
        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result.context("failed to listen for shutdown signals")?;
                    tracing::info!("Shutdown signal received");
                    break;
                }
                _ = report.tick() => {
                    let current = slot.get(&LoadContext::new());
                    tracing::info!(
                        generation = current.number,
                        stats = ?slot.stats(),
                        "Current value"
                    );
                }
            }
        }

        slot.close().await;
        Ok(())
    })
}

/// Waits for a termination signal.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
