//! Retry/expiry sweeper worker
//!
//! Periodic tick over all device sessions applying the dispatch policy:
//! unanswered commands are re-offered or abandoned, expired commands
//! time out. Deadline math happens inside the engine against its
//! injected clock, so the worker itself carries no time logic.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::dispatch::engine::DispatchEngine;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Tick interval
    pub interval: Duration,

    /// Initial delay before the first tick
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the sweeper worker
pub async fn run<S, F>(
    options: &Options,
    engine: &DispatchEngine,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    // Initial delay
    sleep_fn(options.initial_delay).await;

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with sweep
            }
        }

        let stats = engine.sweep().await;
        if stats.is_empty() {
            debug!("Sweep pass found nothing due");
        } else {
            info!(
                "Sweep pass: {} re-offered, {} timed out, {} abandoned",
                stats.reoffered, stats.timed_out, stats.abandoned
            );
        }
    }
}
