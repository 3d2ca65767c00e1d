//! Session checkpoint worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::dispatch::engine::DispatchEngine;
use crate::filesys::file::File;
use crate::storage::snapshot::save_snapshot;

/// Checkpoint worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Checkpoint interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the checkpoint worker
pub async fn run<S, F>(
    options: &Options,
    engine: &DispatchEngine,
    snapshot_file: &File,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Checkpoint worker starting...");

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Checkpoint worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with checkpoint
            }
        }

        let snapshot = engine.snapshot().await;
        match save_snapshot(snapshot_file, &snapshot).await {
            Ok(()) => {
                debug!(
                    "Checkpointed {} device session(s) to {}",
                    snapshot.sessions.len(),
                    snapshot_file.path().display()
                );
            }
            Err(e) => {
                // Keep running; in-memory state stays authoritative
                error!("Failed to write session checkpoint: {}", e);
            }
        }
    }
}
