//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::clock::Clock;
use crate::dispatch::engine::DispatchEngine;
use crate::errors::ServerError;
use crate::filesys::file::File;
use crate::storage::snapshot::{load_snapshot, save_snapshot};

/// Main application state
pub struct AppState {
    /// Dispatch engine
    pub engine: Arc<DispatchEngine>,

    /// Session checkpoint file
    pub snapshot_file: Arc<File>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Creates the storage layout and rebuilds sessions from the last
    /// checkpoint when one exists; a corrupt checkpoint starts the
    /// engine empty rather than failing startup.
    pub async fn init(options: &AppOptions, clock: Arc<dyn Clock>) -> Result<Self, ServerError> {
        info!("Initializing application state...");

        options.storage.layout.setup().await?;
        let snapshot_file = Arc::new(options.storage.layout.snapshot_file());

        let engine = Arc::new(DispatchEngine::new(options.dispatch.clone(), clock));

        if snapshot_file.exists().await {
            match load_snapshot(&snapshot_file).await {
                Ok(snapshot) => engine.restore(snapshot).await,
                Err(e) => {
                    warn!("Unable to read session checkpoint, starting empty: {}", e);
                }
            }
        }

        Ok(Self {
            engine,
            snapshot_file,
        })
    }

    /// Shutdown application state, writing a final checkpoint
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("Writing final session checkpoint...");
        let snapshot = self.engine.snapshot().await;
        save_snapshot(&self.snapshot_file, &snapshot).await
    }
}
