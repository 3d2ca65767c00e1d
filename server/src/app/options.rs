//! Application configuration options

use std::time::Duration;

use crate::dispatch::engine::DispatchOptions;
use crate::storage::layout::StorageLayout;
use crate::workers::{checkpoint, sweeper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// HTTP server configuration
    pub server: ServerOptions,

    /// Dispatch engine configuration
    pub dispatch: DispatchOptions,

    /// Enable the retry/expiry sweeper worker
    pub enable_sweeper: bool,

    /// Enable periodic session checkpoints
    pub enable_checkpoint: bool,

    /// Sweeper worker options
    pub sweeper: sweeper::Options,

    /// Checkpoint worker options
    pub checkpoint: checkpoint::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            server: ServerOptions::default(),
            dispatch: DispatchOptions::default(),
            enable_sweeper: true,
            enable_checkpoint: true,
            sweeper: sweeper::Options::default(),
            checkpoint: checkpoint::Options::default(),
        }
    }
}

/// Lifecycle options for the server
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}
