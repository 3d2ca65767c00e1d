//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::clock::{Clock, SystemClock};
use crate::errors::ServerError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{checkpoint, sweeper};

/// Run the iclock server
pub async fn run(
    server_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    info!("Initializing iclockd {}...", server_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(options.lifecycle.clone());

    // Initialize the app state, workers, and HTTP server
    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start server: {}", e);
        let _ = shutdown_tx.send(());
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    // Run until told to stop
    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    // Shutdown
    let _ = shutdown_tx.send(());
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ServerError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let app_state = Arc::new(AppState::init(options, clock).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if options.enable_sweeper {
        init_sweeper_worker(
            options.sweeper.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    if options.enable_checkpoint {
        init_checkpoint_worker(
            options.checkpoint.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    init_http_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(())
}

async fn init_sweeper_worker(
    options: sweeper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    info!("Initializing sweeper worker...");

    let engine = app_state.engine.clone();

    let sweeper_handle = tokio::spawn(async move {
        sweeper::run(
            &options,
            engine.as_ref(),
            |wait| tokio::time::sleep(wait),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_sweeper_worker_handle(sweeper_handle)?;
    Ok(())
}

async fn init_checkpoint_worker(
    options: checkpoint::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    info!("Initializing checkpoint worker...");

    let engine = app_state.engine.clone();
    let snapshot_file = app_state.snapshot_file.clone();

    let checkpoint_handle = tokio::spawn(async move {
        checkpoint::run(
            &options,
            engine.as_ref(),
            snapshot_file.as_ref(),
            |wait| tokio::time::sleep(wait),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_checkpoint_worker_handle(checkpoint_handle)?;
    Ok(())
}

async fn init_http_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.engine.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), ServerError>>>,
    sweeper_worker_handle: Option<JoinHandle<()>>,
    checkpoint_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(lifecycle_options: LifecycleOptions) -> Self {
        Self {
            lifecycle_options,
            app_state: None,
            server_handle: None,
            sweeper_worker_handle: None,
            checkpoint_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ServerError> {
        if self.app_state.is_some() {
            return Err(ServerError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_sweeper_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ServerError> {
        if self.sweeper_worker_handle.is_some() {
            return Err(ServerError::ShutdownError("sweeper_handle already set".to_string()));
        }
        self.sweeper_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_checkpoint_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), ServerError> {
        if self.checkpoint_worker_handle.is_some() {
            return Err(ServerError::ShutdownError("checkpoint_handle already set".to_string()));
        }
        self.checkpoint_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ServerError>>,
    ) -> Result<(), ServerError> {
        if self.server_handle.is_some() {
            return Err(ServerError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ServerError> {
        info!("Shutting down iclockd...");

        // 1. Sweeper worker
        if let Some(handle) = self.sweeper_worker_handle.take() {
            handle.await.map_err(|e| ServerError::ShutdownError(e.to_string()))?;
        }

        // 2. Checkpoint worker
        if let Some(handle) = self.checkpoint_worker_handle.take() {
            handle.await.map_err(|e| ServerError::ShutdownError(e.to_string()))?;
        }

        // 3. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ServerError::ShutdownError(e.to_string()))??;
        }

        // 4. App state (final checkpoint)
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
