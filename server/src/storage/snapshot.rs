//! Session checkpoint persistence
//!
//! In-memory engine state is the source of truth; checkpoints exist so
//! queued commands and device liveness survive a restart.

use crate::dispatch::engine::EngineSnapshot;
use crate::errors::ServerError;
use crate::filesys::file::File;

/// Load a checkpoint from file
pub async fn load_snapshot(snapshot_file: &File) -> Result<EngineSnapshot, ServerError> {
    snapshot_file.read_json().await
}

/// Save a checkpoint to file
pub async fn save_snapshot(
    snapshot_file: &File,
    snapshot: &EngineSnapshot,
) -> Result<(), ServerError> {
    snapshot_file.write_json_atomic(snapshot).await
}
