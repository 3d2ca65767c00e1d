//! Server state

use std::sync::Arc;

use crate::dispatch::engine::DispatchEngine;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: Arc<DispatchEngine>,
}

impl ServerState {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }
}
