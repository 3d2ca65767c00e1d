//! iclockd Library
//!
//! Core modules for the iclock push-protocol dispatch server.

pub mod app;
pub mod clock;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod logs;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
