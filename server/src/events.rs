//! Reply event stream
//!
//! Every accepted reply record is published for downstream consumers
//! (attendance/user data processing lives outside this crate). The
//! channel is broadcast with bounded capacity; a consumer that falls
//! behind loses the oldest events, never the engine's own state.

use tokio::sync::broadcast;

use crate::protocol::codec::ReplyRecord;

/// An accepted reply, attributed to the device that sent it
#[derive(Debug, Clone)]
pub struct ReplyEvent {
    pub device_sn: String,
    pub record: ReplyRecord,
}

/// Create the reply event channel
pub fn channel(capacity: usize) -> (broadcast::Sender<ReplyEvent>, broadcast::Receiver<ReplyEvent>) {
    broadcast::channel(capacity)
}
