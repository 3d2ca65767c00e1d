//! Command lifecycle state machine

use serde::{Deserialize, Serialize};

/// Lifecycle state of an issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Queued, not yet delivered
    Created,

    /// Delivered in a poll response, awaiting a reply
    Sent,

    /// Device replied with the success code
    Acknowledged,

    /// Device replied with a nonzero result code
    DeviceReportedError,

    /// Deadline elapsed with no reply
    TimedOut,

    /// Delivery attempts exhausted
    Abandoned,
}

impl CommandState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Acknowledged
                | CommandState::DeviceReportedError
                | CommandState::TimedOut
                | CommandState::Abandoned
        )
    }
}

/// Lifecycle event
#[derive(Debug, Clone)]
pub enum CommandEvent {
    /// Delivered to the device in a poll response
    Offer,

    /// Device reported a result code
    Reply(i64),

    /// Re-offer window elapsed without a reply
    ReOffer,

    /// Deadline elapsed without a reply
    Expire,

    /// Delivery attempts exhausted
    GiveUp,
}

/// Compute the successor state for an event
///
/// Terminal states accept no events; duplicate replies are filtered out
/// by the queue before they reach the state machine.
pub fn next_state(state: CommandState, event: &CommandEvent) -> Result<CommandState, String> {
    let new_state = match (state, event) {
        // From Created
        (CommandState::Created, CommandEvent::Offer) => CommandState::Sent,
        (CommandState::Created, CommandEvent::Expire) => CommandState::TimedOut,

        // From Sent
        (CommandState::Sent, CommandEvent::Reply(0)) => CommandState::Acknowledged,
        (CommandState::Sent, CommandEvent::Reply(_)) => CommandState::DeviceReportedError,
        (CommandState::Sent, CommandEvent::ReOffer) => CommandState::Created,
        (CommandState::Sent, CommandEvent::Expire) => CommandState::TimedOut,
        (CommandState::Sent, CommandEvent::GiveUp) => CommandState::Abandoned,

        // Invalid transitions
        (state, event) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
        }
    };

    Ok(new_state)
}
