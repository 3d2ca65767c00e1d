//! Issued command record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::fsm::{self, CommandEvent, CommandState};
use crate::protocol::commands::CmdType;

/// Command id, unique and monotonically increasing within one device's queue
pub type CommandId = u64;

/// A command issued to a specific device, tracked through its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Queue-scoped id, never reused
    pub id: CommandId,

    /// Command verb
    pub cmd_type: CmdType,

    /// Opaque text after the verb
    pub payload: String,

    /// When the command was enqueued
    pub created_at: DateTime<Utc>,

    /// When the command was last delivered
    pub sent_at: Option<DateTime<Utc>>,

    /// Absolute expiry instant derived from the TTL
    pub deadline: DateTime<Utc>,

    /// Lifecycle state
    pub state: CommandState,

    /// Result code from the device reply
    pub result_code: Option<i64>,

    /// Number of deliveries to the device
    pub attempts: u32,
}

impl Command {
    /// Create a new command in `Created` state
    pub fn new(
        id: CommandId,
        cmd_type: CmdType,
        payload: String,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            cmd_type,
            payload,
            created_at,
            sent_at: None,
            deadline,
            state: CommandState::Created,
            result_code: None,
            attempts: 0,
        }
    }

    /// Apply a lifecycle event
    pub fn apply(&mut self, event: CommandEvent) -> Result<(), String> {
        self.state = fsm::next_state(self.state, &event)?;
        Ok(())
    }

    /// Transition to `Sent`, stamping delivery metadata
    ///
    /// `attempts` counts actual transmissions, so it only moves here.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        self.apply(CommandEvent::Offer)?;
        self.sent_at = Some(now);
        self.attempts += 1;
        Ok(())
    }

    /// Record a device reply
    ///
    /// A missing `Return` field counts as success; the raw code (or its
    /// absence) is kept for status queries.
    pub fn record_reply(&mut self, code: Option<i64>) -> Result<(), String> {
        self.apply(CommandEvent::Reply(code.unwrap_or(0)))?;
        self.result_code = code;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_command() -> Command {
        let now = Utc::now();
        Command::new(
            1,
            CmdType::Data,
            "QUERY ATTLOG".to_string(),
            now,
            now + Duration::seconds(600),
        )
    }

    #[test]
    fn test_mark_sent_stamps_metadata() {
        let mut cmd = new_command();
        let now = Utc::now();

        cmd.mark_sent(now).unwrap();
        assert_eq!(cmd.state, CommandState::Sent);
        assert_eq!(cmd.sent_at, Some(now));
        assert_eq!(cmd.attempts, 1);
    }

    #[test]
    fn test_record_reply_success_and_failure() {
        let mut cmd = new_command();
        cmd.mark_sent(Utc::now()).unwrap();
        cmd.record_reply(Some(0)).unwrap();
        assert_eq!(cmd.state, CommandState::Acknowledged);
        assert_eq!(cmd.result_code, Some(0));

        let mut cmd = new_command();
        cmd.mark_sent(Utc::now()).unwrap();
        cmd.record_reply(Some(-10)).unwrap();
        assert_eq!(cmd.state, CommandState::DeviceReportedError);
        assert_eq!(cmd.result_code, Some(-10));
    }

    #[test]
    fn test_missing_return_counts_as_success() {
        let mut cmd = new_command();
        cmd.mark_sent(Utc::now()).unwrap();
        cmd.record_reply(None).unwrap();
        assert_eq!(cmd.state, CommandState::Acknowledged);
        assert_eq!(cmd.result_code, None);
    }
}
