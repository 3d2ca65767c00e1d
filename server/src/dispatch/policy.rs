//! Retry and expiry policy
//!
//! Deadlines and retry counts are operational policy, configurable per
//! command verb. Destructive verbs default to a single attempt.

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::commands::CmdType;

/// Per-verb policy override
#[derive(Debug, Clone, Default)]
pub struct PolicyOverride {
    /// Time-to-live before the command times out
    pub ttl: Option<Duration>,

    /// Window after delivery before the command is re-offered
    pub reoffer_after: Option<Duration>,

    /// Maximum delivery attempts
    pub max_attempts: Option<u32>,
}

/// Dispatch policy for command deadlines and retries
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Default time-to-live
    pub default_ttl: Duration,

    /// Default re-offer window
    pub reoffer_after: Duration,

    /// Default maximum delivery attempts
    pub max_attempts: u32,

    /// Per-verb overrides
    pub per_type: HashMap<CmdType, PolicyOverride>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        let mut per_type = HashMap::new();
        // Rebooting or shutting down a terminal mid-shift is disruptive
        // enough that these are only ever delivered once.
        let single_shot = PolicyOverride {
            max_attempts: Some(1),
            ..Default::default()
        };
        per_type.insert(CmdType::Reboot, single_shot.clone());
        per_type.insert(CmdType::Shutdown, single_shot);

        Self {
            default_ttl: Duration::from_secs(600),
            reoffer_after: Duration::from_secs(90),
            max_attempts: 3,
            per_type,
        }
    }
}

impl DispatchPolicy {
    /// Time-to-live for a command verb
    pub fn ttl_for(&self, cmd_type: &CmdType) -> Duration {
        self.per_type
            .get(cmd_type)
            .and_then(|o| o.ttl)
            .unwrap_or(self.default_ttl)
    }

    /// Re-offer window for a command verb
    pub fn reoffer_for(&self, cmd_type: &CmdType) -> Duration {
        self.per_type
            .get(cmd_type)
            .and_then(|o| o.reoffer_after)
            .unwrap_or(self.reoffer_after)
    }

    /// Maximum delivery attempts for a command verb
    pub fn max_attempts_for(&self, cmd_type: &CmdType) -> u32 {
        self.per_type
            .get(cmd_type)
            .and_then(|o| o.max_attempts)
            .unwrap_or(self.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_override() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.ttl_for(&CmdType::Data), Duration::from_secs(600));
        assert_eq!(policy.max_attempts_for(&CmdType::Data), 3);
    }

    #[test]
    fn test_reboot_is_single_shot() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.max_attempts_for(&CmdType::Reboot), 1);
        assert_eq!(policy.max_attempts_for(&CmdType::Shutdown), 1);
        // TTL falls back to the default when the override leaves it unset
        assert_eq!(policy.ttl_for(&CmdType::Reboot), Duration::from_secs(600));
    }

    #[test]
    fn test_explicit_override_wins() {
        let mut policy = DispatchPolicy::default();
        policy.per_type.insert(
            CmdType::Check,
            PolicyOverride {
                ttl: Some(Duration::from_secs(30)),
                reoffer_after: Some(Duration::from_secs(10)),
                max_attempts: Some(5),
            },
        );

        assert_eq!(policy.ttl_for(&CmdType::Check), Duration::from_secs(30));
        assert_eq!(policy.reoffer_for(&CmdType::Check), Duration::from_secs(10));
        assert_eq!(policy.max_attempts_for(&CmdType::Check), 5);
    }
}
