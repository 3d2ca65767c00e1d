//! Settings file management

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::policy::{DispatchPolicy, PolicyOverride};
use crate::logs::LogLevel;
use crate::protocol::commands::CmdType;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs in JSON format
    #[serde(default)]
    pub log_json: bool,

    /// Listener configuration
    #[serde(default)]
    pub listener: ListenerSettings,

    /// Dispatch policy configuration
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Enable the retry/expiry sweeper worker
    #[serde(default = "default_true")]
    pub enable_sweeper: bool,

    /// Enable periodic session checkpoints
    #[serde(default = "default_true")]
    pub enable_checkpoint: bool,

    /// Sweeper tick interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Checkpoint interval in seconds
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_checkpoint_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            listener: ListenerSettings::default(),
            dispatch: DispatchSettings::default(),
            enable_sweeper: true,
            enable_checkpoint: true,
            sweep_interval_secs: default_sweep_interval(),
            checkpoint_interval_secs: default_checkpoint_interval(),
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    // Terminals connect from the LAN, not the loopback
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Per-verb policy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPolicySettings {
    /// Time-to-live in seconds
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Re-offer window in seconds
    #[serde(default)]
    pub reoffer_after_secs: Option<u64>,

    /// Maximum delivery attempts
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Dispatch policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Default command time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Default re-offer window in seconds
    #[serde(default = "default_reoffer_secs")]
    pub reoffer_after_secs: u64,

    /// Default maximum delivery attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-verb overrides keyed by wire spelling (e.g. "REBOOT")
    #[serde(default)]
    pub per_type: HashMap<String, CommandPolicySettings>,

    /// Completed commands retained per device
    #[serde(default = "default_retain_done")]
    pub retain_done: usize,

    /// A device with no poll inside this window counts as offline
    #[serde(default = "default_offline_after")]
    pub offline_after_secs: u64,
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_reoffer_secs() -> u64 {
    90
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retain_done() -> usize {
    100
}

fn default_offline_after() -> u64 {
    300
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            reoffer_after_secs: default_reoffer_secs(),
            max_attempts: default_max_attempts(),
            per_type: HashMap::new(),
            retain_done: default_retain_done(),
            offline_after_secs: default_offline_after(),
        }
    }
}

impl DispatchSettings {
    /// Build the runtime policy from the settings
    ///
    /// Starts from the built-in policy (which caps destructive verbs at
    /// one attempt) and layers configured overrides on top.
    pub fn policy(&self) -> DispatchPolicy {
        let mut policy = DispatchPolicy {
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            reoffer_after: Duration::from_secs(self.reoffer_after_secs),
            max_attempts: self.max_attempts,
            ..DispatchPolicy::default()
        };

        for (verb, settings) in &self.per_type {
            policy.per_type.insert(
                CmdType::parse(verb),
                PolicyOverride {
                    ttl: settings.ttl_secs.map(Duration::from_secs),
                    reoffer_after: settings.reoffer_after_secs.map(Duration::from_secs),
                    max_attempts: settings.max_attempts,
                },
            );
        }

        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.listener.port, 8000);
        assert_eq!(settings.dispatch.default_ttl_secs, 600);
        assert!(settings.enable_sweeper);
    }

    #[test]
    fn test_policy_keeps_builtin_single_shot_verbs() {
        let settings = DispatchSettings::default();
        let policy = settings.policy();
        assert_eq!(policy.max_attempts_for(&CmdType::Reboot), 1);
        assert_eq!(policy.max_attempts_for(&CmdType::Data), 3);
    }

    #[test]
    fn test_policy_applies_configured_override() {
        let json = r#"{
            "default_ttl_secs": 120,
            "per_type": {
                "CHECK": { "max_attempts": 5, "ttl_secs": 30 }
            }
        }"#;
        let settings: DispatchSettings = serde_json::from_str(json).unwrap();
        let policy = settings.policy();

        assert_eq!(policy.default_ttl, Duration::from_secs(120));
        assert_eq!(policy.max_attempts_for(&CmdType::Check), 5);
        assert_eq!(policy.ttl_for(&CmdType::Check), Duration::from_secs(30));
    }
}
