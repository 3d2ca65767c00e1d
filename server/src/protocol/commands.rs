//! Device command vocabulary
//!
//! Terminals accept a fixed set of command verbs (`DATA ...`, `CHECK`,
//! `CLEAR LOG`, `REBOOT`, ...). The tag is a closed enumeration with an
//! open extension variant for model-specific verbs; the payload after the
//! verb is carried opaquely and never interpreted here.

/// Command type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CmdType {
    /// DATA QUERY / UPDATE / DELETE subcommands
    Data,

    /// Health check and input lock toggles
    Check,

    /// Clear attendance logs
    ClearLog,

    /// Clear all stored data
    ClearData,

    /// Restart the device
    Reboot,

    /// Shut the device down
    Shutdown,

    /// Request device info
    Info,

    /// Unlock the door relay
    Unlock,

    /// Model-specific verb outside the core vocabulary
    Other(String),
}

impl CmdType {
    /// Wire spelling of the command verb
    pub fn as_str(&self) -> &str {
        match self {
            CmdType::Data => "DATA",
            CmdType::Check => "CHECK",
            CmdType::ClearLog => "CLEAR LOG",
            CmdType::ClearData => "CLEAR DATA",
            CmdType::Reboot => "REBOOT",
            CmdType::Shutdown => "SHUTDOWN",
            CmdType::Info => "INFO",
            CmdType::Unlock => "AC_UNLOCK",
            CmdType::Other(s) => s.as_str(),
        }
    }

    /// Parse a wire verb; never fails, unknown verbs land in `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "DATA" => CmdType::Data,
            "CHECK" => CmdType::Check,
            "CLEAR LOG" => CmdType::ClearLog,
            "CLEAR DATA" => CmdType::ClearData,
            "REBOOT" => CmdType::Reboot,
            "SHUTDOWN" => CmdType::Shutdown,
            "INFO" => CmdType::Info,
            "AC_UNLOCK" => CmdType::Unlock,
            other => CmdType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for CmdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for CmdType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for CmdType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(CmdType::parse(&s))
    }
}
