//! Synchronization modes

use std::fmt;
use std::str::FromStr;

use ws_core::WsError;

/// Conflict-resolution and direction policy of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Whatever the engine is configured to use
    #[default]
    EngineDefault,
    TwoWaySafe,
    TwoWayResolved,
    OneWaySafe,
    OneWayReplica,
}

impl SyncMode {
    /// Parse a mode name, falling back to the engine default with a warning
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "Unknown sync mode '{}', using the engine default",
                name
            );
            SyncMode::EngineDefault
        })
    }

    /// Value passed to the engine, `None` for the engine default
    pub fn as_engine_name(&self) -> Option<&'static str> {
        match self {
            SyncMode::EngineDefault => None,
            SyncMode::TwoWaySafe => Some("two-way-safe"),
            SyncMode::TwoWayResolved => Some("two-way-resolved"),
            SyncMode::OneWaySafe => Some("one-way-safe"),
            SyncMode::OneWayReplica => Some("one-way-replica"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = WsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "two-way-safe" => Ok(SyncMode::TwoWaySafe),
            "two-way-resolved" => Ok(SyncMode::TwoWayResolved),
            "one-way-safe" => Ok(SyncMode::OneWaySafe),
            "one-way-replica" => Ok(SyncMode::OneWayReplica),
            other => Err(WsError::Validation(format!("unknown sync mode '{}'", other))),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_engine_name().unwrap_or("default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Two-Way-Safe".parse::<SyncMode>().unwrap(), SyncMode::TwoWaySafe);
        assert_eq!("one-way-replica".parse::<SyncMode>().unwrap(), SyncMode::OneWayReplica);
    }

    #[test]
    fn test_unknown_mode_uses_engine_default() {
        assert!("twowaysafe".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::from_name_or_default("twowaysafe"), SyncMode::EngineDefault);
        assert_eq!(SyncMode::EngineDefault.as_engine_name(), None);
    }
}
