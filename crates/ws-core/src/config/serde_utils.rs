//! Shared serialization/deserialization utilities for configuration
//!
//! Durations are written as plain integers, which reads better in TOML
//! than a nested `{ secs, nanos }` table.

/// Serialize a `Duration` as whole seconds
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "ws_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialize a `Duration` as whole milliseconds
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timings {
        #[serde(with = "duration_secs")]
        timeout: Duration,
        #[serde(with = "duration_millis")]
        poll: Duration,
    }

    #[test]
    fn test_durations_serialize_as_integers() {
        let timings = Timings {
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(500),
        };
        let json = serde_json::to_string(&timings).unwrap();
        assert_eq!(json, r#"{"timeout":30,"poll":500}"#);
    }

    #[test]
    fn test_durations_deserialize_from_integers() {
        let timings: Timings = serde_json::from_str(r#"{"timeout":60,"poll":125}"#).unwrap();
        assert_eq!(timings.timeout, Duration::from_secs(60));
        assert_eq!(timings.poll, Duration::from_millis(125));
    }
}
