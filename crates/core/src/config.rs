//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cap on completion rounds per query.
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Default timeout for each suspension point.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// What to do when a query arrives for a thread that is already running
/// one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail the new query with [`crate::AgentError::ThreadBusy`].
    #[default]
    Reject,
    /// Wait until the running query finishes.
    Queue,
}

/// Options consumed by the turn loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// System instructions sent ahead of every completion request.
    pub system_prompt: String,
    /// Maximum number of completion rounds in one query.
    pub max_iterations: usize,
    /// Timeout applied to discovery, each completion and each tool call.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// Policy for concurrent queries on the same thread.
    pub busy_policy: BusyPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            busy_policy: BusyPolicy::default(),
        }
    }
}

/// (De)serializes a [`Duration`] as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: AgentConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
    }

    #[test]
    fn test_deserialize() {
        let config: AgentConfig = serde_json::from_value(json!({
            "system_prompt": "You are a database query assistant.",
            "max_iterations": 4,
            "call_timeout": 2.5,
            "busy_policy": "queue",
        }))
        .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.call_timeout, Duration::from_millis(2500));
        assert_eq!(config.busy_policy, BusyPolicy::Queue);

        let err = serde_json::from_value::<AgentConfig>(json!({
            "call_timeout": -1.0,
        }));
        assert!(err.is_err());
    }
}
