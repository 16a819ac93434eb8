//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default draft attempts per email before escalation.
pub const DEFAULT_MAX_TRIALS: u32 = 2;

/// Default per capability-call timeout.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Default poll interval in `poll` trigger mode: 5 minutes.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Draft attempts allowed per email. Always at least 1.
    pub max_trials: u32,
    /// Timeout applied to every capability-port call.
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_trials: DEFAULT_MAX_TRIALS,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_trials: u32 = env_parse("TRIAGE_MAX_TRIALS", DEFAULT_MAX_TRIALS)?;
        let timeout_secs: u64 = env_parse("TRIAGE_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;
        Self::default()
            .with_max_trials(max_trials)
            .map(|c| c.with_call_timeout(Duration::from_secs(timeout_secs)))
    }

    pub fn with_max_trials(mut self, max_trials: u32) -> Result<Self, ConfigError> {
        if max_trials == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_trials".into(),
                message: "must be at least 1".into(),
            });
        }
        self.max_trials = max_trials;
        Ok(self)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// How runs get started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Only through the HTTP invocation surface.
    Manual,
    /// On a fixed interval.
    Poll { interval: Duration },
    /// On mailbox push notifications delivered to the webhook.
    Webhook,
}

impl TriggerMode {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = std::env::var("TRIAGE_TRIGGER").unwrap_or_else(|_| "manual".to_string());
        match mode.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "webhook" => Ok(Self::Webhook),
            "poll" => {
                let secs: u64 = env_parse("TRIAGE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "TRIAGE_POLL_INTERVAL_SECS".into(),
                        message: "must be greater than 0".into(),
                    });
                }
                Ok(Self::Poll {
                    interval: Duration::from_secs(secs),
                })
            }
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_TRIGGER".into(),
                message: format!("expected manual, poll or webhook, got '{other}'"),
            }),
        }
    }
}

/// HTTP server and knowledge-base settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub knowledge_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_parse("TRIAGE_HTTP_PORT", 8000)?,
            knowledge_dir: std::env::var("TRIAGE_KNOWLEDGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./knowledge")),
        })
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

/// Read a required environment variable.
pub(crate) fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_trials, 2);
        assert_eq!(config.call_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_max_trials_rejected() {
        let result = EngineConfig::default().with_max_trials(0);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn env_parse_uses_default_when_unset() {
        let value: u32 = env_parse("TRIAGE_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn env_parse_reports_invalid_value() {
        // SAFETY: variable name is unique to this test.
        unsafe { std::env::set_var("TRIAGE_TEST_BAD_NUMBER", "three") };
        let result: Result<u32, _> = env_parse("TRIAGE_TEST_BAD_NUMBER", 1);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "TRIAGE_TEST_BAD_NUMBER"
        ));
    }

    #[test]
    fn env_required_missing() {
        let result = env_required("TRIAGE_TEST_MISSING_REQUIRED");
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }
}
