//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Upper bound for the "thinking" pause before the next question appears.
pub const MAX_THINKING_DELAY: Duration = Duration::from_secs(5);

/// Conversation and polling configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Pause before the next question (or the summary) is presented.
    pub thinking_delay: Duration,
    /// Interval between progress polls.
    pub poll_interval: Duration,
    /// Client-side upper bound on how long a job may run.
    pub job_timeout: Duration,
    /// Consecutive failed polls before the loop gives up.
    pub max_consecutive_poll_failures: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            thinking_delay: Duration::from_millis(800),
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30 * 60), // 30 minutes
            max_consecutive_poll_failures: 6,
        }
    }
}

impl FlowConfig {
    /// Read overrides from `RENT_ASSIST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_u64("RENT_ASSIST_THINKING_DELAY_MS")? {
            config.thinking_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("RENT_ASSIST_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("RENT_ASSIST_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u32("RENT_ASSIST_MAX_POLL_FAILURES")? {
            config.max_consecutive_poll_failures = n;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thinking_delay > MAX_THINKING_DELAY {
            return Err(ConfigError::InvalidValue {
                key: "thinking_delay".to_string(),
                message: format!("must be at most {:?}", MAX_THINKING_DELAY),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.job_timeout < self.poll_interval {
            return Err(ConfigError::InvalidValue {
                key: "job_timeout".to_string(),
                message: "must not be shorter than the poll interval".to_string(),
            });
        }
        if self.max_consecutive_poll_failures == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_consecutive_poll_failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Analysis backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Invitation code forwarded to the backend on submission.
    pub invitation_code: Option<SecretString>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(10),
            invitation_code: None,
        }
    }
}

impl BackendConfig {
    /// Read overrides from `RENT_ASSIST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("RENT_ASSIST_BACKEND_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = env_u64("RENT_ASSIST_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(code) = std::env::var("RENT_ASSIST_INVITATION_CODE") {
            if !code.trim().is_empty() {
                config.invitation_code = Some(SecretString::from(code.trim().to_string()));
            }
        }
        Ok(config)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    env_u64(key)?.map(|n| narrow_u32(key, n)).transpose()
}

fn narrow_u32(key: &str, n: u64) -> Result<u32, ConfigError> {
    u32::try_from(n).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flow_config_is_valid() {
        let config = FlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn unbounded_thinking_delay_rejected() {
        let config = FlowConfig {
            thinking_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("thinking_delay"));
    }

    #[test]
    fn timeout_shorter_than_interval_rejected() {
        let config = FlowConfig {
            poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_failure_threshold_rejected() {
        let config = FlowConfig {
            max_consecutive_poll_failures: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_count_is_rejected_not_truncated() {
        assert_eq!(narrow_u32("RENT_ASSIST_MAX_POLL_FAILURES", 6).unwrap(), 6);
        let err = narrow_u32("RENT_ASSIST_MAX_POLL_FAILURES", 4_294_967_297).unwrap_err();
        assert!(err.to_string().contains("RENT_ASSIST_MAX_POLL_FAILURES"));
    }
}
