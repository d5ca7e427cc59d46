//! Watchdog configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WatchdogError, WatchdogResult};

/// Watchdog configuration.
///
/// Deserializes from partial documents; missing fields take their defaults
/// and unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Seconds without acknowledgement before the first blocked event.
    pub soft_threshold_seconds: u64,
    /// Seconds without acknowledgement before the ANR event.
    pub hard_threshold_seconds: u64,
    /// Spacing of repeated blocked events; 0 disables repeats.
    pub repeat_interval_seconds: u64,
    /// Clock tick period, `poll_period_seconds` (whole or fractional) in JSON.
    #[serde(rename = "poll_period_seconds", with = "fractional_seconds")]
    pub poll_period: Duration,
    /// Allow synthetic test incidents. Never enable in shipped builds.
    pub test_mode_enabled: bool,
    /// Name of the clock thread.
    pub thread_name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            soft_threshold_seconds: 2,
            hard_threshold_seconds: 5,
            repeat_interval_seconds: 1,
            poll_period: Duration::from_secs(1),
            test_mode_enabled: false,
            thread_name: String::from("anr-watchdog"),
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> WatchdogResult<()> {
        if self.soft_threshold_seconds == 0 {
            return Err(WatchdogError::invalid_configuration(
                "soft_threshold_seconds must be greater than 0",
            ));
        }
        if self.hard_threshold_seconds <= self.soft_threshold_seconds {
            return Err(WatchdogError::invalid_configuration(
                "hard_threshold_seconds must be greater than soft_threshold_seconds",
            ));
        }
        if self.poll_period.is_zero() {
            return Err(WatchdogError::invalid_configuration(
                "poll_period must be greater than 0",
            ));
        }
        // A tick slower than the soft threshold cannot tell a live context from a stalled one.
        if self.poll_period >= Duration::from_secs(self.soft_threshold_seconds) {
            return Err(WatchdogError::invalid_configuration(
                "poll_period must be shorter than soft_threshold_seconds",
            ));
        }
        if self.thread_name.is_empty() {
            return Err(WatchdogError::invalid_configuration(
                "thread_name must not be empty",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the values are invalid.
    pub fn from_json(json: &str) -> WatchdogResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WatchdogError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }
}

mod fractional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(period.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

/// Builder for `WatchdogConfig`.
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Set the soft threshold in seconds.
    #[must_use]
    pub fn soft_threshold_seconds(mut self, seconds: u64) -> Self {
        self.config.soft_threshold_seconds = seconds;
        self
    }

    /// Set the hard (ANR) threshold in seconds.
    #[must_use]
    pub fn hard_threshold_seconds(mut self, seconds: u64) -> Self {
        self.config.hard_threshold_seconds = seconds;
        self
    }

    /// Set the repeat interval in seconds.
    #[must_use]
    pub fn repeat_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.repeat_interval_seconds = seconds;
        self
    }

    /// Set the clock tick period.
    #[must_use]
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Set the clock tick period in whole seconds.
    #[must_use]
    pub fn poll_period_seconds(mut self, seconds: u64) -> Self {
        self.config.poll_period = Duration::from_secs(seconds);
        self
    }

    /// Enable or disable synthetic test incidents.
    #[must_use]
    pub fn test_mode_enabled(mut self, enabled: bool) -> Self {
        self.config.test_mode_enabled = enabled;
        self
    }

    /// Set the clock thread name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
