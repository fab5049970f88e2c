//! Simulation configuration.
//!
//! The defaults reproduce the classic setup: a five minute deadline, twenty
//! attentions per doctor, services of 1 to 10 minutes and 1 to 3 seconds
//! between patients.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::ConfigError;

/// Default simulation deadline, in minutes.
pub const DEFAULT_MAX_DURATION_MINUTES: u64 = 5;
/// Default per-doctor attention quota.
pub const DEFAULT_MAX_ATTENTIONS_PER_DOCTOR: u32 = 20;
/// Shortest allowed service duration, in minutes.
pub const MIN_SERVICE_MINUTES: u32 = 1;
/// Longest allowed service duration, in minutes.
pub const MAX_SERVICE_MINUTES: u32 = 10;
/// Default lower bound of the pause between patients, in milliseconds.
pub const DEFAULT_MIN_DELAY_MS: u64 = 1000;
/// Default upper bound of the pause between patients, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 3000;

/// Parameters of a single simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Global deadline. Set in whole minutes by the CLI.
    pub max_duration: Duration,
    /// Maximum attentions a single doctor produces before stopping on its own.
    pub quota: u32,
    /// Range the service duration is drawn from, in minutes.
    pub service_minutes: RangeInclusive<u32>,
    /// Range the pause between patients is drawn from, in milliseconds.
    pub delay_ms: RangeInclusive<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(DEFAULT_MAX_DURATION_MINUTES * 60),
            quota: DEFAULT_MAX_ATTENTIONS_PER_DOCTOR,
            service_minutes: MIN_SERVICE_MINUTES..=MAX_SERVICE_MINUTES,
            delay_ms: DEFAULT_MIN_DELAY_MS..=DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl SimulationConfig {
    /// Sets the deadline in whole minutes.
    #[must_use]
    pub fn with_max_duration_minutes(mut self, minutes: u64) -> Self {
        self.max_duration = Duration::from_secs(minutes.saturating_mul(60));
        self
    }

    /// Sets the deadline with sub-minute precision (tests, embedding).
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    #[must_use]
    pub fn with_quota(mut self, quota: u32) -> Self {
        self.quota = quota;
        self
    }

    #[must_use]
    pub fn with_service_minutes(mut self, range: RangeInclusive<u32>) -> Self {
        self.service_minutes = range;
        self
    }

    #[must_use]
    pub fn with_delay_ms(mut self, range: RangeInclusive<u64>) -> Self {
        self.delay_ms = range;
        self
    }

    /// Validates the configuration, returning it unchanged on success.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a zero quota or deadline, an inverted
    /// range, or a service range outside the per-attention policy bounds.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.quota == 0 {
            return Err(ConfigError::NonPositiveQuota);
        }
        if self.max_duration.is_zero() {
            return Err(ConfigError::NonPositiveDeadline);
        }

        let (min, max) = (*self.service_minutes.start(), *self.service_minutes.end());
        if min > max {
            return Err(ConfigError::InvalidServiceRange { min, max });
        }
        if min < MIN_SERVICE_MINUTES || max > MAX_SERVICE_MINUTES {
            return Err(ConfigError::ServiceRangeOutOfPolicy {
                min,
                max,
                policy_min: MIN_SERVICE_MINUTES,
                policy_max: MAX_SERVICE_MINUTES,
            });
        }

        let (min, max) = (*self.delay_ms.start(), *self.delay_ms.end());
        if min > max {
            return Err(ConfigError::InvalidDelayRange { min, max });
        }

        Ok(self)
    }
}
