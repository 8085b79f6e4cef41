use std::time::Duration;

use geotrack_background::NotificationConfig;
use geotrack_location::{Accuracy, LocationRequest};
use serde::Deserialize;

use crate::{TrackingError, TrackingResult};

/// Tunables for a tracking session.
///
/// Every field has a default, so a JSON document only needs the fields it
/// overrides:
///
/// ```
/// use geotrack_session::TrackingConfig;
///
/// let config = TrackingConfig::from_json(r#"{"defaultIntervalSecs": 120}"#).unwrap();
/// assert_eq!(config.default_interval_secs, 120);
/// assert_eq!(config.single_shot_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    /// Interval used when a command does not name one.
    pub default_interval_secs: u64,
    /// Accuracy for both continuous and single-shot requests.
    pub accuracy: Accuracy,
    /// The fastest interval is the interval divided by this.
    pub fastest_interval_divisor: u32,
    /// Minimum movement in meters between continuous samples.
    pub distance_filter_m: f64,
    /// How long a single-shot request may stay pending.
    pub single_shot_timeout_secs: u64,
    /// Foreground-service notification content.
    pub notification: NotificationConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 60,
            accuracy: Accuracy::Best,
            fastest_interval_divisor: 2,
            distance_filter_m: 10.0,
            single_shot_timeout_secs: 30,
            notification: NotificationConfig::default(),
        }
    }
}

impl TrackingConfig {
    /// Parse overrides from JSON and validate them.
    ///
    /// # Errors
    /// Returns [`TrackingError::InvalidConfig`] on malformed JSON or out-of-range values.
    pub fn from_json(json: &str) -> TrackingResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TrackingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`TrackingError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> TrackingResult<()> {
        if self.default_interval_secs == 0 {
            return Err(invalid("defaultIntervalSecs must be positive"));
        }
        if self.fastest_interval_divisor == 0 {
            return Err(invalid("fastestIntervalDivisor must be positive"));
        }
        if !self.distance_filter_m.is_finite() || self.distance_filter_m < 0.0 {
            return Err(invalid("distanceFilterM must be a non-negative number"));
        }
        if self.single_shot_timeout_secs == 0 {
            return Err(invalid("singleShotTimeoutSecs must be positive"));
        }
        Ok(())
    }

    /// The interval used when none is given.
    #[must_use]
    pub const fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    /// How long a single-shot request may stay pending.
    #[must_use]
    pub const fn single_shot_timeout(&self) -> Duration {
        Duration::from_secs(self.single_shot_timeout_secs)
    }

    /// The continuous request for a session sampling every `interval`.
    #[must_use]
    pub fn continuous_request(&self, interval: Duration) -> LocationRequest {
        LocationRequest::continuous(interval)
            .with_fastest_interval(interval / self.fastest_interval_divisor.max(1))
            .with_accuracy(self.accuracy)
            .with_distance_filter(self.distance_filter_m)
    }

    /// The request used for a one-off fix.
    #[must_use]
    pub const fn single_shot_request(&self) -> LocationRequest {
        LocationRequest::single_shot().with_accuracy(self.accuracy)
    }
}

fn invalid(message: &str) -> TrackingError {
    TrackingError::InvalidConfig(message.into())
}
