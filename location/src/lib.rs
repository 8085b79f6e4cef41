//! Location sources.
//!
//! A [`LocationSource`] turns a [`LocationRequest`] into a [`Subscription`]:
//! a single-consumer channel of samples or errors that stays open until the
//! subscription is cancelled. Platform callbacks never touch caller state
//! directly; they only push into that channel.

#![warn(missing_docs)]

mod registry;
/// Platform-specific implementations.
pub mod sys;

use std::time::Duration;

use async_channel::Receiver;
use serde::{Deserialize, Serialize};

pub use registry::SubscriptionRegistry;

/// A single location fix. Not retained after it has been forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl LocationSample {
    /// Create a sample from coordinates.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Desired fix accuracy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    /// Highest accuracy the device offers (satellite positioning).
    #[default]
    Best,
    /// Roughly block-level accuracy.
    Balanced,
    /// City-level accuracy, lowest power.
    Low,
}

impl Accuracy {
    /// Fused location provider priority constant.
    #[must_use]
    pub const fn android_priority(self) -> i32 {
        match self {
            Self::Best => 100,
            Self::Balanced => 102,
            Self::Low => 104,
        }
    }

    /// Core Location `desiredAccuracy` in meters (`kCLLocationAccuracyBest` is -1).
    #[must_use]
    pub const fn core_location_meters(self) -> f64 {
        match self {
            Self::Best => -1.0,
            Self::Balanced => 100.0,
            Self::Low => 3000.0,
        }
    }

    /// GeoClue2 accuracy level.
    #[must_use]
    pub const fn geoclue_level(self) -> u32 {
        match self {
            Self::Best => 8,
            Self::Balanced => 6,
            Self::Low => 4,
        }
    }
}

/// How many results a request should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Keep delivering samples until cancelled.
    Continuous {
        /// Preferred time between samples.
        interval: Duration,
        /// Upper bound on the delivery rate; samples never arrive faster than this.
        fastest_interval: Duration,
    },
    /// Deliver at most one result, then stop.
    SingleShot,
}

/// Parameters for a location subscription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    /// Continuous or single-shot.
    pub mode: RequestMode,
    /// Desired accuracy.
    pub accuracy: Accuracy,
    /// Minimum movement in meters before a new continuous sample is reported.
    pub distance_filter_m: f64,
}

impl LocationRequest {
    /// A continuous request. The fastest interval defaults to half the interval.
    #[must_use]
    pub fn continuous(interval: Duration) -> Self {
        Self {
            mode: RequestMode::Continuous {
                interval,
                fastest_interval: interval / 2,
            },
            accuracy: Accuracy::Best,
            distance_filter_m: 0.0,
        }
    }

    /// A best-accuracy single-shot request.
    #[must_use]
    pub const fn single_shot() -> Self {
        Self {
            mode: RequestMode::SingleShot,
            accuracy: Accuracy::Best,
            distance_filter_m: 0.0,
        }
    }

    /// Replace the accuracy.
    #[must_use]
    pub const fn with_accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Replace the fastest interval of a continuous request. Ignored for single-shot.
    #[must_use]
    pub fn with_fastest_interval(mut self, fastest: Duration) -> Self {
        if let RequestMode::Continuous {
            fastest_interval, ..
        } = &mut self.mode
        {
            *fastest_interval = fastest;
        }
        self
    }

    /// Replace the distance filter.
    #[must_use]
    pub const fn with_distance_filter(mut self, meters: f64) -> Self {
        self.distance_filter_m = meters;
        self
    }

    /// Whether this request resolves at most once.
    #[must_use]
    pub const fn is_single_shot(&self) -> bool {
        matches!(self.mode, RequestMode::SingleShot)
    }

    /// The continuous interval, if any.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        match self.mode {
            RequestMode::Continuous { interval, .. } => Some(interval),
            RequestMode::SingleShot => None,
        }
    }
}

/// Errors reported by a location source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// Location permission was not granted or was revoked.
    #[error("location permission denied")]
    PermissionDenied,
    /// Location services are disabled on the device.
    #[error("location services disabled")]
    ServiceDisabled,
    /// The request timed out.
    #[error("location request timed out")]
    Timeout,
    /// The source produced no fix.
    #[error("location not available")]
    NotAvailable,
    /// The subscription channel closed before a result arrived.
    #[error("location subscription closed")]
    Closed,
    /// An OS-level failure, message passed through.
    #[error("{0}")]
    Platform(String),
}

/// Result alias for location operations.
pub type LocationResult<T> = Result<T, LocationError>;

/// One item delivered on a subscription.
pub type LocationUpdate = LocationResult<LocationSample>;

/// Identifier of a live subscription. Doubles as the handle passed across FFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live subscription: its id and the receiving end of its update channel.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    updates: Receiver<LocationUpdate>,
}

impl Subscription {
    /// Wrap an id and receiver.
    #[must_use]
    pub const fn new(id: SubscriptionId, updates: Receiver<LocationUpdate>) -> Self {
        Self { id, updates }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Split into id and receiver.
    #[must_use]
    pub fn into_parts(self) -> (SubscriptionId, Receiver<LocationUpdate>) {
        (self.id, self.updates)
    }
}

/// An OS location capability.
pub trait LocationSource: Send + Sync + std::fmt::Debug {
    /// Register a request with the OS.
    ///
    /// # Errors
    /// Returns a [`LocationError`] if the OS refused the registration.
    fn subscribe(&self, request: LocationRequest) -> LocationResult<Subscription>;

    /// Cancel a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
