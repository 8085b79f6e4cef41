use geotrack_background::BackgroundError;
use geotrack_location::LocationError;
use geotrack_permission::PermissionError;

/// Errors surfaced by the session manager and the command channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackingError {
    /// The current grant does not allow the operation.
    #[error("location permission not granted")]
    PermissionDenied,
    /// No session manager is bound to the command channel.
    #[error("location service not available")]
    ServiceUnavailable,
    /// The source produced no fix in time.
    #[error("unable to get location")]
    LocationUnavailable,
    /// The source reported a failure.
    #[error("location error: {0}")]
    Source(String),
    /// A newer single-shot request replaced this one.
    #[error("superseded by a newer location request")]
    Superseded,
    /// The session shut down while the request was pending.
    #[error("location request cancelled")]
    Cancelled,
    /// Background execution could not be secured.
    #[error("background execution unavailable: {0}")]
    Background(#[from] BackgroundError),
    /// The permission prompt could not be issued.
    #[error("permission request failed: {0}")]
    Permission(#[from] PermissionError),
    /// Tracking intervals must be positive.
    #[error("interval must be a positive number of seconds")]
    InvalidInterval,
    /// A command argument had the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A configuration document was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TrackingError {
    /// Stable code reported to the embedding application.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied | Self::Permission(_) => "PERMISSION_DENIED",
            Self::ServiceUnavailable | Self::Background(_) => "SERVICE_UNAVAILABLE",
            Self::LocationUnavailable => "NO_LOCATION",
            Self::Source(_) | Self::Superseded | Self::Cancelled => "LOCATION_ERROR",
            Self::InvalidInterval | Self::InvalidArgument(_) | Self::InvalidConfig(_) => {
                "INVALID_ARGUMENT"
            }
        }
    }
}

impl From<LocationError> for TrackingError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::PermissionDenied => Self::PermissionDenied,
            LocationError::NotAvailable | LocationError::Timeout | LocationError::Closed => {
                Self::LocationUnavailable
            }
            LocationError::ServiceDisabled => Self::Source(err.to_string()),
            LocationError::Platform(message) => Self::Source(message),
        }
    }
}

/// Result alias for session operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fix_maps_to_no_location() {
        for err in [
            LocationError::NotAvailable,
            LocationError::Timeout,
            LocationError::Closed,
        ] {
            assert_eq!(TrackingError::from(err).code(), "NO_LOCATION");
        }
    }

    #[test]
    fn platform_failures_keep_their_message() {
        let err = TrackingError::from(LocationError::Platform("gps off".into()));
        assert_eq!(err.code(), "LOCATION_ERROR");
        assert_eq!(err.to_string(), "location error: gps off");
    }

    #[test]
    fn refused_guard_is_service_unavailable() {
        let err = TrackingError::from(BackgroundError::Refused("quota".into()));
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }
}
