//! Platform-specific location sources.

use crate::{LocationError, LocationRequest, LocationResult, LocationSource, Subscription, SubscriptionId};

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod apple;

/// Android platform implementation.
#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "linux")]
pub mod linux;

/// Source for targets without a supported location service.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLocationSource;

impl LocationSource for UnsupportedLocationSource {
    fn subscribe(&self, _request: LocationRequest) -> LocationResult<Subscription> {
        Err(LocationError::NotAvailable)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}
