//! Apple platform (iOS/macOS) location source using swift-bridge.
//!
//! The Swift side owns one `CLLocationManager` and multiplexes requests by
//! handle. Continuous requests are driven by a repeating timer that calls
//! `requestLocation()`, which is how Core Location keeps a custom interval.

use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::{
    LocationError, LocationRequest, LocationResult, LocationSample, LocationSource, Subscription,
    SubscriptionId, SubscriptionRegistry,
};

/// Failure codes sent by the Swift relay.
const FAILURE_DENIED: u8 = 1;
const FAILURE_NO_FIX: u8 = 2;
const FAILURE_DISABLED: u8 = 3;

#[swift_bridge::bridge]
mod ffi {
    extern "Rust" {
        type UpdateRelay;

        fn deliver_location(self: &UpdateRelay, handle: u64, latitude: f64, longitude: f64);
        fn deliver_failure(self: &UpdateRelay, handle: u64, code: u8, message: String);
    }

    extern "Swift" {
        type CoreLocationBridge;

        #[swift_bridge(init)]
        fn new(relay: UpdateRelay) -> CoreLocationBridge;

        fn start_updates(
            self: &CoreLocationBridge,
            handle: u64,
            interval_seconds: f64,
            desired_accuracy: f64,
            distance_filter: f64,
        );
        fn request_single(self: &CoreLocationBridge, handle: u64, desired_accuracy: f64);
        fn stop_updates(self: &CoreLocationBridge, handle: u64);
    }
}

/// Location source backed by Core Location.
pub struct AppleLocationSource {
    bridge: Mutex<ffi::CoreLocationBridge>,
    registry: Arc<SubscriptionRegistry>,
}

// Safety: the Swift bridge object is only touched behind the mutex, and the
// Swift side hops to the main queue before calling into Core Location.
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for AppleLocationSource {}
unsafe impl Sync for AppleLocationSource {}

impl std::fmt::Debug for AppleLocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleLocationSource")
            .field("open_subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Default for AppleLocationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AppleLocationSource {
    /// Create the source and its Swift-side location manager.
    #[must_use]
    pub fn new() -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let relay = UpdateRelay {
            registry: registry.clone(),
        };
        Self {
            bridge: Mutex::new(ffi::CoreLocationBridge::new(relay)),
            registry,
        }
    }
}

impl LocationSource for AppleLocationSource {
    fn subscribe(&self, request: LocationRequest) -> LocationResult<Subscription> {
        let subscription = self.registry.open();
        let handle = subscription.id().0;
        let accuracy = request.accuracy.core_location_meters();

        let bridge = self.bridge.lock().unwrap_or_else(PoisonError::into_inner);
        match request.interval() {
            Some(interval) => bridge.start_updates(
                handle,
                interval.as_secs_f64(),
                accuracy,
                request.distance_filter_m,
            ),
            None => bridge.request_single(handle, accuracy),
        }

        debug!("registered Core Location subscription {}", subscription.id());
        Ok(subscription)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.registry.close(id) {
            self.bridge
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop_updates(id.0);
        }
    }
}

struct UpdateRelay {
    registry: Arc<SubscriptionRegistry>,
}

impl UpdateRelay {
    fn deliver_location(&self, handle: u64, latitude: f64, longitude: f64) {
        self.registry.deliver(
            SubscriptionId(handle),
            Ok(LocationSample::new(latitude, longitude)),
        );
    }

    fn deliver_failure(&self, handle: u64, code: u8, message: String) {
        let error = match code {
            FAILURE_DENIED => LocationError::PermissionDenied,
            FAILURE_NO_FIX => LocationError::NotAvailable,
            FAILURE_DISABLED => LocationError::ServiceDisabled,
            _ => LocationError::Platform(message),
        };
        self.registry.deliver(SubscriptionId(handle), Err(error));
    }
}

impl std::fmt::Debug for UpdateRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRelay").finish_non_exhaustive()
    }
}
