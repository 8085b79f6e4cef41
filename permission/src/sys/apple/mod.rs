//! Apple platform (iOS/macOS) permission gate using swift-bridge.
//!
//! Core Location only grants "always" after "when in use" has been granted,
//! so a first request runs both prompts back to back.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::{PermissionError, PermissionGate, PermissionResult, PermissionState, RequestOutcome};

/// Delay between the when-in-use prompt and the always prompt.
const ESCALATION_DELAY: Duration = Duration::from_millis(500);

#[swift_bridge::bridge]
mod ffi {
    enum AuthorizationStatus {
        NotDetermined,
        Restricted,
        Denied,
        AuthorizedWhenInUse,
        AuthorizedAlways,
    }

    extern "Swift" {
        fn location_authorization_status() -> AuthorizationStatus;
        fn request_when_in_use_authorization();
        fn request_always_authorization();
        fn open_app_settings() -> bool;
    }
}

const fn state_from_ffi(status: &ffi::AuthorizationStatus) -> PermissionState {
    match status {
        ffi::AuthorizationStatus::NotDetermined => PermissionState::NotDetermined,
        ffi::AuthorizationStatus::Restricted | ffi::AuthorizationStatus::Denied => {
            PermissionState::Denied
        }
        ffi::AuthorizationStatus::AuthorizedWhenInUse => PermissionState::RestrictedForeground,
        ffi::AuthorizationStatus::AuthorizedAlways => PermissionState::GrantedAlways,
    }
}

/// Permission gate backed by `CLLocationManager` authorization.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplePermissionGate;

impl ApplePermissionGate {
    /// Create a gate.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PermissionGate for ApplePermissionGate {
    fn query_state(&self) -> PermissionState {
        state_from_ffi(&ffi::location_authorization_status())
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
        Box::pin(async move {
            match self.query_state() {
                PermissionState::NotDetermined => {
                    ffi::request_when_in_use_authorization();
                    futures_timer::Delay::new(ESCALATION_DELAY).await;
                    ffi::request_always_authorization();
                    Ok(RequestOutcome::Initiated)
                }
                PermissionState::RestrictedForeground => {
                    ffi::request_always_authorization();
                    Ok(RequestOutcome::Initiated)
                }
                PermissionState::GrantedAlways => Ok(RequestOutcome::AlreadyGranted),
                PermissionState::Denied => Ok(RequestOutcome::Blocked),
            }
        })
    }

    fn open_settings(&self) -> PermissionResult<()> {
        if ffi::open_app_settings() {
            Ok(())
        } else {
            Err(PermissionError::Platform(
                "settings URL could not be opened".into(),
            ))
        }
    }
}
