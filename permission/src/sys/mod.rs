//! Platform-specific permission gates.

use futures::future::BoxFuture;

use crate::{PermissionError, PermissionGate, PermissionResult, PermissionState, RequestOutcome};

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod apple;

/// Android platform implementation.
#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "linux")]
pub mod linux;

/// Gate for targets without a location permission model we can drive.
///
/// Reports [`PermissionState::NotDetermined`] forever, so tracking never starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPermissionGate;

impl PermissionGate for UnsupportedPermissionGate {
    fn query_state(&self) -> PermissionState {
        PermissionState::NotDetermined
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
        Box::pin(async { Err(PermissionError::NotSupported) })
    }

    fn open_settings(&self) -> PermissionResult<()> {
        Err(PermissionError::NotSupported)
    }
}
