//! Linux permission gate.
//!
//! Desktop Linux has no runtime location prompt. Access to GeoClue2 is decided
//! by the system service itself, so the gate always reports the full grant.

use futures::future::BoxFuture;

use crate::{PermissionGate, PermissionResult, PermissionState, RequestOutcome};

/// Permission gate for hosts without runtime prompts.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPermissionGate;

impl PermissionGate for HostPermissionGate {
    fn query_state(&self) -> PermissionState {
        PermissionState::GrantedAlways
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
        Box::pin(async { Ok(RequestOutcome::AlreadyGranted) })
    }

    fn open_settings(&self) -> PermissionResult<()> {
        Ok(())
    }
}
