//! Location permission gate.
//!
//! Mirrors the OS location-permission grant into a small [`PermissionState`]
//! and drives the prompt flow behind a single [`PermissionGate`] trait so the
//! tracking session never has to know which platform it runs on.

#![warn(missing_docs)]

/// Platform-specific implementations.
pub mod sys;

use futures::future::BoxFuture;

/// The location grant currently held by the process, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionState {
    /// The user has not been asked yet.
    NotDetermined,
    /// The user or a system policy refused the grant. Prompting again will not
    /// succeed until the user changes it in system settings.
    Denied,
    /// Location is available only while the app is in the foreground.
    RestrictedForeground,
    /// Location is available in the foreground and the background.
    GrantedAlways,
}

impl PermissionState {
    /// Whether a continuous background tracking session may be started.
    #[must_use]
    pub const fn allows_tracking(self) -> bool {
        matches!(self, Self::GrantedAlways)
    }

    /// Whether a one-off location fix may be requested.
    #[must_use]
    pub const fn allows_single_shot(self) -> bool {
        matches!(self, Self::GrantedAlways | Self::RestrictedForeground)
    }
}

/// What happened when a permission request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// The strongest grant is already held; no prompt was shown.
    AlreadyGranted,
    /// A prompt flow was started. The final answer arrives asynchronously.
    Initiated,
    /// The grant was terminally denied; the caller should send the user to settings.
    Blocked,
}

impl RequestOutcome {
    /// The boolean answer reported to the embedding application.
    #[must_use]
    pub const fn reported(self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

/// Errors that can occur while querying or requesting permissions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PermissionError {
    /// Runtime permission prompts are not supported on this platform.
    #[error("permission prompts are not supported on this platform")]
    NotSupported,
    /// The platform bridge failed.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Result alias for permission operations.
pub type PermissionResult<T> = Result<T, PermissionError>;

/// Access to the OS location-permission state.
pub trait PermissionGate: Send + Sync + std::fmt::Debug {
    /// Non-blocking read of the current grant.
    fn query_state(&self) -> PermissionState;

    /// Start the OS prompt flow.
    ///
    /// Resolves once the request has been issued, not when the user answers.
    /// The state seen by [`query_state`](Self::query_state) changes later.
    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>>;

    /// Deep-link the user into the app's page in system settings.
    ///
    /// # Errors
    /// Returns a [`PermissionError`] if the platform cannot open settings.
    fn open_settings(&self) -> PermissionResult<()>;
}

/// Issue a permission request and follow up with a settings deep-link if it was blocked.
///
/// Returns the boolean answer for the embedding application.
///
/// # Errors
/// Returns a [`PermissionError`] if the request itself could not be issued.
pub async fn request_or_open_settings(gate: &dyn PermissionGate) -> PermissionResult<bool> {
    let outcome = gate.request_permission().await?;
    if outcome == RequestOutcome::Blocked {
        log::info!("location permission blocked, opening system settings");
        if let Err(err) = gate.open_settings() {
            log::warn!("failed to open system settings: {err}");
        }
    }
    Ok(outcome.reported())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FixedGate {
        state: Mutex<PermissionState>,
        settings_opened: AtomicUsize,
    }

    impl FixedGate {
        fn new(state: PermissionState) -> Self {
            Self {
                state: Mutex::new(state),
                settings_opened: AtomicUsize::new(0),
            }
        }
    }

    impl PermissionGate for FixedGate {
        fn query_state(&self) -> PermissionState {
            *self.state.lock().unwrap()
        }

        fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
            Box::pin(async move {
                Ok(match self.query_state() {
                    PermissionState::GrantedAlways => RequestOutcome::AlreadyGranted,
                    PermissionState::Denied => RequestOutcome::Blocked,
                    _ => RequestOutcome::Initiated,
                })
            })
        }

        fn open_settings(&self) -> PermissionResult<()> {
            self.settings_opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn tracking_needs_the_always_grant() {
        assert!(PermissionState::GrantedAlways.allows_tracking());
        assert!(!PermissionState::RestrictedForeground.allows_tracking());
        assert!(!PermissionState::NotDetermined.allows_tracking());
        assert!(!PermissionState::Denied.allows_tracking());
    }

    #[test]
    fn single_shot_accepts_foreground_grant() {
        assert!(PermissionState::RestrictedForeground.allows_single_shot());
        assert!(PermissionState::GrantedAlways.allows_single_shot());
        assert!(!PermissionState::Denied.allows_single_shot());
    }

    #[tokio::test]
    async fn blocked_request_reports_false_and_opens_settings() {
        let gate = FixedGate::new(PermissionState::Denied);
        assert!(!request_or_open_settings(&gate).await.unwrap());
        assert_eq!(gate.settings_opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn initiated_request_reports_true() {
        let gate = FixedGate::new(PermissionState::NotDetermined);
        assert!(request_or_open_settings(&gate).await.unwrap());
        assert_eq!(gate.settings_opened.load(Ordering::SeqCst), 0);
    }
}
