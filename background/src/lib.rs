//! Background execution guards.
//!
//! Mobile systems only keep a process sampling location while it is not
//! visible if it holds an explicit, time-boxed grant: a foreground service on
//! Android, a background task on iOS. A [`BackgroundGuard`] hands out tokens
//! for that grant and a [`GuardLease`] makes sure each token is given back
//! exactly once.

#![warn(missing_docs)]

mod ledger;
/// Platform-specific implementations.
pub mod sys;

use std::sync::Arc;

use log::debug;
use serde::Deserialize;

pub use ledger::{Release, TokenLedger};

/// A held background-execution grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardToken(pub u64);

impl std::fmt::Display for GuardToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Errors raised when acquiring a guard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackgroundError {
    /// The OS refused to grant background execution.
    #[error("background execution refused: {0}")]
    Refused(String),
    /// The platform bridge failed.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Result alias for guard operations.
pub type BackgroundResult<T> = Result<T, BackgroundError>;

/// An OS capability that keeps the process running in the background.
pub trait BackgroundGuard: Send + Sync + std::fmt::Debug {
    /// Acquire a token.
    ///
    /// # Errors
    /// Returns a [`BackgroundError`] if the OS refused the grant.
    fn acquire(&self) -> BackgroundResult<GuardToken>;

    /// Give a token back. Unknown, expired and already released tokens are ignored.
    fn release(&self, token: GuardToken);

    /// Whether `token` is still held. Expired tokens report `false`.
    fn is_held(&self, token: GuardToken) -> bool;

    /// Number of tokens currently held.
    fn held(&self) -> usize;
}

/// A token that is released when dropped.
#[derive(Debug)]
pub struct GuardLease {
    guard: Arc<dyn BackgroundGuard>,
    token: Option<GuardToken>,
}

impl GuardLease {
    /// Acquire a token from `guard`.
    ///
    /// # Errors
    /// Returns a [`BackgroundError`] if the guard refused.
    pub fn acquire(guard: &Arc<dyn BackgroundGuard>) -> BackgroundResult<Self> {
        let token = guard.acquire()?;
        debug!("acquired background {token}");
        Ok(Self {
            guard: guard.clone(),
            token: Some(token),
        })
    }

    /// Whether the OS still honours this lease.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.token.is_some_and(|token| self.guard.is_held(token))
    }

    /// Release the token now rather than at drop.
    pub fn release(mut self) {
        self.release_token();
    }

    fn release_token(&mut self) {
        if let Some(token) = self.token.take() {
            debug!("releasing background {token}");
            self.guard.release(token);
        }
    }
}

impl Drop for GuardLease {
    fn drop(&mut self) {
        self.release_token();
    }
}

/// Content of the persistent notification shown while a foreground service runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Notification channel id.
    pub channel_id: String,
    /// User-visible channel name.
    pub channel_name: String,
    /// Notification id used for `startForeground`.
    pub notification_id: i32,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub text: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_id: "LocationTrackingChannel".into(),
            channel_name: "Location Tracking".into(),
            notification_id: 1,
            title: "Location Tracking".into(),
            text: "Tracking your location in the background".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_releases_once_on_drop() {
        let guard: Arc<dyn BackgroundGuard> = Arc::new(sys::NoopGuard::default());
        let lease = GuardLease::acquire(&guard).unwrap();
        assert_eq!(guard.held(), 1);
        drop(lease);
        assert_eq!(guard.held(), 0);
    }

    #[test]
    fn explicit_release_is_not_repeated_by_drop() {
        let noop = Arc::new(sys::NoopGuard::default());
        let guard: Arc<dyn BackgroundGuard> = noop.clone();
        let lease = GuardLease::acquire(&guard).unwrap();
        lease.release();
        assert_eq!(noop.ledger().counts(), (1, 1));
    }

    #[test]
    fn notification_config_fills_missing_fields() {
        let config: NotificationConfig =
            serde_json::from_str(r#"{"title":"Shift tracking"}"#).unwrap();
        assert_eq!(config.title, "Shift tracking");
        assert_eq!(config.channel_id, "LocationTrackingChannel");
        assert_eq!(config.notification_id, 1);
    }
}
