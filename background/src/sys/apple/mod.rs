//! Apple platform background-task guard using swift-bridge.
//!
//! Every token is its own `UIApplication` background task, so the token id is
//! the task identifier. The OS may expire a task on its own; the Swift side
//! reports that through the relay and a later release of the same token is a
//! no-op.

use std::sync::Arc;

use log::{debug, warn};

use crate::{BackgroundError, BackgroundGuard, BackgroundResult, GuardToken, Release, TokenLedger};

/// `UIBackgroundTaskIdentifier.invalid` as seen through the bridge.
const INVALID_TASK: u64 = 0;

#[swift_bridge::bridge]
mod ffi {
    extern "Rust" {
        type ExpiryRelay;

        fn task_expired(self: &ExpiryRelay, task: u64);
    }

    extern "Swift" {
        fn install_expiry_relay(relay: ExpiryRelay);
        fn begin_background_task() -> u64;
        fn end_background_task(task: u64);
        fn set_background_location_updates(enabled: bool);
    }
}

/// Guard backed by UIKit background tasks.
#[derive(Debug)]
pub struct BackgroundTaskGuard {
    ledger: Arc<TokenLedger>,
}

impl Default for BackgroundTaskGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTaskGuard {
    /// Create the guard and register for task expiry callbacks.
    #[must_use]
    pub fn new() -> Self {
        let ledger = Arc::new(TokenLedger::new());
        ffi::install_expiry_relay(ExpiryRelay {
            ledger: ledger.clone(),
        });
        Self { ledger }
    }
}

impl BackgroundGuard for BackgroundTaskGuard {
    fn acquire(&self) -> BackgroundResult<GuardToken> {
        let task = ffi::begin_background_task();
        if task == INVALID_TASK {
            return Err(BackgroundError::Refused(
                "no background time remaining".into(),
            ));
        }

        let token = GuardToken(task);
        if !self.ledger.issue_with(token) {
            ffi::end_background_task(task);
            return Err(BackgroundError::Platform(format!(
                "background task {task} issued twice"
            )));
        }
        if self.ledger.live() == 1 {
            ffi::set_background_location_updates(true);
        }
        Ok(token)
    }

    fn release(&self, token: GuardToken) {
        end_task(&self.ledger, token);
    }

    fn is_held(&self, token: GuardToken) -> bool {
        self.ledger.is_live(token)
    }

    fn held(&self) -> usize {
        self.ledger.live()
    }
}

fn end_task(ledger: &TokenLedger, token: GuardToken) {
    match ledger.retire(token) {
        Release::Unknown => {}
        Release::Remaining => ffi::end_background_task(token.0),
        Release::Last => {
            ffi::end_background_task(token.0);
            ffi::set_background_location_updates(false);
        }
    }
}

struct ExpiryRelay {
    ledger: Arc<TokenLedger>,
}

impl ExpiryRelay {
    fn task_expired(&self, task: u64) {
        warn!("background task {task} expired before release");
        end_task(&self.ledger, GuardToken(task));
        debug!("{} background tasks still held", self.ledger.live());
    }
}

impl std::fmt::Debug for ExpiryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryRelay").finish_non_exhaustive()
    }
}
