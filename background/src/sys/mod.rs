//! Platform-specific background guards.

use crate::{BackgroundGuard, BackgroundResult, GuardToken, TokenLedger};

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod apple;

/// Android platform implementation.
#[cfg(target_os = "android")]
pub mod android;

/// Guard for hosts that never suspend a process for running in the background.
///
/// Only keeps the books, so token pairing can still be checked.
#[derive(Debug, Default)]
pub struct NoopGuard {
    ledger: TokenLedger,
}

impl NoopGuard {
    /// The ledger backing this guard.
    #[must_use]
    pub const fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }
}

impl BackgroundGuard for NoopGuard {
    fn acquire(&self) -> BackgroundResult<GuardToken> {
        Ok(self.ledger.issue().0)
    }

    fn release(&self, token: GuardToken) {
        self.ledger.retire(token);
    }

    fn is_held(&self, token: GuardToken) -> bool {
        self.ledger.is_live(token)
    }

    fn held(&self) -> usize {
        self.ledger.live()
    }
}
