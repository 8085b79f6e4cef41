use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::GuardToken;

/// Outcome of returning a token to a [`TokenLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The last live token was returned; the OS grant can be dropped.
    Last,
    /// Other tokens are still live.
    Remaining,
    /// The token was not live (never issued, expired, or already returned).
    Unknown,
}

#[derive(Debug, Default)]
struct LedgerState {
    next: u64,
    live: HashSet<GuardToken>,
    acquired: u64,
    released: u64,
}

/// Bookkeeping shared by every guard implementation.
///
/// Hands out unique tokens and reports the 0→1 and 1→0 edges so a platform
/// guard can hold one OS grant for any number of tokens.
#[derive(Debug, Default)]
pub struct TokenLedger {
    state: Mutex<LedgerState>,
}

impl TokenLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token. The flag is `true` when it is the only live token.
    pub fn issue(&self) -> (GuardToken, bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next += 1;
        let token = GuardToken(state.next);
        state.live.insert(token);
        state.acquired += 1;
        (token, state.live.len() == 1)
    }

    /// Issue a token with a caller-chosen id, such as an OS task identifier.
    ///
    /// Returns `false` without recording anything if that id is already live.
    pub fn issue_with(&self, token: GuardToken) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.live.insert(token) {
            return false;
        }
        state.acquired += 1;
        true
    }

    /// Return a token.
    pub fn retire(&self, token: GuardToken) -> Release {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.live.remove(&token) {
            debug!("ignoring release of unknown background {token}");
            return Release::Unknown;
        }
        state.released += 1;
        if state.live.is_empty() {
            Release::Last
        } else {
            Release::Remaining
        }
    }

    /// Whether `token` is live.
    #[must_use]
    pub fn is_live(&self, token: GuardToken) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .contains(&token)
    }

    /// Snapshot of the live tokens, oldest first.
    #[must_use]
    pub fn live_tokens(&self) -> Vec<GuardToken> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tokens: Vec<_> = state.live.iter().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    /// Number of live tokens.
    #[must_use]
    pub fn live(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .len()
    }

    /// Total `(acquired, released)` since creation.
    #[must_use]
    pub fn counts(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.acquired, state.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_and_last_edges() {
        let ledger = TokenLedger::new();
        let (a, first) = ledger.issue();
        assert!(first);
        let (b, first) = ledger.issue();
        assert!(!first);

        assert_eq!(ledger.retire(a), Release::Remaining);
        assert_eq!(ledger.retire(b), Release::Last);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn double_release_is_ignored() {
        let ledger = TokenLedger::new();
        let (token, _) = ledger.issue();
        assert_eq!(ledger.retire(token), Release::Last);
        assert_eq!(ledger.retire(token), Release::Unknown);
        assert_eq!(ledger.retire(GuardToken(99)), Release::Unknown);
        assert_eq!(ledger.counts(), (1, 1));
    }

    #[test]
    fn external_ids_cannot_be_issued_twice() {
        let ledger = TokenLedger::new();
        assert!(ledger.issue_with(GuardToken(7)));
        assert!(!ledger.issue_with(GuardToken(7)));
        assert_eq!(ledger.counts(), (1, 0));
    }
}
