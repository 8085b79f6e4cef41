//! In-memory capabilities that count every call.
//!
//! Used by the tests in this crate and handy for embedders that want to drive
//! a [`SessionManager`](crate::SessionManager) without an OS underneath.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use geotrack_background::{
    BackgroundError, BackgroundGuard, BackgroundResult, GuardToken, TokenLedger,
};
use geotrack_location::{
    LocationError, LocationRequest, LocationResult, LocationSample, LocationSource,
    LocationUpdate, Subscription, SubscriptionId, SubscriptionRegistry,
};
use geotrack_permission::{
    PermissionGate, PermissionResult, PermissionState, RequestOutcome,
};

use crate::Capabilities;

/// Permission gate with a settable state.
#[derive(Debug)]
pub struct MockPermissionGate {
    state: Mutex<PermissionState>,
    requests: AtomicUsize,
    settings_opened: AtomicUsize,
}

impl MockPermissionGate {
    /// A gate reporting `state`.
    #[must_use]
    pub const fn new(state: PermissionState) -> Self {
        Self {
            state: Mutex::new(state),
            requests: AtomicUsize::new(0),
            settings_opened: AtomicUsize::new(0),
        }
    }

    /// Change the reported state.
    pub fn set_state(&self, state: PermissionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Number of prompt flows started.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of settings deep-links.
    #[must_use]
    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::SeqCst)
    }
}

impl PermissionGate for MockPermissionGate {
    fn query_state(&self) -> PermissionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let outcome = match self.query_state() {
            PermissionState::GrantedAlways => RequestOutcome::AlreadyGranted,
            PermissionState::Denied => RequestOutcome::Blocked,
            PermissionState::NotDetermined | PermissionState::RestrictedForeground => {
                RequestOutcome::Initiated
            }
        };
        Box::pin(async move { Ok(outcome) })
    }

    fn open_settings(&self) -> PermissionResult<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A call recorded by [`MockLocationSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCall {
    /// A subscription was registered.
    Subscribe(SubscriptionId, LocationRequest),
    /// A subscription was cancelled.
    Unsubscribe(SubscriptionId),
}

/// Location source fed by the test.
#[derive(Debug, Default)]
pub struct MockLocationSource {
    registry: SubscriptionRegistry,
    calls: Mutex<Vec<SourceCall>>,
    fail_next: Mutex<Option<LocationError>>,
}

impl MockLocationSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `subscribe` fail with `err`.
    pub fn fail_next_subscribe(&self, err: LocationError) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful subscribes.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SourceCall::Subscribe(..)))
            .count()
    }

    /// Number of unsubscribes.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SourceCall::Unsubscribe(_)))
            .count()
    }

    /// Number of subscriptions still open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.registry.len()
    }

    /// Number of single-shot subscriptions still open.
    #[must_use]
    pub fn open_single_shots(&self) -> usize {
        self.open_matching(true).len()
    }

    /// The most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<LocationRequest> {
        self.calls().iter().rev().find_map(|call| match call {
            SourceCall::Subscribe(_, request) => Some(*request),
            SourceCall::Unsubscribe(_) => None,
        })
    }

    /// Push a sample to the newest open continuous subscription.
    pub fn push_sample(&self, latitude: f64, longitude: f64) -> bool {
        self.push_update(Ok(LocationSample::new(latitude, longitude)))
    }

    /// Push an update to the newest open continuous subscription.
    pub fn push_update(&self, update: LocationUpdate) -> bool {
        self.open_matching(false)
            .last()
            .is_some_and(|id| self.registry.deliver(*id, update))
    }

    /// Answer the newest open single-shot subscription.
    pub fn resolve_single_shot(&self, update: LocationUpdate) -> bool {
        self.open_matching(true)
            .last()
            .is_some_and(|id| self.registry.deliver(*id, update))
    }

    /// Close the newest continuous subscription as if the OS dropped it.
    pub fn drop_continuous(&self) -> bool {
        self.open_matching(false)
            .last()
            .is_some_and(|id| self.registry.close(*id))
    }

    fn open_matching(&self, single_shot: bool) -> Vec<SubscriptionId> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                SourceCall::Subscribe(id, request)
                    if request.is_single_shot() == single_shot && self.registry.is_open(*id) =>
                {
                    Some(*id)
                }
                _ => None,
            })
            .collect()
    }
}

impl LocationSource for MockLocationSource {
    fn subscribe(&self, request: LocationRequest) -> LocationResult<Subscription> {
        if let Some(err) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(err);
        }
        let subscription = self.registry.open();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SourceCall::Subscribe(subscription.id(), request));
        Ok(subscription)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SourceCall::Unsubscribe(id));
        self.registry.close(id);
    }
}

/// Background guard that can refuse and expire tokens on demand.
#[derive(Debug, Default)]
pub struct MockBackgroundGuard {
    ledger: TokenLedger,
    refusing: AtomicBool,
}

impl MockBackgroundGuard {
    /// A guard that grants everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or stop refusing) further acquires.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Expire every live token, as the OS does when the budget runs out.
    pub fn expire_all(&self) -> usize {
        let tokens = self.ledger.live_tokens();
        for token in &tokens {
            self.ledger.retire(*token);
        }
        tokens.len()
    }

    /// Total `(acquired, released)`, counting OS expiry as a release.
    #[must_use]
    pub fn counts(&self) -> (u64, u64) {
        self.ledger.counts()
    }
}

impl BackgroundGuard for MockBackgroundGuard {
    fn acquire(&self) -> BackgroundResult<GuardToken> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(BackgroundError::Refused("budget exhausted".into()));
        }
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

/// The three mocks, kept typed so tests can inspect them.
#[derive(Debug, Clone)]
pub struct MockCapabilities {
    /// Permission mock.
    pub permission: Arc<MockPermissionGate>,
    /// Source mock.
    pub source: Arc<MockLocationSource>,
    /// Guard mock.
    pub guard: Arc<MockBackgroundGuard>,
}

impl MockCapabilities {
    /// Mocks with the permission in `state`.
    #[must_use]
    pub fn with_permission(state: PermissionState) -> Self {
        Self {
            permission: Arc::new(MockPermissionGate::new(state)),
            source: Arc::new(MockLocationSource::new()),
            guard: Arc::new(MockBackgroundGuard::new()),
        }
    }

    /// Mocks holding the always grant.
    #[must_use]
    pub fn granted() -> Self {
        Self::with_permission(PermissionState::GrantedAlways)
    }

    /// Type-erased bundle for a [`SessionManager`](crate::SessionManager).
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            self.permission.clone(),
            self.source.clone(),
            self.guard.clone(),
        )
    }
}
