use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_channel::Receiver;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::{FutureExt, pin_mut, select};
use futures_timer::Delay;
use geotrack_background::GuardLease;
use geotrack_location::{LocationError, LocationSample, LocationUpdate, SubscriptionId};
use geotrack_permission::{PermissionState, request_or_open_settings};
use log::{debug, info, warn};

use crate::{
    Capabilities, EventSink, TrackingConfig, TrackingError, TrackingEvent, TrackingResult,
};

/// Whether a continuous session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No subscription, no background grant.
    Idle,
    /// Subscribed and holding a background grant.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    Superseded,
    Shutdown,
}

#[derive(Debug)]
struct ActiveSession {
    subscription: SubscriptionId,
    lease: Option<GuardLease>,
}

#[derive(Debug)]
struct PendingResult {
    ticket: u64,
    cancel: oneshot::Sender<CancelReason>,
}

#[derive(Debug)]
struct SessionState {
    interval: Duration,
    active: Option<ActiveSession>,
    pending: Option<PendingResult>,
    // The source closed a live session; resume it on the next foreground.
    interrupted: bool,
    // Emitted once the lock is released.
    outbox: Vec<TrackingEvent>,
}

#[derive(Debug)]
struct Shared {
    capabilities: Capabilities,
    config: TrackingConfig,
    sink: Arc<dyn EventSink>,
    state: Mutex<SessionState>,
    next_ticket: AtomicU64,
}

/// Owner of the process-wide tracking session.
///
/// All transitions go through one lock, including samples arriving from the
/// location source, so `start`, `stop` and `update_interval` never interleave.
/// Clones share the same session.
///
/// While [`Active`](SessionPhase::Active) the manager holds exactly one
/// subscription and one background lease. Each delivered sample or error
/// renews the lease (acquire the new one, then release the old one), so every
/// acquire is paired with exactly one release.
#[derive(Debug, Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create an idle manager.
    #[must_use]
    pub fn new(capabilities: Capabilities, config: TrackingConfig, sink: Arc<dyn EventSink>) -> Self {
        let interval = config.default_interval();
        Self {
            shared: Arc::new(Shared {
                capabilities,
                config,
                sink,
                state: Mutex::new(SessionState {
                    interval,
                    active: None,
                    pending: None,
                    interrupted: false,
                    outbox: Vec::new(),
                }),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &TrackingConfig {
        &self.shared.config
    }

    /// The adapters this manager drives.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.shared.capabilities
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.shared.lock().active.is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        }
    }

    /// The interval of the running session, or the one the next start defaults to.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.shared.lock().interval
    }

    /// Whether a single-shot request is outstanding.
    #[must_use]
    pub fn has_pending_request(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    /// The grant currently reported by the OS.
    #[must_use]
    pub fn permission_state(&self) -> PermissionState {
        self.shared.capabilities.permission.query_state()
    }

    /// Start sampling every `interval`.
    ///
    /// Succeeds without resubscribing if a session is already running.
    ///
    /// # Errors
    /// - [`TrackingError::InvalidInterval`] for a zero interval.
    /// - [`TrackingError::PermissionDenied`] unless the always grant is held.
    /// - The mapped source or guard error if either refused. The session stays idle.
    pub fn start(&self, interval: Duration) -> TrackingResult<()> {
        if interval.is_zero() {
            return Err(TrackingError::InvalidInterval);
        }
        self.shared.transition(|state| {
            if state.active.is_some() {
                debug!("tracking already active");
                return Ok(());
            }
            self.shared.activate(state, interval)
        })
    }

    /// Stop sampling and give the background grant back. No-op while idle.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.interrupted = false;
        if !self.shared.deactivate(&mut state) {
            debug!("stop requested while idle");
        }
    }

    /// Change the sampling interval.
    ///
    /// While active this tears the subscription down and registers a new one;
    /// while idle it only changes the interval the next start uses.
    ///
    /// # Errors
    /// Same as [`start`](Self::start). A failed restart leaves the session idle.
    pub fn update_interval(&self, interval: Duration) -> TrackingResult<()> {
        if interval.is_zero() {
            return Err(TrackingError::InvalidInterval);
        }
        self.shared.transition(|state| {
            state.interval = interval;
            if state.active.is_none() {
                debug!("stored interval {}s for the next session", interval.as_secs());
                return Ok(());
            }
            self.shared.deactivate(state);
            self.shared.activate(state, interval)
        })
    }

    /// Ask the OS for one fix, independent of the continuous session.
    ///
    /// A newer call supersedes an older pending one, which then resolves with
    /// [`TrackingError::Superseded`]. Every call resolves exactly once. Dropping
    /// the future before it resolves cancels the request.
    ///
    /// # Errors
    /// - [`TrackingError::PermissionDenied`] without at least the foreground grant.
    /// - [`TrackingError::LocationUnavailable`] if no fix arrives in time.
    /// - [`TrackingError::Superseded`] or [`TrackingError::Cancelled`] if the
    ///   request was replaced or the manager shut down.
    /// - [`TrackingError::Source`] for other source failures.
    pub async fn get_current_location(&self) -> TrackingResult<LocationSample> {
        let shared = &self.shared;
        let permission = shared.capabilities.permission.query_state();
        if !permission.allows_single_shot() {
            info!("not requesting location, permission is {permission:?}");
            return Err(TrackingError::PermissionDenied);
        }

        let (cancel, cancelled) = oneshot::channel();
        let ticket = shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        let subscription = {
            let mut state = shared.lock();
            if let Some(previous) = state.pending.take() {
                debug!("single-shot request {} superseded by {ticket}", previous.ticket);
                let _ = previous.cancel.send(CancelReason::Superseded);
            }
            let subscription = shared
                .capabilities
                .source
                .subscribe(shared.config.single_shot_request())?;
            state.pending = Some(PendingResult { ticket, cancel });
            subscription
        };

        let (id, updates) = subscription.into_parts();
        let _request = SingleShot {
            shared,
            subscription: id,
            ticket,
        };

        let _lease = match GuardLease::acquire(&shared.capabilities.guard) {
            Ok(lease) => Some(lease),
            Err(err) => {
                warn!("single-shot request {ticket} runs without a background grant: {err}");
                None
            }
        };

        let result = wait_for_fix(&updates, cancelled, shared.config.single_shot_timeout()).await;

        match &result {
            Ok(sample) => debug!("single-shot request {ticket} resolved with {sample:?}"),
            Err(err) => debug!("single-shot request {ticket} failed: {err}"),
        }
        result
    }

    /// Run the OS permission prompt flow.
    ///
    /// Returns `false` if the grant is terminally denied; the user is sent to
    /// system settings in that case.
    ///
    /// # Errors
    /// Returns [`TrackingError::Permission`] if the prompt could not be issued.
    pub async fn request_permission(&self) -> TrackingResult<bool> {
        request_or_open_settings(self.shared.capabilities.permission.as_ref())
            .await
            .map_err(TrackingError::from)
    }

    /// React to a grant change reported by the OS.
    ///
    /// A denial is surfaced as an error event; a foreground-only grant is
    /// escalated with another request for the always grant.
    pub async fn permission_changed(&self, state: PermissionState) {
        match state {
            PermissionState::Denied => {
                warn!("location permission denied");
                self.shared
                    .sink
                    .emit(TrackingEvent::error("Location permission denied"));
            }
            PermissionState::RestrictedForeground => {
                info!("location granted while in use only, asking for always");
                if let Err(err) = self.shared.capabilities.permission.request_permission().await {
                    warn!("failed to escalate location permission: {err}");
                }
            }
            PermissionState::GrantedAlways => info!("location granted always"),
            PermissionState::NotDetermined => {}
        }
    }

    /// The app moved to the background. Re-acquires the lease if the OS expired it.
    pub fn enter_background(&self) {
        self.shared.transition(|state| {
            let Some(active) = state.active.as_mut() else {
                return;
            };
            if active.lease.as_ref().is_some_and(GuardLease::is_live) {
                return;
            }

            match GuardLease::acquire(&self.shared.capabilities.guard) {
                Ok(fresh) => {
                    debug!("re-acquired expired background grant");
                    active.lease = Some(fresh);
                }
                Err(err) => {
                    warn!("cannot keep tracking in the background: {err}");
                    state
                        .outbox
                        .push(TrackingEvent::error(format!("Background tracking stopped: {err}")));
                    self.shared.deactivate(state);
                }
            }
        });
    }

    /// The app returned to the foreground. Restarts a session the source dropped.
    pub fn enter_foreground(&self) {
        self.shared.transition(|state| {
            if state.active.is_some() || !state.interrupted {
                return;
            }
            let interval = state.interval;
            info!("resuming interrupted tracking");
            if let Err(err) = self.shared.activate(state, interval) {
                warn!("failed to resume tracking: {err}");
            }
        });
    }

    /// Tear everything down: stop the session and cancel a pending single-shot request.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.interrupted = false;
        if let Some(pending) = state.pending.take() {
            let _ = pending.cancel.send(CancelReason::Shutdown);
        }
        self.shared.deactivate(&mut state);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `change` under the lock, then hand queued events to the sink.
    ///
    /// The sink runs unlocked, so it may call back into the manager.
    fn transition<R>(&self, change: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, events) = {
            let mut state = self.lock();
            let result = change(&mut state);
            (result, std::mem::take(&mut state.outbox))
        };
        for event in events {
            self.sink.emit(event);
        }
        result
    }

    fn activate(self: &Arc<Self>, state: &mut SessionState, interval: Duration) -> TrackingResult<()> {
        let permission = self.capabilities.permission.query_state();
        if !permission.allows_tracking() {
            info!("not starting tracking, permission is {permission:?}");
            return Err(TrackingError::PermissionDenied);
        }
        state.interval = interval;

        let request = self.config.continuous_request(interval);
        let subscription = match self.capabilities.source.subscribe(request) {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!("failed to subscribe for location updates: {err}");
                state
                    .outbox
                    .push(TrackingEvent::error(format!("Failed to start tracking: {err}")));
                return Err(err.into());
            }
        };
        let (id, updates) = subscription.into_parts();

        let lease = match GuardLease::acquire(&self.capabilities.guard) {
            Ok(lease) => lease,
            Err(err) => {
                warn!("background execution refused: {err}");
                self.capabilities.source.unsubscribe(id);
                return Err(err.into());
            }
        };

        if let Err(err) = spawn_pump(Arc::downgrade(self), id, updates) {
            self.capabilities.source.unsubscribe(id);
            lease.release();
            return Err(err);
        }

        state.active = Some(ActiveSession {
            subscription: id,
            lease: Some(lease),
        });
        state.interrupted = false;
        info!("tracking started every {}s on subscription {id}", interval.as_secs());
        Ok(())
    }

    /// Returns whether a session was running.
    fn deactivate(&self, state: &mut SessionState) -> bool {
        let Some(active) = state.active.take() else {
            return false;
        };
        self.capabilities.source.unsubscribe(active.subscription);
        drop(active.lease);
        info!("tracking stopped on subscription {}", active.subscription);
        true
    }

    /// Forward one update. Returns `false` once the subscription is no longer current.
    fn deliver(&self, id: SubscriptionId, update: LocationUpdate) -> bool {
        self.transition(|state| {
            let Some(active) = state.active.as_mut().filter(|a| a.subscription == id) else {
                debug!("dropping update for stale subscription {id}");
                return false;
            };

            let event = match update {
                Ok(sample) => {
                    debug!("location update {sample:?}");
                    sample.into()
                }
                Err(err) => {
                    warn!("location error on subscription {id}: {err}");
                    TrackingEvent::error(error_message(&err))
                }
            };

            match GuardLease::acquire(&self.capabilities.guard) {
                Ok(fresh) => {
                    active.lease = Some(fresh);
                    state.outbox.push(event);
                    true
                }
                Err(err) => {
                    warn!("failed to renew background grant: {err}");
                    state.outbox.push(event);
                    state
                        .outbox
                        .push(TrackingEvent::error(format!("Background tracking stopped: {err}")));
                    self.deactivate(state);
                    false
                }
            }
        })
    }

    fn subscription_closed(&self, id: SubscriptionId) {
        self.transition(|state| {
            if !state.active.as_ref().is_some_and(|a| a.subscription == id) {
                return;
            }
            warn!("location source closed subscription {id}");
            self.deactivate(state);
            state.interrupted = true;
            state
                .outbox
                .push(TrackingEvent::error("Location updates stopped unexpectedly"));
        });
    }
}

/// Cleanup for one single-shot request, run however its future ends.
struct SingleShot<'a> {
    shared: &'a Shared,
    subscription: SubscriptionId,
    ticket: u64,
}

impl Drop for SingleShot<'_> {
    fn drop(&mut self) {
        self.shared.capabilities.source.unsubscribe(self.subscription);
        let mut state = self.shared.lock();
        if state.pending.as_ref().is_some_and(|p| p.ticket == self.ticket) {
            state.pending = None;
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = state.active.take() {
            self.capabilities.source.unsubscribe(active.subscription);
        }
    }
}

fn error_message(err: &LocationError) -> String {
    match err {
        LocationError::PermissionDenied => "Location permission denied".into(),
        other => format!("Location error: {other}"),
    }
}

fn spawn_pump(
    shared: Weak<Shared>,
    id: SubscriptionId,
    updates: Receiver<LocationUpdate>,
) -> TrackingResult<()> {
    std::thread::Builder::new()
        .name(format!("geotrack-session-{}", id.0))
        .spawn(move || block_on(pump(&shared, id, &updates)))
        .map(drop)
        .map_err(|err| TrackingError::Source(format!("failed to spawn sample pump: {err}")))
}

async fn pump(shared: &Weak<Shared>, id: SubscriptionId, updates: &Receiver<LocationUpdate>) {
    while let Ok(update) = updates.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.deliver(id, update) {
            return;
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.subscription_closed(id);
    }
}

async fn wait_for_fix(
    updates: &Receiver<LocationUpdate>,
    cancelled: oneshot::Receiver<CancelReason>,
    timeout: Duration,
) -> TrackingResult<LocationSample> {
    let fix = updates.recv().fuse();
    let expiry = Delay::new(timeout).fuse();
    let mut cancelled = cancelled.fuse();
    pin_mut!(fix, expiry);

    select! {
        update = fix => match update {
            Ok(Ok(sample)) => Ok(sample),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(TrackingError::LocationUnavailable),
        },
        reason = cancelled => match reason {
            Ok(CancelReason::Superseded) => Err(TrackingError::Superseded),
            Ok(CancelReason::Shutdown) | Err(_) => Err(TrackingError::Cancelled),
        },
        () = expiry => {
            info!("single-shot request timed out after {}s", timeout.as_secs());
            Err(TrackingError::LocationUnavailable)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelEventSink;
    use crate::mock::MockCapabilities;
    use geotrack_background::BackgroundGuard;
    use std::sync::OnceLock;

    fn manager(mocks: &MockCapabilities) -> SessionManager {
        let (sink, _events) = ChannelEventSink::new();
        SessionManager::new(mocks.capabilities(), TrackingConfig::default(), Arc::new(sink))
    }

    #[test]
    fn zero_interval_is_rejected_before_touching_the_source() {
        let mocks = MockCapabilities::granted();
        let manager = manager(&mocks);
        assert!(matches!(
            manager.start(Duration::ZERO),
            Err(TrackingError::InvalidInterval)
        ));
        assert_eq!(mocks.source.subscribe_count(), 0);
    }

    #[test]
    fn idle_update_only_stores_interval() {
        let mocks = MockCapabilities::granted();
        let manager = manager(&mocks);
        manager.update_interval(Duration::from_secs(15)).unwrap();
        assert_eq!(manager.phase(), SessionPhase::Idle);
        assert_eq!(manager.interval(), Duration::from_secs(15));
        assert_eq!(mocks.source.subscribe_count(), 0);
    }

    #[test]
    fn second_start_does_not_resubscribe() {
        let mocks = MockCapabilities::granted();
        let manager = manager(&mocks);
        manager.start(Duration::from_secs(30)).unwrap();
        manager.start(Duration::from_secs(10)).unwrap();
        assert_eq!(mocks.source.subscribe_count(), 1);
        assert_eq!(manager.interval(), Duration::from_secs(30));
        manager.stop();
    }

    #[test]
    fn refused_guard_rolls_back_the_subscription() {
        let mocks = MockCapabilities::granted();
        mocks.guard.set_refusing(true);
        let manager = manager(&mocks);
        assert!(matches!(
            manager.start(Duration::from_secs(30)),
            Err(TrackingError::Background(_))
        ));
        assert_eq!(manager.phase(), SessionPhase::Idle);
        assert_eq!(mocks.source.open_subscriptions(), 0);
    }

    #[test]
    fn dropping_the_manager_unsubscribes() {
        let mocks = MockCapabilities::granted();
        let manager = manager(&mocks);
        manager.start(Duration::from_secs(30)).unwrap();
        drop(manager);
        assert_eq!(mocks.source.open_subscriptions(), 0);
        assert_eq!(mocks.guard.held(), 0);
    }

    #[tokio::test]
    async fn abandoned_single_shot_releases_its_subscription() {
        let mocks = MockCapabilities::granted();
        let manager = manager(&mocks);
        for _ in 0..5 {
            let waited =
                tokio::time::timeout(Duration::from_millis(20), manager.get_current_location()).await;
            assert!(waited.is_err());
        }
        assert_eq!(mocks.source.subscribe_count(), 5);
        assert_eq!(mocks.source.open_subscriptions(), 0);
        assert!(!manager.has_pending_request());
        assert_eq!(mocks.guard.held(), 0);
    }

    #[tokio::test]
    async fn request_permission_opens_settings_when_blocked() {
        let mocks = MockCapabilities::with_permission(PermissionState::Denied);
        let manager = manager(&mocks);
        assert!(!manager.request_permission().await.unwrap());
        assert_eq!(mocks.permission.requests(), 1);
        assert_eq!(mocks.permission.settings_opened(), 1);

        mocks.permission.set_state(PermissionState::NotDetermined);
        assert!(manager.request_permission().await.unwrap());
        assert_eq!(mocks.permission.settings_opened(), 1);
    }

    #[derive(Debug)]
    struct StoppingSink {
        manager: OnceLock<SessionManager>,
        seen: async_channel::Sender<TrackingEvent>,
    }

    impl EventSink for StoppingSink {
        fn emit(&self, event: TrackingEvent) {
            if let Some(manager) = self.manager.get() {
                manager.stop();
            }
            let _ = self.seen.try_send(event);
        }
    }

    #[tokio::test]
    async fn sink_may_stop_the_session_it_is_called_from() {
        let mocks = MockCapabilities::granted();
        let (seen, events) = async_channel::unbounded();
        let sink = Arc::new(StoppingSink {
            manager: OnceLock::new(),
            seen,
        });
        let manager = SessionManager::new(mocks.capabilities(), TrackingConfig::default(), sink.clone());
        sink.manager.set(manager.clone()).unwrap();

        manager.start(Duration::from_secs(30)).unwrap();
        assert!(mocks.source.push_sample(1.0, 2.0));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("sink callback deadlocked")
            .unwrap();
        assert_eq!(event, TrackingEvent::from(LocationSample::new(1.0, 2.0)));
        assert_eq!(manager.phase(), SessionPhase::Idle);
        assert_eq!(mocks.source.open_subscriptions(), 0);
        assert_eq!(mocks.guard.held(), 0);
    }

    #[test]
    fn permission_errors_use_the_fixed_message() {
        assert_eq!(
            error_message(&LocationError::PermissionDenied),
            "Location permission denied"
        );
        assert_eq!(
            error_message(&LocationError::Platform("gps".into())),
            "Location error: gps"
        );
    }
}
