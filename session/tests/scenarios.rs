//! End-to-end session scenarios driven through the mock capabilities.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use geotrack_background::BackgroundGuard;
use geotrack_location::{LocationError, LocationSample};
use geotrack_session::mock::{MockCapabilities, SourceCall};
use geotrack_session::{
    ChannelEventSink, CommandChannel, MethodCall, PermissionState, Reply, SessionManager,
    SessionPhase, TrackingConfig, TrackingError, TrackingEvent,
};
use serde_json::{Value, json};

struct Harness {
    mocks: MockCapabilities,
    manager: SessionManager,
    events: Receiver<TrackingEvent>,
}

impl Harness {
    fn new(permission: PermissionState) -> Self {
        Self::with_config(permission, TrackingConfig::default())
    }

    fn with_config(permission: PermissionState, config: TrackingConfig) -> Self {
        let mocks = MockCapabilities::with_permission(permission);
        let (sink, events) = ChannelEventSink::new();
        let manager = SessionManager::new(mocks.capabilities(), config, Arc::new(sink));
        Self {
            mocks,
            manager,
            events,
        }
    }

    async fn next_event(&self) -> TrackingEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("no event within 2s")
            .expect("event channel closed")
    }

    fn assert_no_more_events(&self) {
        assert!(self.events.try_recv().is_err(), "unexpected extra event");
    }

    fn assert_guard_balanced(&self) {
        let (acquired, released) = self.mocks.guard.counts();
        assert_eq!(acquired, released, "acquire/release mismatch");
        assert_eq!(self.mocks.guard.held(), 0);
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn start_then_stop_leaves_idle_and_stop_is_idempotent() {
    for seconds in [1, 30, 60, 3600] {
        let harness = Harness::new(PermissionState::GrantedAlways);
        let channel = CommandChannel::bound(harness.manager.clone());

        let start = channel
            .handle(MethodCall::new(
                "startLocationTracking",
                json!({"intervalSeconds": seconds}),
            ))
            .await;
        assert_eq!(start, Reply::success(true));
        assert_eq!(harness.manager.phase(), SessionPhase::Active);

        for _ in 0..2 {
            let stop = channel
                .handle(MethodCall::new("stopLocationTracking", Value::Null))
                .await;
            assert_eq!(stop, Reply::success(true));
            assert_eq!(harness.manager.phase(), SessionPhase::Idle);
        }

        assert_eq!(harness.mocks.source.subscribe_count(), 1);
        assert_eq!(harness.mocks.source.unsubscribe_count(), 1);
        harness.assert_guard_balanced();
    }
}

#[tokio::test]
async fn start_requires_the_always_grant() {
    for permission in [
        PermissionState::NotDetermined,
        PermissionState::Denied,
        PermissionState::RestrictedForeground,
    ] {
        let harness = Harness::new(permission);
        let channel = CommandChannel::bound(harness.manager.clone());

        let reply = channel
            .handle(MethodCall::new(
                "startLocationTracking",
                json!({"intervalSeconds": 60}),
            ))
            .await;

        assert_eq!(reply, Reply::success(false), "{permission:?}");
        assert_eq!(harness.manager.phase(), SessionPhase::Idle);
        assert_eq!(harness.mocks.source.subscribe_count(), 0);
        assert_eq!(harness.mocks.guard.counts(), (0, 0));
        harness.assert_no_more_events();
    }
}

#[tokio::test]
async fn update_interval_swaps_exactly_one_subscription() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(30)).unwrap();
    harness.manager.update_interval(Duration::from_secs(10)).unwrap();

    let calls = harness.mocks.source.calls();
    assert_eq!(calls.len(), 3);
    let SourceCall::Subscribe(first, first_request) = calls[0] else {
        panic!("expected subscribe, got {:?}", calls[0]);
    };
    assert_eq!(first_request.interval(), Some(Duration::from_secs(30)));
    assert_eq!(calls[1], SourceCall::Unsubscribe(first));
    let SourceCall::Subscribe(second, second_request) = calls[2] else {
        panic!("expected subscribe, got {:?}", calls[2]);
    };
    assert_ne!(first, second);
    assert_eq!(second_request.interval(), Some(Duration::from_secs(10)));

    assert_eq!(harness.mocks.source.open_subscriptions(), 1);
    assert_eq!(harness.mocks.guard.held(), 1);
    assert_eq!(harness.manager.phase(), SessionPhase::Active);

    harness.manager.stop();
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn guard_stays_balanced_across_samples_errors_and_stop() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(5)).unwrap();

    assert!(harness.mocks.source.push_sample(10.0, 20.0));
    assert!(matches!(
        harness.next_event().await,
        TrackingEvent::LocationUpdate { .. }
    ));

    assert!(
        harness
            .mocks
            .source
            .push_update(Err(LocationError::NotAvailable))
    );
    assert!(matches!(
        harness.next_event().await,
        TrackingEvent::TrackingError { .. }
    ));

    harness.manager.update_interval(Duration::from_secs(10)).unwrap();
    assert!(harness.mocks.source.push_sample(11.0, 21.0));
    harness.next_event().await;

    harness.manager.stop();
    harness.assert_guard_balanced();
    let (acquired, _) = harness.mocks.guard.counts();
    assert_eq!(acquired, 5, "two starts plus three renewals");
}

#[tokio::test]
async fn sample_then_stop_emits_one_location_update() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    let channel = CommandChannel::bound(harness.manager.clone());

    channel
        .handle(MethodCall::new(
            "startLocationTracking",
            json!({"intervalSeconds": 30}),
        ))
        .await;
    assert!(harness.mocks.source.push_sample(1.0, 2.0));
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::LocationUpdate {
            latitude: 1.0,
            longitude: 2.0
        }
    );
    channel
        .handle(MethodCall::new("stopLocationTracking", Value::Null))
        .await;

    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    harness.assert_no_more_events();
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn sampling_error_keeps_the_session_active() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(30)).unwrap();

    harness
        .mocks
        .source
        .push_update(Err(LocationError::Platform("provider reset".into())));
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::error("Location error: provider reset")
    );
    assert_eq!(harness.manager.phase(), SessionPhase::Active);

    harness
        .mocks
        .source
        .push_update(Err(LocationError::PermissionDenied));
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::error("Location permission denied")
    );
    assert_eq!(harness.manager.phase(), SessionPhase::Active);

    harness.manager.stop();
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn subscribe_failure_reports_and_stays_idle() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness
        .mocks
        .source
        .fail_next_subscribe(LocationError::ServiceDisabled);

    assert!(harness.manager.start(Duration::from_secs(30)).is_err());
    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::error("Failed to start tracking: location services disabled")
    );
    assert_eq!(harness.mocks.guard.counts(), (0, 0));
}

#[tokio::test]
async fn refused_renewal_stops_the_session() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(30)).unwrap();
    harness.mocks.guard.set_refusing(true);

    harness.mocks.source.push_sample(3.0, 4.0);
    assert!(matches!(
        harness.next_event().await,
        TrackingEvent::LocationUpdate { .. }
    ));
    assert!(matches!(
        harness.next_event().await,
        TrackingEvent::TrackingError { .. }
    ));

    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    assert_eq!(harness.mocks.source.open_subscriptions(), 0);
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn dropped_subscription_resumes_on_foreground() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(20)).unwrap();

    assert!(harness.mocks.source.drop_continuous());
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::error("Location updates stopped unexpectedly")
    );
    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    assert_eq!(harness.mocks.guard.held(), 0);

    harness.manager.enter_foreground();
    assert_eq!(harness.manager.phase(), SessionPhase::Active);
    assert_eq!(
        harness.mocks.source.last_request().and_then(|r| r.interval()),
        Some(Duration::from_secs(20))
    );

    harness.manager.stop();
    harness.manager.enter_foreground();
    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn background_entry_replaces_an_expired_grant() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(30)).unwrap();

    assert_eq!(harness.mocks.guard.expire_all(), 1);
    harness.manager.enter_background();
    assert_eq!(harness.mocks.guard.held(), 1);

    harness.manager.enter_background();
    assert_eq!(harness.mocks.guard.counts().0, 2, "live grant is kept");

    harness.manager.stop();
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn current_location_resolves_and_cleans_up() {
    let harness = Harness::new(PermissionState::RestrictedForeground);
    let manager = harness.manager.clone();
    let request = tokio::spawn(async move { manager.get_current_location().await });

    let source = harness.mocks.source.clone();
    eventually("single-shot subscription", || source.open_single_shots() == 1).await;
    assert!(
        harness
            .mocks
            .source
            .resolve_single_shot(Ok(LocationSample::new(48.1, 11.6)))
    );

    let sample = request.await.unwrap().unwrap();
    assert_eq!(sample, LocationSample::new(48.1, 11.6));
    assert_eq!(harness.mocks.source.open_subscriptions(), 0);
    assert!(!harness.manager.has_pending_request());
    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn second_request_supersedes_the_first() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    let first = tokio::spawn({
        let manager = harness.manager.clone();
        async move { manager.get_current_location().await }
    });
    let source = harness.mocks.source.clone();
    eventually("first subscription", || source.subscribe_count() == 1).await;

    let second = tokio::spawn({
        let manager = harness.manager.clone();
        async move { manager.get_current_location().await }
    });
    eventually("second subscription", || source.subscribe_count() == 2).await;

    assert!(matches!(
        first.await.unwrap(),
        Err(TrackingError::Superseded)
    ));

    harness
        .mocks
        .source
        .resolve_single_shot(Ok(LocationSample::new(1.0, 1.0)));
    assert!(second.await.unwrap().is_ok());

    assert_eq!(harness.mocks.source.open_subscriptions(), 0);
    assert!(!harness.manager.has_pending_request());
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn unanswered_request_times_out_with_no_location() {
    let config = TrackingConfig {
        single_shot_timeout_secs: 1,
        ..TrackingConfig::default()
    };
    let harness = Harness::with_config(PermissionState::GrantedAlways, config);

    let err = harness.manager.get_current_location().await.unwrap_err();
    assert_eq!(err.code(), "NO_LOCATION");
    assert_eq!(harness.mocks.source.open_subscriptions(), 0);
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn no_fix_maps_to_no_location_over_the_channel() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    let channel = CommandChannel::bound(harness.manager.clone());
    let reply = tokio::spawn(async move {
        channel
            .handle_json(r#"{"method":"getCurrentLocation"}"#)
            .await
    });

    let source = harness.mocks.source.clone();
    eventually("single-shot subscription", || source.open_single_shots() == 1).await;
    source.resolve_single_shot(Err(LocationError::NotAvailable));

    let reply: Value = serde_json::from_str(&reply.await.unwrap()).unwrap();
    assert_eq!(reply["error"]["code"], "NO_LOCATION");
}

#[tokio::test]
async fn shutdown_cancels_pending_and_stops_tracking() {
    let harness = Harness::new(PermissionState::GrantedAlways);
    harness.manager.start(Duration::from_secs(30)).unwrap();

    let request = tokio::spawn({
        let manager = harness.manager.clone();
        async move { manager.get_current_location().await }
    });
    let source = harness.mocks.source.clone();
    eventually("single-shot subscription", || source.open_single_shots() == 1).await;

    harness.manager.shutdown();
    assert!(matches!(
        request.await.unwrap(),
        Err(TrackingError::Cancelled)
    ));
    assert_eq!(harness.manager.phase(), SessionPhase::Idle);
    harness.assert_guard_balanced();
}

#[tokio::test]
async fn permission_changes_surface_or_escalate() {
    let harness = Harness::new(PermissionState::RestrictedForeground);

    harness
        .manager
        .permission_changed(PermissionState::RestrictedForeground)
        .await;
    assert_eq!(harness.mocks.permission.requests(), 1);
    harness.assert_no_more_events();

    harness
        .manager
        .permission_changed(PermissionState::Denied)
        .await;
    assert_eq!(
        harness.next_event().await,
        TrackingEvent::error("Location permission denied")
    );
}
