//! Linux location source using the GeoClue2 D-Bus service.
//!
//! Each subscription owns one GeoClue client on a dedicated thread and polls
//! its `Location` property at the requested interval.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use futures::executor::block_on;
use futures::{FutureExt, pin_mut, select};
use futures_timer::Delay;
use log::{debug, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Proxy};

use crate::{
    LocationError, LocationRequest, LocationResult, LocationSample, LocationSource, LocationUpdate,
    Subscription, SubscriptionId, SubscriptionRegistry,
};

const GEOCLUE: &str = "org.freedesktop.GeoClue2";
const MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";
const MANAGER_IFACE: &str = "org.freedesktop.GeoClue2.Manager";
const CLIENT_IFACE: &str = "org.freedesktop.GeoClue2.Client";
const LOCATION_IFACE: &str = "org.freedesktop.GeoClue2.Location";
const FIRST_FIX_POLL: Duration = Duration::from_millis(500);

/// Location source backed by GeoClue2.
#[derive(Debug, Clone)]
pub struct HostLocationSource {
    registry: Arc<SubscriptionRegistry>,
    desktop_id: String,
}

impl Default for HostLocationSource {
    fn default() -> Self {
        Self::new("geotrack")
    }
}

impl HostLocationSource {
    /// Create a source. GeoClue requires a desktop id to attribute requests to.
    #[must_use]
    pub fn new(desktop_id: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            desktop_id: desktop_id.into(),
        }
    }
}

impl LocationSource for HostLocationSource {
    fn subscribe(&self, request: LocationRequest) -> LocationResult<Subscription> {
        let subscription = self.registry.open();
        let id = subscription.id();
        let registry = self.registry.clone();
        let desktop_id = self.desktop_id.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("geotrack-geoclue-{}", id.0))
            .spawn(move || block_on(poll_subscription(&registry, id, request, &desktop_id)));

        if let Err(err) = spawned {
            self.registry.close(id);
            return Err(LocationError::Platform(format!(
                "failed to spawn GeoClue poller: {err}"
            )));
        }

        debug!("registered GeoClue subscription {id}");
        Ok(subscription)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.close(id);
    }
}

async fn poll_subscription(
    registry: &SubscriptionRegistry,
    id: SubscriptionId,
    request: LocationRequest,
    desktop_id: &str,
) {
    let client = match GeoClueClient::start(desktop_id, &request).await {
        Ok(client) => client,
        Err(err) => {
            registry.deliver(id, Err(err));
            registry.close(id);
            return;
        }
    };

    let closed = registry.close_signal(id);
    while registry.is_open(id) {
        let update = client.current_fix().await;

        if !reportable(&update) {
            if !pause(FIRST_FIX_POLL, &closed).await {
                break;
            }
            continue;
        }

        if !registry.deliver(id, update) {
            break;
        }

        match request.interval() {
            Some(interval) => {
                if !pause(interval, &closed).await {
                    break;
                }
            }
            None => {
                registry.close(id);
                break;
            }
        }
    }

    client.stop().await;
    debug!("GeoClue subscription {id} finished");
}

/// Whether an update reaches the subscriber. Polls before the first fix are retried instead.
fn reportable(update: &LocationUpdate) -> bool {
    !matches!(update, Err(LocationError::NotAvailable))
}

/// Wait `duration`. Returns `false` if the subscription closed first.
async fn pause(duration: Duration, closed: &Receiver<()>) -> bool {
    let elapsed = Delay::new(duration).fuse();
    let closing = closed.recv().fuse();
    pin_mut!(elapsed, closing);

    select! {
        () = elapsed => true,
        _ = closing => false,
    }
}

struct GeoClueClient {
    connection: Connection,
    path: OwnedObjectPath,
}

impl GeoClueClient {
    async fn start(desktop_id: &str, request: &LocationRequest) -> LocationResult<Self> {
        let connection = Connection::system()
            .await
            .map_err(|e| LocationError::Platform(format!("D-Bus connection failed: {e}")))?;

        let manager = Proxy::new(&connection, GEOCLUE, MANAGER_PATH, MANAGER_IFACE)
            .await
            .map_err(unavailable)?;
        let path: OwnedObjectPath = manager.call("GetClient", &()).await.map_err(unavailable)?;

        let client = Proxy::new(&connection, GEOCLUE, path.as_str(), CLIENT_IFACE)
            .await
            .map_err(platform)?;
        client
            .set_property("DesktopId", desktop_id)
            .await
            .map_err(platform)?;
        client
            .set_property("RequestedAccuracyLevel", request.accuracy.geoclue_level())
            .await
            .map_err(platform)?;

        if request.distance_filter_m > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meters = request.distance_filter_m.ceil() as u32;
            client
                .set_property("DistanceThreshold", meters)
                .await
                .map_err(platform)?;
        }
        if let Some(interval) = request.interval() {
            let seconds = u32::try_from(interval.as_secs()).unwrap_or(u32::MAX);
            client
                .set_property("TimeThreshold", seconds)
                .await
                .map_err(platform)?;
        }

        client.call_method("Start", &()).await.map_err(platform)?;
        drop(client);

        Ok(Self { connection, path })
    }

    async fn current_fix(&self) -> LocationUpdate {
        let client = Proxy::new(&self.connection, GEOCLUE, self.path.as_str(), CLIENT_IFACE)
            .await
            .map_err(platform)?;
        let location_path: OwnedObjectPath =
            client.get_property("Location").await.map_err(platform)?;

        // GeoClue reports "/" until it has a first fix.
        if location_path.as_str() == "/" {
            return Err(LocationError::NotAvailable);
        }

        let location = Proxy::new(&self.connection, GEOCLUE, location_path.as_str(), LOCATION_IFACE)
            .await
            .map_err(platform)?;
        let latitude: f64 = location.get_property("Latitude").await.map_err(platform)?;
        let longitude: f64 = location.get_property("Longitude").await.map_err(platform)?;

        Ok(LocationSample::new(latitude, longitude))
    }

    async fn stop(&self) {
        let result = match Proxy::new(&self.connection, GEOCLUE, self.path.as_str(), CLIENT_IFACE).await {
            Ok(client) => client.call_method("Stop", &()).await.map(drop),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("failed to stop GeoClue client: {err}");
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn unavailable(err: zbus::Error) -> LocationError {
    warn!("GeoClue2 not available: {err}");
    LocationError::ServiceDisabled
}

#[allow(clippy::needless_pass_by_value)]
fn platform(err: impl std::fmt::Display) -> LocationError {
    LocationError::Platform(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_ends_early_when_the_subscription_closes() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (id, _updates) = registry.open().into_parts();
        let closed = registry.close_signal(id);

        let waiter = tokio::spawn(async move { pause(Duration::from_secs(3600), &closed).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.close(id);

        let elapsed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pause outlived unsubscribe")
            .unwrap();
        assert!(!elapsed);
    }

    #[test]
    fn missing_first_fix_is_not_reported() {
        assert!(!reportable(&Err(LocationError::NotAvailable)));
        assert!(reportable(&Err(LocationError::ServiceDisabled)));
        assert!(reportable(&Ok(LocationSample::new(1.0, 2.0))));
    }

    #[tokio::test]
    async fn pause_runs_to_completion_while_open() {
        let registry = SubscriptionRegistry::new();
        let (id, _updates) = registry.open().into_parts();
        assert!(pause(Duration::from_millis(10), &registry.close_signal(id)).await);
    }
}
