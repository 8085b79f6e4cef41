use std::sync::Arc;

use geotrack_background::BackgroundGuard;
use geotrack_location::LocationSource;
use geotrack_permission::PermissionGate;

/// The OS capabilities a session runs on.
///
/// One adapter per platform fills this in; the session logic is shared.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Location permission state and prompts.
    pub permission: Arc<dyn PermissionGate>,
    /// Location samples.
    pub source: Arc<dyn LocationSource>,
    /// Background execution grants.
    pub guard: Arc<dyn BackgroundGuard>,
}

impl Capabilities {
    /// Bundle three adapters.
    pub const fn new(
        permission: Arc<dyn PermissionGate>,
        source: Arc<dyn LocationSource>,
        guard: Arc<dyn BackgroundGuard>,
    ) -> Self {
        Self {
            permission,
            source,
            guard,
        }
    }

    /// Adapters for targets without location support. Tracking never starts.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::new(
            Arc::new(geotrack_permission::sys::UnsupportedPermissionGate),
            Arc::new(geotrack_location::sys::UnsupportedLocationSource),
            Arc::new(geotrack_background::sys::NoopGuard::default()),
        )
    }

    /// Desktop Linux: GeoClue2 positions, no prompts, no background limits.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn host() -> Self {
        Self::new(
            Arc::new(geotrack_permission::sys::linux::HostPermissionGate),
            Arc::new(geotrack_location::sys::linux::HostLocationSource::default()),
            Arc::new(geotrack_background::sys::NoopGuard::default()),
        )
    }

    /// iOS and macOS: Core Location plus UIKit background tasks.
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    #[must_use]
    pub fn apple() -> Self {
        Self::new(
            Arc::new(geotrack_permission::sys::apple::ApplePermissionGate::new()),
            Arc::new(geotrack_location::sys::apple::AppleLocationSource::new()),
            Arc::new(geotrack_background::sys::apple::BackgroundTaskGuard::new()),
        )
    }

    /// Android: runtime permissions on `activity`, the fused provider behind
    /// `location_bridge`, and the foreground service behind `service_bridge`.
    ///
    /// # Errors
    /// Returns a [`TrackingError`](crate::TrackingError) if a JNI reference cannot be taken.
    #[cfg(target_os = "android")]
    pub fn android(
        env: &jni::JNIEnv<'_>,
        activity: &jni::objects::JObject<'_>,
        location_bridge: &jni::objects::JObject<'_>,
        service_bridge: &jni::objects::JObject<'_>,
        notification: geotrack_background::NotificationConfig,
    ) -> crate::TrackingResult<Self> {
        use geotrack_background::sys::android::ForegroundServiceGuard;
        use geotrack_location::sys::android::AndroidLocationSource;
        use geotrack_permission::sys::android::AndroidPermissionGate;

        Ok(Self::new(
            Arc::new(AndroidPermissionGate::new(env, activity)?),
            Arc::new(AndroidLocationSource::new(env, location_bridge)?),
            Arc::new(ForegroundServiceGuard::new(env, service_bridge, notification)?),
        ))
    }
}
