//! Android location source using JNI.
//!
//! Requests go to a host-provided `LocationBridge` object that wraps the fused
//! location provider. The bridge reports back through the `dispatch*` entry
//! points below, keyed by the subscription handle.

use std::sync::LazyLock;

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jdouble, jint, jlong};
use jni::{JNIEnv, JavaVM};
use log::{debug, error};

use crate::{
    LocationError, LocationRequest, LocationResult, LocationSample, LocationSource, RequestMode,
    Subscription, SubscriptionId, SubscriptionRegistry,
};

static REGISTRY: LazyLock<SubscriptionRegistry> = LazyLock::new(SubscriptionRegistry::new);

/// Location source backed by the fused location provider.
pub struct AndroidLocationSource {
    vm: JavaVM,
    bridge: GlobalRef,
}

impl std::fmt::Debug for AndroidLocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndroidLocationSource")
            .field("open_subscriptions", &REGISTRY.len())
            .finish_non_exhaustive()
    }
}

impl AndroidLocationSource {
    /// Create a source from a host `LocationBridge` object.
    ///
    /// # Errors
    /// Returns a [`LocationError`] if the JVM or a global reference cannot be obtained.
    pub fn new(env: &JNIEnv<'_>, bridge: &JObject<'_>) -> LocationResult<Self> {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let bridge = env.new_global_ref(bridge).map_err(map_jni_error)?;
        Ok(Self { vm, bridge })
    }

    fn call_bridge<F>(&self, action: F) -> LocationResult<()>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<()>,
    {
        let mut env = self.vm.attach_current_thread().map_err(map_jni_error)?;
        match action(&mut env, self.bridge.as_obj()) {
            Ok(()) => Ok(()),
            Err(jni::errors::Error::JavaException) => Err(take_exception(&mut env)),
            Err(err) => Err(map_jni_error(err)),
        }
    }
}

impl LocationSource for AndroidLocationSource {
    #[allow(clippy::cast_possible_truncation)]
    fn subscribe(&self, request: LocationRequest) -> LocationResult<Subscription> {
        let subscription = REGISTRY.open();
        let handle = subscription.id();

        let (interval_ms, fastest_ms, max_updates) = match request.mode {
            RequestMode::Continuous {
                interval,
                fastest_interval,
            } => (millis(interval), millis(fastest_interval), 0),
            RequestMode::SingleShot => (0, 0, 1),
        };

        let distance_filter = request.distance_filter_m as f32;
        let result = self.call_bridge(|env, bridge| {
            env.call_method(
                bridge,
                "requestUpdates",
                "(JJJIIF)V",
                &[
                    JValue::Long(handle_raw(handle)),
                    JValue::Long(interval_ms),
                    JValue::Long(fastest_ms),
                    JValue::Int(request.accuracy.android_priority()),
                    JValue::Int(max_updates),
                    JValue::Float(distance_filter),
                ],
            )?;
            Ok(())
        });

        if let Err(err) = result {
            REGISTRY.close(handle);
            return Err(err);
        }

        debug!("registered Android location subscription {handle}");
        Ok(subscription)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if !REGISTRY.close(id) {
            return;
        }

        if let Err(err) = self.call_bridge(|env, bridge| {
            env.call_method(bridge, "removeUpdates", "(J)V", &[JValue::Long(handle_raw(id))])?;
            Ok(())
        }) {
            error!("failed to remove Android location subscription {id}: {err}");
        }
    }
}

fn millis(duration: std::time::Duration) -> jlong {
    jlong::try_from(duration.as_millis()).unwrap_or(jlong::MAX)
}

/// Clear the pending Java exception and classify it.
fn take_exception(env: &mut JNIEnv<'_>) -> LocationError {
    let Ok(throwable) = env.exception_occurred() else {
        return LocationError::Platform("unknown Java exception".into());
    };
    if env.exception_clear().is_err() {
        return LocationError::Platform("failed to clear Java exception".into());
    }

    if env
        .is_instance_of(&throwable, "java/lang/SecurityException")
        .unwrap_or(false)
    {
        return LocationError::PermissionDenied;
    }

    let message = env
        .call_method(&throwable, "toString", "()Ljava/lang/String;", &[])
        .and_then(|value| value.l())
        .and_then(|object| {
            env.get_string(&JString::from(object))
                .map(|text| text.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|_| "Java exception".into());
    LocationError::Platform(message)
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> LocationError {
    LocationError::Platform(err.to_string())
}

#[allow(clippy::cast_possible_wrap)]
const fn handle_raw(id: SubscriptionId) -> jlong {
    id.0 as jlong
}

#[allow(clippy::cast_sign_loss)]
const fn handle_id(handle: jlong) -> SubscriptionId {
    SubscriptionId(handle as u64)
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geotrack_location_LocationBridge_dispatchLocation(
    _env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    latitude: jdouble,
    longitude: jdouble,
) {
    REGISTRY.deliver(handle_id(handle), Ok(LocationSample::new(latitude, longitude)));
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geotrack_location_LocationBridge_dispatchNoLocation(
    _env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
) {
    REGISTRY.deliver(handle_id(handle), Err(LocationError::NotAvailable));
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geotrack_location_LocationBridge_dispatchError(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    handle: jlong,
    permission_denied: jint,
    message: JString<'_>,
) {
    let error = if permission_denied != 0 {
        LocationError::PermissionDenied
    } else {
        match env.get_string(&message) {
            Ok(value) => LocationError::Platform(value.to_string_lossy().into_owned()),
            Err(err) => {
                error!("failed to read Android location error payload: {err}");
                LocationError::Platform("location error".into())
            }
        }
    };
    REGISTRY.deliver(handle_id(handle), Err(error));
}
