//! Android permission gate using JNI.
//!
//! Talks to the host `Activity` directly: `checkSelfPermission` for the current
//! grant, `requestPermissions` for the prompt and an application-details intent
//! for the settings deep-link.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use jni::objects::{GlobalRef, JClass, JObject, JValue};
use jni::sys::{jboolean, jint, JNI_FALSE};
use jni::{JNIEnv, JavaVM};
use log::{error, warn};

use crate::{PermissionError, PermissionGate, PermissionResult, PermissionState, RequestOutcome};

/// Request code passed to `requestPermissions`; the host forwards results for it.
pub const PERMISSION_REQUEST_CODE: jint = 123;

const FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
const COARSE_LOCATION: &str = "android.permission.ACCESS_COARSE_LOCATION";
const BACKGROUND_LOCATION: &str = "android.permission.ACCESS_BACKGROUND_LOCATION";

/// `Build.VERSION_CODES.Q`, the first release with a separate background grant.
const SDK_Q: jint = 29;
const PERMISSION_GRANTED: jint = 0;

/// Set once the user answered a prompt with a refusal. Android cannot tell a
/// refused grant from an unasked one, so the last answer is remembered here.
static DENIED_BY_USER: AtomicBool = AtomicBool::new(false);

/// Permission gate backed by the host `Activity`.
pub struct AndroidPermissionGate {
    vm: JavaVM,
    activity: GlobalRef,
}

impl std::fmt::Debug for AndroidPermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndroidPermissionGate").finish_non_exhaustive()
    }
}

impl AndroidPermissionGate {
    /// Create a gate bound to an `Activity`.
    ///
    /// # Errors
    /// Returns a [`PermissionError`] if the JVM or a global reference cannot be obtained.
    pub fn new(env: &JNIEnv<'_>, activity: &JObject<'_>) -> PermissionResult<Self> {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let activity = env.new_global_ref(activity).map_err(map_jni_error)?;
        Ok(Self { vm, activity })
    }

    fn with_env<T, F>(&self, action: F) -> PermissionResult<T>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<T>,
    {
        let mut env = self.vm.attach_current_thread().map_err(map_jni_error)?;
        action(&mut env, self.activity.as_obj()).map_err(map_jni_error)
    }

    fn read_state(&self) -> PermissionResult<PermissionState> {
        self.with_env(|env, activity| {
            let sdk = sdk_int(env)?;
            let fine = is_granted(env, activity, FINE_LOCATION)?;
            let coarse = is_granted(env, activity, COARSE_LOCATION)?;
            let background = if sdk >= SDK_Q {
                is_granted(env, activity, BACKGROUND_LOCATION)?
            } else {
                true
            };

            Ok(if fine && coarse && background {
                PermissionState::GrantedAlways
            } else if fine || coarse {
                PermissionState::RestrictedForeground
            } else if DENIED_BY_USER.load(Ordering::Acquire) {
                PermissionState::Denied
            } else {
                PermissionState::NotDetermined
            })
        })
    }
}

impl PermissionGate for AndroidPermissionGate {
    fn query_state(&self) -> PermissionState {
        self.read_state().unwrap_or_else(|err| {
            warn!("failed to read Android location permission: {err}");
            PermissionState::NotDetermined
        })
    }

    fn request_permission(&self) -> BoxFuture<'_, PermissionResult<RequestOutcome>> {
        Box::pin(async move {
            match self.read_state()? {
                PermissionState::GrantedAlways => return Ok(RequestOutcome::AlreadyGranted),
                PermissionState::Denied => return Ok(RequestOutcome::Blocked),
                PermissionState::NotDetermined | PermissionState::RestrictedForeground => {}
            }

            self.with_env(|env, activity| {
                let mut wanted = vec![FINE_LOCATION, COARSE_LOCATION];
                if sdk_int(env)? >= SDK_Q {
                    wanted.push(BACKGROUND_LOCATION);
                }

                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let array =
                    env.new_object_array(wanted.len() as jint, "java/lang/String", JObject::null())?;
                for (index, name) in wanted.iter().enumerate() {
                    let name = env.new_string(name)?;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    env.set_object_array_element(&array, index as jint, name)?;
                }

                let array = JObject::from(array);
                env.call_method(
                    activity,
                    "requestPermissions",
                    "([Ljava/lang/String;I)V",
                    &[JValue::Object(&array), JValue::Int(PERMISSION_REQUEST_CODE)],
                )?;
                Ok(())
            })?;

            Ok(RequestOutcome::Initiated)
        })
    }

    fn open_settings(&self) -> PermissionResult<()> {
        self.with_env(|env, activity| open_app_settings(env, activity))
    }
}

fn sdk_int(env: &mut JNIEnv<'_>) -> jni::errors::Result<jint> {
    env.get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
        .i()
}

fn is_granted(env: &mut JNIEnv<'_>, activity: &JObject<'_>, permission: &str) -> jni::errors::Result<bool> {
    let name = env.new_string(permission)?;
    let status = env
        .call_method(
            activity,
            "checkSelfPermission",
            "(Ljava/lang/String;)I",
            &[JValue::Object(&name)],
        )?
        .i()?;
    Ok(status == PERMISSION_GRANTED)
}

fn open_app_settings(env: &mut JNIEnv<'_>, activity: &JObject<'_>) -> jni::errors::Result<()> {
    let action = env.new_string("android.settings.APPLICATION_DETAILS_SETTINGS")?;
    let intent = env.new_object(
        "android/content/Intent",
        "(Ljava/lang/String;)V",
        &[JValue::Object(&action)],
    )?;

    let scheme = env.new_string("package")?;
    let package = env
        .call_method(activity, "getPackageName", "()Ljava/lang/String;", &[])?
        .l()?;
    let uri = env
        .call_static_method(
            "android/net/Uri",
            "fromParts",
            "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)Landroid/net/Uri;",
            &[
                JValue::Object(&scheme),
                JValue::Object(&package),
                JValue::Object(&JObject::null()),
            ],
        )?
        .l()?;

    env.call_method(
        &intent,
        "setData",
        "(Landroid/net/Uri;)Landroid/content/Intent;",
        &[JValue::Object(&uri)],
    )?;
    env.call_method(
        activity,
        "startActivity",
        "(Landroid/content/Intent;)V",
        &[JValue::Object(&intent)],
    )?;
    Ok(())
}

/// Called by the host from `onRequestPermissionsResult` for [`PERMISSION_REQUEST_CODE`].
///
/// A refusal is remembered so the next request reports a blocked grant, and on
/// Android 10+ the user is sent straight to the app's settings page.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_geotrack_permission_PermissionBridge_onPermissionResult(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    activity: JObject<'_>,
    all_granted: jboolean,
) {
    let granted = all_granted != JNI_FALSE;
    DENIED_BY_USER.store(!granted, Ordering::Release);
    if granted {
        return;
    }

    let result = sdk_int(&mut env).and_then(|sdk| {
        if sdk >= SDK_Q {
            open_app_settings(&mut env, &activity)
        } else {
            Ok(())
        }
    });
    if let Err(err) = result {
        error!("failed to open settings after permission denial: {err}");
    }
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> PermissionError {
    PermissionError::Platform(err.to_string())
}
