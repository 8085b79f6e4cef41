//! Android foreground-service guard using JNI.
//!
//! All tokens share one foreground service: it is started when the first token
//! is issued and stopped when the last one is returned. The service itself is
//! a host-provided `TrackingServiceBridge`.

use jni::objects::{GlobalRef, JObject, JValue};
use jni::{JNIEnv, JavaVM};
use log::{error, info};

use crate::{
    BackgroundError, BackgroundGuard, BackgroundResult, GuardToken, NotificationConfig, Release,
    TokenLedger,
};

/// Guard backed by an Android foreground service.
pub struct ForegroundServiceGuard {
    vm: JavaVM,
    service: GlobalRef,
    notification: NotificationConfig,
    ledger: TokenLedger,
}

impl std::fmt::Debug for ForegroundServiceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundServiceGuard")
            .field("notification", &self.notification)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl ForegroundServiceGuard {
    /// Create a guard from a host `TrackingServiceBridge` object.
    ///
    /// # Errors
    /// Returns a [`BackgroundError`] if the JVM or a global reference cannot be obtained.
    pub fn new(
        env: &JNIEnv<'_>,
        service: &JObject<'_>,
        notification: NotificationConfig,
    ) -> BackgroundResult<Self> {
        let vm = env.get_java_vm().map_err(map_jni_error)?;
        let service = env.new_global_ref(service).map_err(map_jni_error)?;
        Ok(Self {
            vm,
            service,
            notification,
            ledger: TokenLedger::new(),
        })
    }

    fn call_service<F>(&self, action: F) -> BackgroundResult<()>
    where
        F: FnOnce(&mut JNIEnv<'_>, &JObject<'_>) -> jni::errors::Result<()>,
    {
        let mut env = self.vm.attach_current_thread().map_err(map_jni_error)?;
        let result = action(&mut env, self.service.as_obj());
        if matches!(result, Err(jni::errors::Error::JavaException)) {
            // A pending exception would poison every later call on this thread.
            let _ = env.exception_clear();
            return Err(BackgroundError::Refused(
                "foreground service call threw".into(),
            ));
        }
        result.map_err(map_jni_error)
    }

    fn start_foreground(&self) -> BackgroundResult<()> {
        let notification = &self.notification;
        self.call_service(|env, service| {
            let channel_id = env.new_string(&notification.channel_id)?;
            let channel_name = env.new_string(&notification.channel_name)?;
            let title = env.new_string(&notification.title)?;
            let text = env.new_string(&notification.text)?;
            env.call_method(
                service,
                "startForegroundTracking",
                "(Ljava/lang/String;Ljava/lang/String;ILjava/lang/String;Ljava/lang/String;)V",
                &[
                    JValue::Object(&channel_id),
                    JValue::Object(&channel_name),
                    JValue::Int(notification.notification_id),
                    JValue::Object(&title),
                    JValue::Object(&text),
                ],
            )?;
            Ok(())
        })
    }

    fn stop_foreground(&self) -> BackgroundResult<()> {
        self.call_service(|env, service| {
            env.call_method(service, "stopForegroundTracking", "()V", &[])?;
            Ok(())
        })
    }
}

impl BackgroundGuard for ForegroundServiceGuard {
    fn acquire(&self) -> BackgroundResult<GuardToken> {
        let (token, first) = self.ledger.issue();
        if first {
            if let Err(err) = self.start_foreground() {
                self.ledger.retire(token);
                return Err(err);
            }
            info!("foreground service started");
        }
        Ok(token)
    }

    fn release(&self, token: GuardToken) {
        if self.ledger.retire(token) == Release::Last {
            match self.stop_foreground() {
                Ok(()) => info!("foreground service stopped"),
                Err(err) => error!("failed to stop foreground service: {err}"),
            }
        }
    }

    fn is_held(&self, token: GuardToken) -> bool {
        self.ledger.is_live(token)
    }

    fn held(&self) -> usize {
        self.ledger.live()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn map_jni_error(err: jni::errors::Error) -> BackgroundError {
    BackgroundError::Platform(err.to_string())
}
