use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use geotrack_permission::{PermissionGate, request_or_open_settings};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{SessionManager, TrackingError, TrackingResult};

/// A request from the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Command name.
    pub method: String,
    /// Command arguments, usually an object or null.
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    /// Build a call.
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// The commands the channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the permission prompt flow.
    RequestBackgroundPermission,
    /// Start tracking. `None` means the configured default interval.
    StartLocationTracking {
        /// Requested interval in seconds.
        interval_seconds: Option<i64>,
    },
    /// Stop tracking.
    StopLocationTracking,
    /// Change the interval. `None` means the configured default interval.
    UpdateInterval {
        /// Requested interval in seconds.
        interval_seconds: Option<i64>,
    },
    /// Fetch one fix.
    GetCurrentLocation,
}

impl Command {
    /// Parse a call. Unknown methods give `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`TrackingError::InvalidArgument`] if `intervalSeconds` is not an integer.
    pub fn parse(call: &MethodCall) -> TrackingResult<Option<Self>> {
        let command = match call.method.as_str() {
            "requestBackgroundPermission" => Self::RequestBackgroundPermission,
            "startLocationTracking" => Self::StartLocationTracking {
                interval_seconds: interval_argument(&call.arguments)?,
            },
            "stopLocationTracking" => Self::StopLocationTracking,
            "updateInterval" => Self::UpdateInterval {
                interval_seconds: interval_argument(&call.arguments)?,
            },
            "getCurrentLocation" => Self::GetCurrentLocation,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn interval_argument(arguments: &Value) -> TrackingResult<Option<i64>> {
    let value = match arguments {
        Value::Null => None,
        Value::Object(map) => map.get("intervalSeconds"),
        other => {
            return Err(TrackingError::InvalidArgument(format!(
                "arguments must be an object, got {other}"
            )));
        }
    };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            TrackingError::InvalidArgument(format!("intervalSeconds must be an integer, got {value}"))
        }),
    }
}

/// The single answer to a [`MethodCall`].
///
/// Serialises as `{"success": value}`, `{"error": {"code", "message"}}` or
/// `"notImplemented"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Reply {
    /// The command completed with a value.
    Success(Value),
    /// The command failed with a structured error.
    Error {
        /// One of the stable codes from [`TrackingError::code`].
        code: String,
        /// Human-readable description.
        message: String,
    },
    /// The method is unknown.
    NotImplemented,
}

impl Reply {
    /// A success carrying `value`.
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success(value.into())
    }

    /// A structured error for `err`.
    #[must_use]
    pub fn error(err: &TrackingError) -> Self {
        Self::Error {
            code: err.code().into(),
            message: err.to_string(),
        }
    }

    /// Serialise for the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            error!("failed to serialise reply: {err}");
            r#"{"error":{"code":"LOCATION_ERROR","message":"failed to serialise reply"}}"#.into()
        })
    }
}

/// The single command handler facing the embedding application.
///
/// The session manager can be bound and unbound at any time, the way an
/// Android activity binds to its tracking service. Permission commands work
/// while unbound; session commands answer `false` or `SERVICE_UNAVAILABLE`.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    permission: Arc<dyn PermissionGate>,
    session: Arc<RwLock<Option<SessionManager>>>,
}

impl CommandChannel {
    /// An unbound channel.
    pub fn new(permission: Arc<dyn PermissionGate>) -> Self {
        Self {
            permission,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// A channel bound to `manager`, sharing its permission gate.
    #[must_use]
    pub fn bound(manager: SessionManager) -> Self {
        let channel = Self::new(manager.capabilities().permission.clone());
        channel.bind(manager);
        channel
    }

    /// Attach a session manager, replacing any previous one.
    pub fn bind(&self, manager: SessionManager) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(manager);
        debug!("session manager bound");
    }

    /// Detach the session manager. The session itself keeps running.
    pub fn unbind(&self) -> Option<SessionManager> {
        let previous = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("session manager unbound");
        previous
    }

    /// Whether a session manager is attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn session(&self) -> Option<SessionManager> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Answer one call.
    pub async fn handle(&self, call: MethodCall) -> Reply {
        let command = match Command::parse(&call) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!("method {} not implemented", call.method);
                return Reply::NotImplemented;
            }
            Err(err) => {
                warn!("rejecting {}: {err}", call.method);
                return Reply::success(false);
            }
        };

        match command {
            Command::RequestBackgroundPermission => match self.request_permission().await {
                Ok(initiated) => Reply::success(initiated),
                Err(err) => {
                    warn!("permission request failed: {err}");
                    Reply::success(false)
                }
            },
            Command::StartLocationTracking { interval_seconds } => {
                self.run("startLocationTracking", |session| {
                    session.start(resolve_interval(session, interval_seconds)?)
                })
            }
            Command::StopLocationTracking => self.run("stopLocationTracking", |session| {
                session.stop();
                Ok(())
            }),
            Command::UpdateInterval { interval_seconds } => {
                self.run("updateInterval", |session| {
                    session.update_interval(resolve_interval(session, interval_seconds)?)
                })
            }
            Command::GetCurrentLocation => self.current_location().await,
        }
    }

    /// Answer a JSON-encoded [`MethodCall`] with a JSON-encoded [`Reply`].
    pub async fn handle_json(&self, call: &str) -> String {
        let reply = match serde_json::from_str::<MethodCall>(call) {
            Ok(call) => self.handle(call).await,
            Err(err) => {
                warn!("malformed method call: {err}");
                Reply::error(&TrackingError::InvalidArgument(err.to_string()))
            }
        };
        reply.to_json()
    }

    fn run<F>(&self, method: &str, action: F) -> Reply
    where
        F: FnOnce(&SessionManager) -> TrackingResult<()>,
    {
        let Some(session) = self.session() else {
            warn!("{method}: no session manager bound");
            return Reply::success(false);
        };
        match action(&session) {
            Ok(()) => Reply::success(true),
            Err(err) => {
                warn!("{method} failed: {err}");
                Reply::success(false)
            }
        }
    }

    async fn request_permission(&self) -> TrackingResult<bool> {
        match self.session() {
            Some(session) => session.request_permission().await,
            None => Ok(request_or_open_settings(self.permission.as_ref()).await?),
        }
    }

    async fn current_location(&self) -> Reply {
        if !self.permission.query_state().allows_single_shot() {
            return Reply::error(&TrackingError::PermissionDenied);
        }
        let Some(session) = self.session() else {
            return Reply::error(&TrackingError::ServiceUnavailable);
        };
        match session.get_current_location().await {
            Ok(sample) => Reply::success(json!({
                "latitude": sample.latitude,
                "longitude": sample.longitude,
            })),
            Err(err) => Reply::error(&err),
        }
    }
}

fn resolve_interval(session: &SessionManager, seconds: Option<i64>) -> TrackingResult<Duration> {
    let Some(seconds) = seconds else {
        return Ok(session.config().default_interval());
    };
    match u64::try_from(seconds) {
        Ok(seconds) if seconds > 0 => Ok(Duration::from_secs(seconds)),
        _ => Err(TrackingError::InvalidInterval),
    }
}
