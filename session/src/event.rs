use async_channel::{Receiver, Sender};
use geotrack_location::LocationSample;
use log::warn;
use serde::Serialize;

/// An event pushed to the embedding application.
///
/// Serialises as `{"method": "...", "arguments": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "arguments")]
pub enum TrackingEvent {
    /// A sample arrived while tracking.
    #[serde(rename = "onLocationUpdate")]
    LocationUpdate {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
    /// Tracking hit a problem. The session may still be active.
    #[serde(rename = "onTrackingError")]
    TrackingError {
        /// Human-readable description.
        message: String,
    },
}

impl TrackingEvent {
    /// Build an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::TrackingError {
            message: message.into(),
        }
    }

    /// The method name used on the wire.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::LocationUpdate { .. } => "onLocationUpdate",
            Self::TrackingError { .. } => "onTrackingError",
        }
    }
}

impl From<LocationSample> for TrackingEvent {
    fn from(sample: LocationSample) -> Self {
        Self::LocationUpdate {
            latitude: sample.latitude,
            longitude: sample.longitude,
        }
    }
}

/// Destination for tracking events. Must not block.
///
/// Events are emitted after the session lock is released, so a sink may call
/// back into the [`SessionManager`](crate::SessionManager).
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Deliver one event. Fire-and-forget.
    fn emit(&self, event: TrackingEvent);
}

/// An [`EventSink`] that forwards into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: Sender<TrackingEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver the embedder reads events from.
    #[must_use]
    pub fn new() -> (Self, Receiver<TrackingEvent>) {
        let (sender, receiver) = async_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: TrackingEvent) {
        if let Err(err) = self.sender.try_send(event) {
            warn!("dropping {} event, receiver gone", err.into_inner().method());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn location_update_wire_shape() {
        let event = TrackingEvent::from(LocationSample::new(1.0, 2.0));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"method": "onLocationUpdate", "arguments": {"latitude": 1.0, "longitude": 2.0}})
        );
    }

    #[test]
    fn error_wire_shape() {
        let event = TrackingEvent::error("Location permission denied");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"method": "onTrackingError", "arguments": {"message": "Location permission denied"}})
        );
    }

    #[test]
    fn emitting_after_receiver_dropped_does_not_panic() {
        let (sink, receiver) = ChannelEventSink::new();
        drop(receiver);
        sink.emit(TrackingEvent::error("late"));
    }
}
