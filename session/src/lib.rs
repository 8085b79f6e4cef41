//! Location tracking sessions.
//!
//! A [`SessionManager`] owns at most one continuous tracking session. It
//! checks the [`PermissionGate`](geotrack_permission::PermissionGate),
//! subscribes a [`LocationSource`](geotrack_location::LocationSource), keeps a
//! [`BackgroundGuard`](geotrack_background::BackgroundGuard) lease while
//! active, and forwards every sample or error to an [`EventSink`].
//!
//! The embedding application talks to it through a [`CommandChannel`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use geotrack_session::{
//!     Capabilities, ChannelEventSink, CommandChannel, SessionManager, TrackingConfig,
//! };
//!
//! # async fn run() {
//! let (sink, events) = ChannelEventSink::new();
//! let manager = SessionManager::new(
//!     Capabilities::unsupported(),
//!     TrackingConfig::default(),
//!     Arc::new(sink),
//! );
//! let channel = CommandChannel::bound(manager);
//!
//! let reply = channel
//!     .handle_json(r#"{"method":"startLocationTracking","arguments":{"intervalSeconds":30}}"#)
//!     .await;
//! println!("{reply}");
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

#![warn(missing_docs)]

mod capabilities;
mod channel;
mod config;
mod error;
mod event;
mod manager;
pub mod mock;

pub use capabilities::Capabilities;
pub use channel::{Command, CommandChannel, MethodCall, Reply};
pub use config::TrackingConfig;
pub use error::{TrackingError, TrackingResult};
pub use event::{ChannelEventSink, EventSink, TrackingEvent};
pub use manager::{SessionManager, SessionPhase};

pub use geotrack_location::LocationSample;
pub use geotrack_permission::PermissionState;
