//! # Geotrack
//!
//! Background location tracking for cross-platform application shells.
//!
//! Geotrack runs one tracking session at a time on top of three OS
//! capabilities, each in its own crate:
//!
//! - `permission`: the location grant and its prompt flow.
//! - `location`: continuous and single-shot location sources.
//! - `background`: foreground services and background tasks that keep sampling alive.
//! - `session`: the session manager and the command/event channel the shell talks to.
//!
//! `session` is on by default and pulls in the others. Use `full` to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! geotrack = { version = "0.1", features = ["session"] }
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use geotrack::session::{Capabilities, ChannelEventSink, SessionManager, TrackingConfig};
//!
//! async fn track() {
//!     let (sink, events) = ChannelEventSink::new();
//!     let manager = SessionManager::new(
//!         Capabilities::unsupported(),
//!         TrackingConfig::default(),
//!         Arc::new(sink),
//!     );
//!     if manager.start(Duration::from_secs(30)).is_ok() {
//!         while let Ok(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     }
//! }
//! ```

pub use geotrack_permission as permission;

#[cfg(feature = "location")]
pub use geotrack_location as location;

#[cfg(feature = "background")]
pub use geotrack_background as background;

#[cfg(feature = "session")]
pub use geotrack_session as session;
