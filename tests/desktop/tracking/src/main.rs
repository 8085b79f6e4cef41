//! Desktop test binary for geotrack.
//!
//! Run with: RUST_LOG=debug cargo run -p geotrack-location-test -- [interval-seconds] [samples]

use std::sync::Arc;
use std::time::Duration;

use geotrack_session::{
    Capabilities, ChannelEventSink, CommandChannel, SessionManager, TrackingConfig,
};

#[cfg(target_os = "linux")]
fn capabilities() -> Capabilities {
    Capabilities::host()
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn capabilities() -> Capabilities {
    Capabilities::apple()
}

#[cfg(not(any(target_os = "linux", target_os = "ios", target_os = "macos")))]
fn capabilities() -> Capabilities {
    Capabilities::unsupported()
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let interval: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(5);
    let samples: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(3);

    println!("=== geotrack session test ===\n");

    let (sink, events) = ChannelEventSink::new();
    let manager = SessionManager::new(capabilities(), TrackingConfig::default(), Arc::new(sink));
    println!("Permission state: {:?}", manager.permission_state());
    let channel = CommandChannel::bound(manager.clone());

    let reply = channel
        .handle_json(r#"{"method":"requestBackgroundPermission"}"#)
        .await;
    println!("requestBackgroundPermission -> {reply}");

    println!("\nGetting current location...");
    let reply = channel
        .handle_json(r#"{"method":"getCurrentLocation"}"#)
        .await;
    println!("getCurrentLocation -> {reply}");

    let start = serde_json::json!({
        "method": "startLocationTracking",
        "arguments": { "intervalSeconds": interval },
    });
    let reply = channel.handle_json(&start.to_string()).await;
    println!("\nstartLocationTracking({interval}) -> {reply}");

    let wait = Duration::from_secs(interval * 3 + 30);
    for n in 1..=samples {
        match tokio::time::timeout(wait, events.recv()).await {
            Ok(Ok(event)) => println!(
                "  event {n}: {}",
                serde_json::to_string(&event).unwrap_or_default()
            ),
            Ok(Err(_)) => break,
            Err(_) => {
                println!("  no event within {}s", wait.as_secs());
                break;
            }
        }
    }

    let reply = channel
        .handle_json(r#"{"method":"stopLocationTracking"}"#)
        .await;
    println!("\nstopLocationTracking -> {reply}");

    manager.shutdown();
    log::info!("session test finished");
}
