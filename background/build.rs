//! Build script for geotrack-background.

use std::{env, path::PathBuf};

const APPLE_BRIDGE: &str = "src/sys/apple/mod.rs";

fn main() {
    println!("cargo:rerun-if-changed={APPLE_BRIDGE}");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "ios" || target_os == "macos" {
        let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        swift_bridge_build::parse_bridges(vec![APPLE_BRIDGE])
            .write_all_concatenated(out_dir, env!("CARGO_PKG_NAME"));
    }
}
