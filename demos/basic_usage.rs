// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic beacon-sdk usage example.
//!
//! Demonstrates:
//! 1. Loading a tracker config from TOML
//! 2. Starting a session and recording a few events
//! 3. Letting the heartbeat flush and deliver
//! 4. Inspecting queues and health counters
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=beacon_sdk=debug cargo run --example basic_usage
//! ```
//!
//! Point `url` at a collector you control; without one every delivery fails
//! and the requests stay queued in `./beacon-demo.db`.

use std::time::Duration;

use beacon_sdk::{EventInput, SdkConfig, TrackerBuilder};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
app_key = "demo-app-key"
url = "http://localhost:8080"
app_version = "1.4.2"
native_storage_path = "./beacon-demo.db"
interval_ms = 250
fail_timeout_secs = 5
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let config = SdkConfig::from_toml(CONFIG)?;
    let tracker = TrackerBuilder::new(config).build().await?;
    println!("storage: {}, device: {}", tracker.storage_backend(), tracker.device_id().await);

    tracker.begin_session(false).await;
    tracker.begin_view("home").await;
    for i in 0..5 {
        tracker
            .enqueue_event(EventInput::new("button_click").segment("index", i))
            .await;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    tracker.end_session(None, false).await;

    let queues = tracker.get_queues().await;
    let health = tracker.health();
    println!(
        "queued requests: {}, queued events: {}, errors: {}, last status: {}",
        queues.requests.len(),
        queues.events.len(),
        health.error_count,
        health.status_code
    );

    tracker.stop();
    Ok(())
}
