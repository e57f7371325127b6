// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal publisher: emit a JSON reading on `sensors.imu` at ~100 Hz.
//!
//! Run a nexus first (`lark-nexus`), then:
//!
//! ```sh
//! cargo run --example sender
//! ```

use lark::endpoint::{Publisher, PublisherConfig};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let publisher = Publisher::new(PublisherConfig::default())?;
    // Give discovery a beacon interval to find the nexus.
    std::thread::sleep(Duration::from_secs(1));

    loop {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
        let reading = format!(
            "{{\"ts\":{:.6},\"acc\":{{\"x\":{:.4},\"y\":0.0,\"z\":9.81}}}}",
            ts,
            ts.sin()
        );
        publisher.send("sensors.imu", reading.as_bytes())?;
        std::thread::sleep(Duration::from_millis(10));
    }
}
