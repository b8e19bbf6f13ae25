//! Test utilities shared by unit tests and benchmarks
//!
//! Loopback configuration with short timeouts, deterministic pose rows, and
//! polling helpers for waiting on background connection tasks.

#![cfg(any(test, feature = "benchmark"))]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{DispatchQueue, NetEvent};
use crate::types::{Pose, TelemetryRow, Vector3};

/// Upper bound for any single wait in networking tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracked objects used across tests, in wire order
pub fn object_names() -> Vec<String> {
    ["Head", "LeftHand", "RightHand"].iter().map(|name| name.to_string()).collect()
}

/// Loopback config on an OS-assigned port with a 100 ms retry backoff
pub fn test_config() -> Config {
    Config {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        retry_backoff_ms: 100,
        connect_timeout_ms: 1_000,
        handshake_timeout_ms: 2_000,
        object_names: object_names(),
        ..Config::default()
    }
}

/// Row whose values encode the timestamp and object index, so rows are easy to tell apart
pub fn sample_row(timestamp: f32, objects: usize) -> TelemetryRow {
    let poses = (0..objects)
        .map(|i| {
            let base = i as f32;
            Pose::new(
                Vector3::new(base, timestamp, -base),
                Vector3::new(base * 10.0, 90.0, timestamp * 2.0),
            )
        })
        .collect();
    TelemetryRow::new(timestamp, poses)
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drain `queue` into an accumulated list until `done` accepts it or `timeout` elapses
pub async fn collect_events<F>(queue: &DispatchQueue, timeout: Duration, mut done: F) -> Vec<NetEvent>
where
    F: FnMut(&[NetEvent]) -> bool,
{
    let mut events = Vec::new();
    wait_until(timeout, || {
        events.extend(queue.drain_all());
        done(&events)
    })
    .await;
    events
}

/// Number of events of one shape in `events`
pub fn count_events<F>(events: &[NetEvent], predicate: F) -> usize
where
    F: Fn(&NetEvent) -> bool,
{
    events.iter().filter(|event| predicate(event)).count()
}
