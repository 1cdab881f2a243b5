//! Payload builders for server tests.

use nimbus_control::ResourceGroupState::{Absent, Failed, Pending, Running, Succeeded};
use nimbus_control::SimulatedPlatform;
use serde_json::{json, Value};

/// The deployment request from the end-to-end scenario.
pub fn deployment(group: &str, transaction_id: &str) -> Value {
    json!({
        "group": group,
        "image": "repo/app:latest",
        "transactionId": transaction_id,
    })
}

pub fn payload(body: &Value) -> Vec<u8> {
    serde_json::to_vec(body).unwrap()
}

/// A platform where a fresh group runs to success and prints `logs`.
pub fn succeeding_platform(logs: &str) -> SimulatedPlatform {
    SimulatedPlatform::new()
        .with_lifecycle([Absent, Pending, Running, Succeeded])
        .with_logs(logs)
}

/// A platform where a fresh group starts running and never finishes.
pub fn stuck_platform() -> SimulatedPlatform {
    SimulatedPlatform::new().with_lifecycle([Absent, Pending, Running])
}

/// A platform where a fresh group runs and then fails.
pub fn failing_platform() -> SimulatedPlatform {
    SimulatedPlatform::new()
        .with_lifecycle([Absent, Pending, Running, Failed])
        .with_logs("stack trace")
}
