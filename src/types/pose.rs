//! Pose samples and telemetry rows

use serde::{Deserialize, Serialize};

use super::Vector3;

/// Position and Euler rotation of a single tracked object
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub rotation: Vector3,
}

impl Pose {
    pub const fn new(position: Vector3, rotation: Vector3) -> Self {
        Self { position, rotation }
    }
}

/// One timestamped sample of every tracked object
///
/// Poses follow the configured object order. The number of poses is expected
/// to match the configured object count, but a mismatch is tolerated: the row
/// is still recorded with whatever poses are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryRow {
    /// Seconds since the sampler was reset
    pub timestamp: f32,

    /// One pose per tracked object
    pub poses: Vec<Pose>,
}

impl TelemetryRow {
    pub fn new(timestamp: f32, poses: Vec<Pose>) -> Self {
        Self { timestamp, poses }
    }

    /// Whether this row carries exactly `object_count` poses
    pub fn matches_object_count(&self, object_count: usize) -> bool {
        self.poses.len() == object_count
    }
}
