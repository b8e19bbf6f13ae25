//! Core types shared by the wire protocol and the telemetry writer.
//!
//! - [`Vector3`] is the 3-component float vector carried on the wire
//! - [`Pose`] pairs a position with an Euler rotation for one tracked object
//! - [`TelemetryRow`] is one timestamped sample of every tracked object
//! - [`PacketType`] is the closed set of packet discriminants
//! - [`PeerId`] and [`Peer`] identify connected remote endpoints
//!
//! ## Usage Example
//!
//! ```rust
//! use posecast::types::{Pose, TelemetryRow, Vector3};
//!
//! let head = Pose::new(Vector3::new(0.0, 1.7, 0.0), Vector3::new(0.0, 90.0, 0.0));
//! let row = TelemetryRow::new(0.02, vec![head]);
//! assert_eq!(row.poses.len(), 1);
//! ```

mod packet_type;
mod peer;
mod pose;
mod vector;

pub use packet_type::PacketType;
pub use peer::{Peer, PeerId};
pub use pose::{Pose, TelemetryRow};
pub use vector::Vector3;
