//! Recording pose telemetry to CSV files.
//!
//! ```text
//! Frame,Head_Pos.X,Head_Pos.Y,Head_Pos.Z,Head_Rot.X,Head_Rot.Y,Head_Rot.Z,...
//! 0.020000,0.000000,1.700000,0.000000,0.000000,90.000000,0.000000,...
//! ```
//!
//! One header line, then one line per [`TelemetryRow`](crate::types::TelemetryRow):
//! the timestamp followed by six values per tracked object. Numbers always
//! use six decimals and a `.` separator whatever the host locale.
//!
//! - [`TelemetryWriter`] buffers rows and flushes them in batches
//! - [`Recording`] loads a finished file for analysis

pub mod format;
mod reader;
mod writer;

pub use reader::Recording;
pub use writer::{ListenerId, RecordingStats, TelemetryWriter};
