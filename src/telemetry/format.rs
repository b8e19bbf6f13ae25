//! CSV text layout shared by the writer and the reader

use std::fmt::Write;

use crate::types::TelemetryRow;

/// Name of the timestamp column
pub const FRAME_COLUMN: &str = "Frame";

/// Per-object column suffixes, position before rotation
pub const COMPONENT_SUFFIXES: [&str; 6] = ["Pos.X", "Pos.Y", "Pos.Z", "Rot.X", "Rot.Y", "Rot.Z"];

/// `Frame,<name>_Pos.X,...,<name>_Rot.Z` for each object in order
pub fn header_line(object_names: &[String]) -> String {
    let mut line = String::from(FRAME_COLUMN);
    for name in object_names {
        for suffix in COMPONENT_SUFFIXES {
            let _ = write!(line, ",{}_{}", name, suffix);
        }
    }
    line
}

/// Timestamp then every pose component, six fixed decimals with a `.` separator
pub fn format_row(row: &TelemetryRow) -> String {
    let mut line = String::with_capacity(12 + row.poses.len() * 6 * 12);
    let _ = write!(line, "{:.6}", row.timestamp);
    for pose in &row.poses {
        for value in pose.position.to_array().into_iter().chain(pose.rotation.to_array()) {
            let _ = write!(line, ",{:.6}", value);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pose, Vector3};

    #[test]
    fn header_lists_six_columns_per_object() {
        let names = vec!["Head".to_string(), "LeftHand".to_string()];
        assert_eq!(
            header_line(&names),
            "Frame,Head_Pos.X,Head_Pos.Y,Head_Pos.Z,Head_Rot.X,Head_Rot.Y,Head_Rot.Z,\
             LeftHand_Pos.X,LeftHand_Pos.Y,LeftHand_Pos.Z,LeftHand_Rot.X,LeftHand_Rot.Y,LeftHand_Rot.Z"
        );
        assert_eq!(header_line(&[]), "Frame");
    }

    #[test]
    fn rows_use_six_fixed_decimals() {
        let row = TelemetryRow::new(
            0.02,
            vec![Pose::new(Vector3::new(1.0, -2.5, 0.125), Vector3::new(0.0, 90.0, 12.25))],
        );
        assert_eq!(format_row(&row), "0.020000,1.000000,-2.500000,0.125000,0.000000,90.000000,12.250000");
    }

    #[test]
    fn empty_row_is_just_the_timestamp() {
        assert_eq!(format_row(&TelemetryRow::new(3.0, Vec::new())), "3.000000");
    }
}
