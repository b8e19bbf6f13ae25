//! Reading recorded CSV files back into rows

use std::path::Path;

use super::format::{COMPONENT_SUFFIXES, FRAME_COLUMN};
use crate::types::{Pose, TelemetryRow, Vector3};
use crate::{PosecastError, Result};

/// A recording loaded from disk
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recording {
    /// Tracked objects in column order
    pub object_names: Vec<String>,
    pub rows: Vec<TelemetryRow>,
}

impl Recording {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PosecastError::file_error(path.to_path_buf(), e))?;
        Self::parse(&text)
    }

    /// Parse CSV text produced by [`TelemetryWriter`](super::TelemetryWriter)
    ///
    /// Rows may carry fewer or more objects than the header names, as long as
    /// every object is complete.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());

        let (_, header) =
            lines.next().ok_or_else(|| PosecastError::decode_error("line 1", "missing header"))?;
        let object_names = parse_header(header)?;

        let mut rows = Vec::new();
        for (index, line) in lines {
            rows.push(parse_row(line).map_err(|details| PosecastError::decode_error(format!("line {}", index + 1), details))?);
        }

        Ok(Self { object_names, rows })
    }

    /// Timestamps relative to the first row
    pub fn relative_times(&self) -> Vec<f32> {
        let start = self.rows.first().map_or(0.0, |row| row.timestamp);
        self.rows.iter().map(|row| row.timestamp - start).collect()
    }

    /// Time between the first and last row
    pub fn duration(&self) -> f32 {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }

    /// Every pose of one object, skipping rows too short to contain it
    pub fn track(&self, object: &str) -> Option<Vec<Pose>> {
        let index = self.object_names.iter().position(|name| name == object)?;
        Some(self.rows.iter().filter_map(|row| row.poses.get(index).copied()).collect())
    }
}

fn parse_header(header: &str) -> Result<Vec<String>> {
    let invalid = |details: String| PosecastError::decode_error("line 1", details);

    let mut columns = header.trim().split(',');
    if columns.next() != Some(FRAME_COLUMN) {
        return Err(invalid(format!("first column must be {}", FRAME_COLUMN)));
    }

    let columns: Vec<&str> = columns.collect();
    if columns.len() % COMPONENT_SUFFIXES.len() != 0 {
        return Err(invalid(format!("{} pose columns is not a multiple of 6", columns.len())));
    }

    let mut names = Vec::with_capacity(columns.len() / COMPONENT_SUFFIXES.len());
    for group in columns.chunks(COMPONENT_SUFFIXES.len()) {
        let name = group[0]
            .strip_suffix(COMPONENT_SUFFIXES[0])
            .and_then(|prefix| prefix.strip_suffix('_'))
            .ok_or_else(|| invalid(format!("unexpected column {}", group[0])))?;

        for (column, suffix) in group.iter().zip(COMPONENT_SUFFIXES) {
            if *column != format!("{}_{}", name, suffix) {
                return Err(invalid(format!("expected {}_{}, found {}", name, suffix, column)));
            }
        }
        names.push(name.to_string());
    }
    Ok(names)
}

fn parse_row(line: &str) -> std::result::Result<TelemetryRow, String> {
    let values = line
        .trim()
        .split(',')
        .map(|field| field.trim().parse::<f32>().map_err(|_| format!("'{}' is not a number", field)))
        .collect::<std::result::Result<Vec<f32>, String>>()?;

    let (timestamp, components) = values.split_first().ok_or("empty row")?;
    if components.len() % COMPONENT_SUFFIXES.len() != 0 {
        return Err(format!("{} pose values is not a multiple of 6", components.len()));
    }

    let poses = components
        .chunks(COMPONENT_SUFFIXES.len())
        .map(|c| Pose::new(Vector3::new(c[0], c[1], c[2]), Vector3::new(c[3], c[4], c[5])))
        .collect();
    Ok(TelemetryRow::new(*timestamp, poses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::format::{format_row, header_line};
    use crate::test_utils::{object_names, sample_row};

    #[test]
    fn parses_what_the_writer_formats() {
        let rows = vec![sample_row(0.0, 3), sample_row(1.0, 3), sample_row(2.5, 3)];
        let mut text = header_line(&object_names());
        for row in &rows {
            text.push('\n');
            text.push_str(&format_row(row));
        }
        text.push('\n');

        let recording = Recording::parse(&text).unwrap();
        assert_eq!(recording.object_names, object_names());
        assert_eq!(recording.rows, rows);
        assert_eq!(recording.duration(), 2.5);
        assert_eq!(recording.relative_times(), vec![0.0, 1.0, 2.5]);

        let left = recording.track("LeftHand").unwrap();
        assert_eq!(left.len(), 3);
        assert_eq!(left[1].position, Vector3::new(1.0, 1.0, -1.0));
        assert!(recording.track("Pelvis").is_none());
    }

    #[test]
    fn errors_name_the_offending_line() {
        let text = "Frame,Head_Pos.X,Head_Pos.Y,Head_Pos.Z,Head_Rot.X,Head_Rot.Y,Head_Rot.Z\n\
                    0.0,1,2,3,4,5,6\n\
                    0.1,1,2,x,4,5,6\n";
        let err = Recording::parse(text).unwrap_err();
        assert!(matches!(&err, PosecastError::Decode { context, .. } if context == "line 3"), "{}", err);

        let truncated = "Frame,Head_Pos.X,Head_Pos.Y,Head_Pos.Z,Head_Rot.X,Head_Rot.Y,Head_Rot.Z\n0.0,1,2\n";
        assert!(matches!(Recording::parse(truncated), Err(PosecastError::Decode { .. })));
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "Time,Head_Pos.X", "Frame,Head_Pos.X,Head_Pos.Y", "Frame,A_Pos.X,A_Pos.Y,A_Pos.Z,A_Rot.X,A_Rot.Y,B_Rot.Z"] {
            assert!(Recording::parse(header).is_err(), "{:?} should be rejected", header);
        }
    }

    #[test]
    fn open_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Recording::open(dir.path().join("missing.csv")), Err(PosecastError::File { .. })));
    }
}
