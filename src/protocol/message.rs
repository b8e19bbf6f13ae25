//! Typed view over the packet shapes exchanged between peers

use super::packet::Packet;
use crate::types::{PacketType, Pose, TelemetryRow, Vector3};
use crate::{PosecastError, Result};

/// Wire size of one (position, rotation) pair
const POSE_WIRE_LEN: usize = 6 * 4;

/// One decoded packet
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Protocol version, server to client only
    Version(String),
    /// Pose sample, one pair per tracked object in configured order
    TelemetryEntry(TelemetryRow),
    /// Integer value, client to server
    Int(i32),
    /// Scene index to switch to
    ChangeScene(i32),
    /// Y frame visibility
    ShowYFrame(bool),
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::Version(_) => PacketType::Version,
            Message::TelemetryEntry(_) => PacketType::CsvWriterDataEntry,
            Message::Int(_) => PacketType::Int,
            Message::ChangeScene(_) => PacketType::ChangeScene,
            Message::ShowYFrame(_) => PacketType::ShowYFrame,
        }
    }

    /// Serialize into a packet ready to be framed
    pub fn to_packet(&self) -> Packet {
        let mut packet = Packet::new(self.packet_type());
        match self {
            Message::Version(version) => {
                packet.write(version.as_str());
            }
            Message::TelemetryEntry(row) => {
                packet.write(&row.timestamp);
                for pose in &row.poses {
                    packet.write(&pose.position).write(&pose.rotation);
                }
            }
            Message::Int(value) | Message::ChangeScene(value) => {
                packet.write(value);
            }
            Message::ShowYFrame(visible) => {
                packet.write(visible);
            }
        }
        packet
    }

    /// Decode a packet by its type
    ///
    /// Pose entries carry no count on the wire: every complete pair present is
    /// decoded, and comparing the count against the configured object list is
    /// left to the caller.
    pub fn decode(packet: &Packet) -> Result<Self> {
        let packet_type = packet.packet_type()?;
        let mut reader = packet.payload_reader();

        let message = match packet_type {
            PacketType::Version => Message::Version(reader.read()?),
            PacketType::Int => Message::Int(reader.read()?),
            PacketType::ChangeScene => Message::ChangeScene(reader.read()?),
            PacketType::ShowYFrame => Message::ShowYFrame(reader.read()?),
            PacketType::CsvWriterDataEntry => {
                let timestamp: f32 = reader.read()?;
                let mut poses = Vec::with_capacity(reader.remaining() / POSE_WIRE_LEN);
                while reader.remaining() >= POSE_WIRE_LEN {
                    let position: Vector3 = reader.read()?;
                    let rotation: Vector3 = reader.read()?;
                    poses.push(Pose::new(position, rotation));
                }
                Message::TelemetryEntry(TelemetryRow::new(timestamp, poses))
            }
        };

        if reader.remaining() > 0 {
            return Err(PosecastError::decode_error(
                format!("{:?} packet", packet_type),
                format!("{} trailing bytes", reader.remaining()),
            ));
        }

        Ok(message)
    }
}

impl From<TelemetryRow> for Message {
    fn from(row: TelemetryRow) -> Self {
        Message::TelemetryEntry(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_entry_layout_matches_wire_shape() {
        let row = TelemetryRow::new(
            1.5,
            vec![
                Pose::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)),
                Pose::new(Vector3::new(-1.0, -2.0, -3.0), Vector3::new(0.0, 90.0, 180.0)),
            ],
        );
        let packet = Message::TelemetryEntry(row.clone()).to_packet();

        // type + timestamp + 2 pairs
        assert_eq!(packet.len(), 4 + 4 + 2 * POSE_WIRE_LEN);
        assert_eq!(Message::decode(&packet).unwrap(), Message::TelemetryEntry(row));
    }

    #[test]
    fn truncated_pose_pair_is_rejected() {
        let mut packet = Packet::new(PacketType::CsvWriterDataEntry);
        packet.write(&0.5f32).write(&Vector3::new(1.0, 2.0, 3.0));

        let err = Message::decode(&packet).unwrap_err();
        assert!(matches!(err, PosecastError::Decode { .. }));
    }

    #[test]
    fn missing_payload_is_a_decode_error() {
        let packet = Packet::new(PacketType::ChangeScene);
        assert!(matches!(Message::decode(&packet), Err(PosecastError::Decode { .. })));
    }

    #[test]
    fn reserved_type_is_unknown() {
        let mut packet = Packet::default();
        packet.write(&1i32).write(&7i32);
        assert!(matches!(
            Message::decode(&packet),
            Err(PosecastError::UnknownPacketType { value: 1 })
        ));
    }

    #[test]
    fn version_string_is_length_prefixed() {
        let packet = Message::Version("1.0.0".into()).to_packet();
        assert_eq!(&packet.body()[4..8], &5i32.to_le_bytes());
        assert_eq!(&packet.body()[8..], b"1.0.0");
    }
}
