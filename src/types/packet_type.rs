//! Packet type discriminants

use crate::{PosecastError, Result};

/// Closed set of packet types carried in the second field of every frame
///
/// Value 1 is reserved and must never be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    /// Server protocol version, sent once to each new client
    Version = 0,
    /// Timestamp followed by one (position, rotation) pair per tracked object
    CsvWriterDataEntry = 2,
    /// Single integer value
    Int = 3,
    /// Scene index to switch to
    ChangeScene = 4,
    /// Visibility of the Y frame
    ShowYFrame = 5,
}

impl PacketType {
    /// Wire value of this packet type
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for PacketType {
    type Error = PosecastError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PacketType::Version),
            2 => Ok(PacketType::CsvWriterDataEntry),
            3 => Ok(PacketType::Int),
            4 => Ok(PacketType::ChangeScene),
            5 => Ok(PacketType::ShowYFrame),
            _ => Err(PosecastError::UnknownPacketType { value }),
        }
    }
}
