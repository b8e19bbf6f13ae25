//! Typed, append-only packet buffer

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{PacketType, Vector3};
use crate::{PosecastError, Result};

/// Size of the length prefix that starts every frame
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the length prefix plus the packet type
pub const HEADER_LEN: usize = LENGTH_PREFIX_LEN + 4;

/// Types that can be appended to a packet
pub trait WireWrite {
    fn write_to(&self, buf: &mut Vec<u8>);
}

/// Types that can be consumed from a packet
pub trait WireRead: Sized {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self>;
}

/// Binary packet: packet type followed by payload fields
///
/// The body holds everything after the length prefix. The prefix itself is
/// computed when the packet is framed for sending, so the body can keep
/// growing until then.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    body: Vec<u8>,
    read_pos: usize,
}

impl Packet {
    /// Create a packet whose first field is `packet_type`
    pub fn new(packet_type: PacketType) -> Self {
        let mut packet = Self::default();
        packet.write(&packet_type.as_i32());
        packet
    }

    /// Wrap raw body bytes, with the read cursor at the start
    pub fn from_body(body: Vec<u8>) -> Self {
        Self { body, read_pos: 0 }
    }

    /// Rebuild a packet from one complete frame (length prefix included)
    ///
    /// The declared length must equal the frame size. The read cursor is left
    /// just after the length and type header.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(PosecastError::framing_error(format!(
                "frame of {} bytes is shorter than the {} byte header",
                frame.len(),
                HEADER_LEN
            )));
        }

        let declared = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if declared < 0 || declared as usize != frame.len() {
            return Err(PosecastError::framing_error(format!(
                "declared length {} does not match {} buffered bytes",
                declared,
                frame.len()
            )));
        }

        Ok(Self { body: frame[LENGTH_PREFIX_LEN..].to_vec(), read_pos: HEADER_LEN - LENGTH_PREFIX_LEN })
    }

    /// Append a field
    pub fn write<T: WireWrite + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.write_to(&mut self.body);
        self
    }

    /// Consume the next field
    pub fn read<T: WireRead>(&mut self) -> Result<T> {
        let mut reader = PacketReader { buf: &self.body, pos: self.read_pos };
        let value = T::read_from(&mut reader)?;
        self.read_pos = reader.pos;
        Ok(value)
    }

    /// Packet type stored in the first field
    pub fn packet_type(&self) -> Result<PacketType> {
        let raw = self.body.get(..4).ok_or_else(|| {
            PosecastError::decode_error("packet type", "packet body is shorter than 4 bytes")
        })?;
        PacketType::try_from(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Independent reader positioned just after the packet type
    pub fn payload_reader(&self) -> PacketReader<'_> {
        PacketReader { buf: &self.body, pos: self.body.len().min(4) }
    }

    /// Body bytes (packet type and payload, no length prefix)
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Bytes left after the read cursor
    pub fn remaining(&self) -> usize {
        self.body.len().saturating_sub(self.read_pos)
    }

    /// Total frame length, prefix included
    pub fn frame_len(&self) -> usize {
        LENGTH_PREFIX_LEN + self.body.len()
    }

    /// Append the framed representation to `dst`
    pub fn encode_frame(&self, dst: &mut BytesMut) {
        dst.reserve(self.frame_len());
        dst.put_i32_le(self.frame_len() as i32);
        dst.put_slice(&self.body);
    }

    /// Framed representation: length prefix followed by the body
    pub fn to_frame(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.frame_len());
        self.encode_frame(&mut dst);
        dst.freeze()
    }
}

// Packets are equal when they carry the same bytes, wherever their cursors are
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for Packet {}

/// Sequential reader over a packet body
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Consume the next field
    pub fn read<T: WireRead>(&mut self) -> Result<T> {
        T::read_from(self)
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Take exactly `len` bytes or fail without moving the cursor
    pub fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                PosecastError::decode_error(
                    field,
                    format!(
                        "needed {} bytes at offset {}, only {} remaining",
                        len,
                        self.pos,
                        self.remaining()
                    ),
                )
            })?;

        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_4(&mut self, field: &str) -> Result<[u8; 4]> {
        let bytes = self.take(4, field)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl WireWrite for bool {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

impl WireRead for bool {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(reader.take(1, "bool")?[0] != 0)
    }
}

impl WireWrite for i32 {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireRead for i32 {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(i32::from_le_bytes(reader.take_4("i32")?))
    }
}

impl WireWrite for f32 {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireRead for f32 {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(f32::from_le_bytes(reader.take_4("f32")?))
    }
}

impl WireWrite for str {
    fn write_to(&self, buf: &mut Vec<u8>) {
        (self.len() as i32).write_to(buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl WireWrite for String {
    fn write_to(&self, buf: &mut Vec<u8>) {
        self.as_str().write_to(buf);
    }
}

impl WireRead for String {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self> {
        let len = i32::read_from(reader)?;
        if len < 0 {
            return Err(PosecastError::decode_error("string", format!("negative length {}", len)));
        }

        let bytes = reader.take(len as usize, "string")?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PosecastError::decode_error("string", e.to_string()))
    }
}

impl WireWrite for Vector3 {
    fn write_to(&self, buf: &mut Vec<u8>) {
        self.x.write_to(buf);
        self.y.write_to(buf);
        self.z.write_to(buf);
    }
}

impl WireRead for Vector3 {
    fn read_from(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Vector3 { x: reader.read()?, y: reader.read()?, z: reader.read()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_vector() -> impl Strategy<Value = Vector3> {
        (any::<f32>(), any::<f32>(), any::<f32>()).prop_map(|(x, y, z)| Vector3::new(x, y, z))
    }

    fn same_bits(a: Vector3, b: Vector3) -> bool {
        a.x.to_bits() == b.x.to_bits()
            && a.y.to_bits() == b.y.to_bits()
            && a.z.to_bits() == b.z.to_bits()
    }

    proptest! {
        #[test]
        fn prop_fields_read_back_in_write_order(
            flag in any::<bool>(),
            int in any::<i32>(),
            float in any::<f32>(),
            text in ".*",
            vector in arb_vector()
        ) {
            let mut packet = Packet::new(PacketType::Int);
            packet.write(&flag).write(&int).write(&float).write(text.as_str()).write(&vector);

            let mut decoded = Packet::from_frame(&packet.to_frame()).unwrap();
            prop_assert_eq!(decoded.packet_type().unwrap(), PacketType::Int);
            prop_assert_eq!(decoded.read::<bool>().unwrap(), flag);
            prop_assert_eq!(decoded.read::<i32>().unwrap(), int);
            prop_assert_eq!(decoded.read::<f32>().unwrap().to_bits(), float.to_bits());
            prop_assert_eq!(decoded.read::<String>().unwrap(), text);
            prop_assert!(same_bits(decoded.read::<Vector3>().unwrap(), vector));
            prop_assert_eq!(decoded.remaining(), 0);
        }
    }

    #[test]
    fn boundary_values_survive() {
        let mut packet = Packet::new(PacketType::Int);
        packet
            .write(&i32::MIN)
            .write(&i32::MAX)
            .write("")
            .write(&Vector3::ZERO)
            .write(&-273.15f32)
            .write(&false);

        let mut decoded = Packet::from_frame(&packet.to_frame()).unwrap();
        assert_eq!(decoded.read::<i32>().unwrap(), i32::MIN);
        assert_eq!(decoded.read::<i32>().unwrap(), i32::MAX);
        assert_eq!(decoded.read::<String>().unwrap(), "");
        assert_eq!(decoded.read::<Vector3>().unwrap(), Vector3::ZERO);
        assert_eq!(decoded.read::<f32>().unwrap(), -273.15);
        assert!(!decoded.read::<bool>().unwrap());
    }

    #[test]
    fn length_prefix_counts_itself() {
        let mut packet = Packet::new(PacketType::ChangeScene);
        packet.write(&3i32);

        let frame = packet.to_frame();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[..4], &12i32.to_le_bytes());
        assert_eq!(&frame[4..8], &4i32.to_le_bytes());
        assert_eq!(&frame[8..], &3i32.to_le_bytes());
    }

    #[test]
    fn reading_past_the_end_fails_without_moving_the_cursor() {
        let mut packet = Packet::new(PacketType::Int);
        packet.write(&true);
        let mut decoded = Packet::from_frame(&packet.to_frame()).unwrap();

        let err = decoded.read::<i32>().unwrap_err();
        assert!(matches!(err, PosecastError::Decode { .. }));
        assert_eq!(decoded.remaining(), 1);
        assert!(decoded.read::<bool>().unwrap());
    }

    #[test]
    fn malformed_strings_are_decode_errors() {
        let mut negative = Packet::new(PacketType::Version);
        negative.write(&-5i32);
        let mut negative = Packet::from_frame(&negative.to_frame()).unwrap();
        assert!(matches!(negative.read::<String>(), Err(PosecastError::Decode { .. })));

        let mut truncated = Packet::new(PacketType::Version);
        truncated.write(&10i32).write(&1i32);
        let mut truncated = Packet::from_frame(&truncated.to_frame()).unwrap();
        assert!(matches!(truncated.read::<String>(), Err(PosecastError::Decode { .. })));

        let mut invalid = Packet::from_body(vec![0, 0, 0, 0, 2, 0, 0, 0, 0xff, 0xfe]);
        invalid.read::<i32>().unwrap();
        assert!(matches!(invalid.read::<String>(), Err(PosecastError::Decode { .. })));
    }

    #[test]
    fn from_frame_rejects_inconsistent_lengths() {
        let mut packet = Packet::new(PacketType::Int);
        packet.write(&1i32);
        let mut frame = packet.to_frame().to_vec();
        frame.push(0);

        assert!(matches!(Packet::from_frame(&frame), Err(PosecastError::Framing { .. })));
        assert!(matches!(Packet::from_frame(&[8, 0, 0]), Err(PosecastError::Framing { .. })));
    }

    #[test]
    fn payload_reader_leaves_packet_cursor_alone() {
        let mut packet = Packet::new(PacketType::ShowYFrame);
        packet.write(&true);

        let mut reader = packet.payload_reader();
        assert!(reader.read::<bool>().unwrap());
        assert_eq!(reader.remaining(), 0);
        assert_eq!(packet.remaining(), packet.len());
    }
}
