//! Stream framing for length-prefixed packets

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use super::packet::{HEADER_LEN, LENGTH_PREFIX_LEN, Packet};
use crate::{PosecastError, Result};

/// Largest frame accepted unless configured otherwise (1 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Splits a byte stream into complete packets
///
/// Each connection owns its own codec and receive buffer, so a framing error
/// only ever poisons the connection it happened on. Partial frames stay in the
/// buffer until the rest of their bytes arrive.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len: max_frame_len.max(HEADER_LEN) }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = PosecastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if declared < HEADER_LEN as i32 || declared as usize > self.max_frame_len {
            return Err(PosecastError::framing_error(format!(
                "declared length {} outside {}..={}",
                declared, HEADER_LEN, self.max_frame_len
            )));
        }

        let declared = declared as usize;
        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let frame = src.split_to(declared);
        trace!(frame_len = declared, buffered = src.len(), "Decoded frame");
        Packet::from_frame(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::types::{Pose, TelemetryRow, Vector3};
    use proptest::prelude::*;

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            "[0-9]\\.[0-9]\\.[0-9]".prop_map(Message::Version),
            any::<i32>().prop_map(Message::Int),
            any::<i32>().prop_map(Message::ChangeScene),
            any::<bool>().prop_map(Message::ShowYFrame),
            (-1000.0f32..1000.0, prop::collection::vec(-10.0f32..10.0, 0..18)).prop_map(
                |(timestamp, values)| {
                    let poses = values
                        .chunks_exact(6)
                        .map(|c| {
                            Pose::new(Vector3::new(c[0], c[1], c[2]), Vector3::new(c[3], c[4], c[5]))
                        })
                        .collect();
                    Message::TelemetryEntry(TelemetryRow::new(timestamp, poses))
                }
            ),
        ]
    }

    fn decode_in_chunks(stream: &[u8], chunk: usize) -> Vec<Packet> {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::new();
        let mut packets = Vec::new();

        for piece in stream.chunks(chunk) {
            buffer.extend_from_slice(piece);
            while let Some(packet) = codec.decode(&mut buffer).unwrap() {
                packets.push(packet);
            }
        }

        assert!(buffer.is_empty(), "no bytes may be left over");
        packets
    }

    proptest! {
        #[test]
        fn prop_framing_round_trip_under_any_chunking(
            messages in prop::collection::vec(arb_message(), 1..20),
            chunk in 1usize..64
        ) {
            let packets: Vec<Packet> = messages.iter().map(Message::to_packet).collect();
            let stream: Vec<u8> = packets.iter().flat_map(|p| p.to_frame().to_vec()).collect();

            let decoded = decode_in_chunks(&stream, chunk);
            prop_assert_eq!(&decoded, &packets);

            let messages_back: Vec<Message> =
                decoded.iter().map(|p| Message::decode(p).unwrap()).collect();
            prop_assert_eq!(messages_back, messages);
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let packets = vec![
            Message::Version("1.0.0".into()).to_packet(),
            Message::ChangeScene(2).to_packet(),
            Message::ShowYFrame(true).to_packet(),
        ];
        let stream: Vec<u8> = packets.iter().flat_map(|p| p.to_frame().to_vec()).collect();

        assert_eq!(decode_in_chunks(&stream, 1), packets);
    }

    #[test]
    fn several_frames_in_one_read_are_all_yielded() {
        let mut buffer = BytesMut::new();
        for scene in 0..5 {
            Message::ChangeScene(scene).to_packet().encode_frame(&mut buffer);
        }

        let mut codec = FrameCodec::default();
        let mut scenes = Vec::new();
        while let Some(packet) = codec.decode(&mut buffer).unwrap() {
            match Message::decode(&packet).unwrap() {
                Message::ChangeScene(scene) => scenes.push(scene),
                other => panic!("unexpected message {:?}", other),
            }
        }

        assert_eq!(scenes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn partial_frame_is_never_exposed() {
        let frame = Message::Int(42).to_packet().to_frame();
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&frame[..frame.len() - 1]);

        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), frame.len() - 1);

        buffer.extend_from_slice(&frame[frame.len() - 1..]);
        let packet = codec.decode(&mut buffer).unwrap().expect("complete frame");
        assert_eq!(Message::decode(&packet).unwrap(), Message::Int(42));
    }

    #[test]
    fn impossible_lengths_are_framing_errors() {
        let mut codec = FrameCodec::new(64);

        let mut too_short = BytesMut::from(&4i32.to_le_bytes()[..]);
        assert!(matches!(codec.decode(&mut too_short), Err(PosecastError::Framing { .. })));

        let mut negative = BytesMut::from(&(-1i32).to_le_bytes()[..]);
        assert!(matches!(codec.decode(&mut negative), Err(PosecastError::Framing { .. })));

        let mut too_long = BytesMut::from(&65i32.to_le_bytes()[..]);
        assert!(matches!(codec.decode(&mut too_long), Err(PosecastError::Framing { .. })));
    }
}
