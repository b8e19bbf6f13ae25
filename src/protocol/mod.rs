//! Wire protocol: packet codec, stream framing and typed messages.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────────────┬────────────────────┬──────────────────────┐
//! │ Length (4 bytes)     │ PacketType (4)     │ Payload fields ...   │
//! │ LE i32, includes self│ LE i32             │ typed, in write order│
//! └──────────────────────┴────────────────────┴──────────────────────┘
//! ```
//!
//! ## Field Encodings
//!
//! - `bool`: 1 byte, non-zero is true
//! - `i32`, `f32`: 4 bytes little-endian
//! - `String`: LE i32 byte length followed by UTF-8 bytes
//! - [`Vector3`](crate::types::Vector3): three `f32`
//!
//! The codec performs no semantic validation: readers must consume fields in
//! the same order and types they were written.

mod codec;
mod message;
mod packet;

pub use codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec};
pub use message::Message;
pub use packet::{HEADER_LEN, LENGTH_PREFIX_LEN, Packet, PacketReader, WireRead, WireWrite};
