//! TCP links between the pose streaming server and its clients.
//!
//! ```text
//!            Server                                   Client
//!   ┌──────────────────────────┐            ┌──────────────────────────┐
//!   │ accept loop              │◄── TCP ────│ connect loop (retrying)  │
//!   │  └─ admit: id, onboarding│            │  └─ version handshake    │
//!   │ registry: PeerId → link  │            │ link: PeerId::SERVER     │
//!   └───────────┬──────────────┘            └────────────┬─────────────┘
//!               │ NetEvent                               │ NetEvent
//!               ▼                                        ▼
//!         DispatchQueue                            DispatchQueue
//! ```
//!
//! Every link is a [`Connection`]: one reader task decoding frames with
//! [`FrameCodec`](crate::protocol::FrameCodec) and one writer task draining an
//! outbound queue. Whatever ends a link (EOF, I/O error, framing error or a
//! local close) is reported exactly once through its [`PacketSink`].

pub mod client;
pub mod connector;
pub mod server;
pub mod transport;


pub use client::{Client, ClientState};
pub use connector::{Connector, TcpConnector};
pub use server::{SceneState, Server, ServerHandle};
pub use transport::{Connection, DisconnectReason, Flow, PacketSink};

use std::sync::{Mutex, MutexGuard};

/// Lock ignoring poisoning; guarded state is only ever replaced whole
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
