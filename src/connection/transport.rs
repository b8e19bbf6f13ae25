//! One framed TCP link to a remote peer

use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::lock;
use crate::protocol::{FrameCodec, Message, Packet};
use crate::types::PeerId;
use crate::{PosecastError, Result};

/// Whether the reader keeps going after a packet was delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close(DisconnectReason),
}

/// Why a connection moved to closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side shut the stream down
    RemoteClosed,
    /// A read or write failed
    Transport(String),
    /// The byte stream could not be framed
    Framing(String),
    /// The peers speak different protocol versions
    ProtocolMismatch,
    /// Closed from this side
    Local,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::RemoteClosed => write!(f, "remote closed"),
            DisconnectReason::Transport(details) => write!(f, "transport error: {}", details),
            DisconnectReason::Framing(details) => write!(f, "framing error: {}", details),
            DisconnectReason::ProtocolMismatch => write!(f, "protocol mismatch"),
            DisconnectReason::Local => write!(f, "closed locally"),
        }
    }
}

/// A packet that runs out of bytes mid-decode is fatal for its link
pub(crate) fn reject_undecodable(peer: PeerId, packet: &Packet) -> Option<Flow> {
    let e = Message::decode(packet).err()?;
    warn!(%peer, error = %e, "Closing connection after undecodable packet");
    Some(Flow::Close(DisconnectReason::Framing(e.to_string())))
}

/// Receives everything a [`Connection`] reads
///
/// Both methods run on the connection's reader or writer task, so they must
/// not block. `closed` is called exactly once per connection and never before
/// a packet that was already delivered.
pub trait PacketSink: Send + Sync + 'static {
    fn deliver(&self, peer: PeerId, packet: Packet) -> Flow;

    fn closed(&self, peer: PeerId, reason: DisconnectReason);
}

struct Shared {
    peer: PeerId,
    closed: AtomicBool,
    // Serialises delivery against close
    gate: Mutex<()>,
    cancel: CancellationToken,
    sink: Arc<dyn PacketSink>,
}

impl Shared {
    fn deliver(&self, packet: Packet) -> Flow {
        let _gate = lock(&self.gate);
        if self.closed.load(Ordering::Acquire) {
            trace!(peer = %self.peer, "Dropping packet on closed connection");
            return Flow::Continue;
        }
        self.sink.deliver(self.peer, packet)
    }

    fn close(&self, reason: DisconnectReason) {
        let _gate = lock(&self.gate);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        debug!(peer = %self.peer, %reason, "Connection closed");
        self.sink.closed(self.peer, reason);
    }
}

/// Handle to a live link
///
/// Cloning shares the link. Dropping the last handle lets the writer drain and
/// close the stream; [`Connection::close`] closes it immediately.
#[derive(Clone)]
pub struct Connection {
    peer: PeerId,
    remote: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Split `stream` and spawn its reader and writer tasks
    pub fn spawn(
        stream: TcpStream,
        remote: SocketAddr,
        peer: PeerId,
        sink: Arc<dyn PacketSink>,
        max_frame_len: usize,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Could not disable Nagle");
        }

        let (read_half, write_half) = stream.into_split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            peer,
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            sink,
        });

        let frames = FramedRead::new(read_half, FrameCodec::new(max_frame_len));
        tokio::spawn(read_loop(frames, shared.clone()));
        tokio::spawn(write_loop(write_half, rx, shared.clone()));

        Self { peer, remote, outbound, shared }
    }

    /// Queue a packet for sending
    pub fn send(&self, packet: &Packet) -> Result<()> {
        self.send_frame(packet.to_frame())
    }

    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.send(&message.to_packet())
    }

    /// Queue an already framed packet
    ///
    /// Frames queued by one caller go out in order, each written whole.
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(PosecastError::Closed);
        }
        self.outbound.send(frame).map_err(|_| PosecastError::Closed)
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        self.shared.close(DisconnectReason::Local);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Resolves once the link is closed, from either side
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Whether both handles refer to the same underlying link
    pub fn same_link(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop(mut frames: FramedRead<OwnedReadHalf, FrameCodec>, shared: Arc<Shared>) {
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(packet)) => {
                trace!(peer = %shared.peer, len = packet.len(), "Received packet");
                if let Flow::Close(reason) = shared.deliver(packet) {
                    shared.close(reason);
                    return;
                }
            }
            Some(Err(e @ (PosecastError::Framing { .. } | PosecastError::Decode { .. }))) => {
                warn!(peer = %shared.peer, error = %e, "Dropping connection with unframeable stream");
                shared.close(DisconnectReason::Framing(e.to_string()));
                return;
            }
            Some(Err(e)) => {
                shared.close(DisconnectReason::Transport(e.to_string()));
                return;
            }
            None => {
                shared.close(DisconnectReason::RemoteClosed);
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
) {
    loop {
        // Queued frames go out before cancellation is honoured
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = shared.cancel.cancelled() => break,
        };

        let Some(frame) = frame else {
            shared.close(DisconnectReason::Local);
            break;
        };

        let written = tokio::select! {
            biased;
            result = writer.write_all(&frame) => result,
            _ = shared.cancel.cancelled() => break,
        };
        if let Err(e) = written {
            warn!(peer = %shared.peer, error = %e, "Write failed");
            shared.close(DisconnectReason::Transport(e.to_string()));
            break;
        }
    }

    let _ = writer.shutdown().await;
}
