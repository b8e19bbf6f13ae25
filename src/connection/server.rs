//! Server side: accept loop, peer registry and broadcast

use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lock;
use super::transport::{Connection, DisconnectReason, Flow, PacketSink, reject_undecodable};
use crate::config::Config;
use crate::dispatch::{DispatchQueue, NetEvent};
use crate::protocol::{Message, Packet};
use crate::types::{Peer, PeerId};
use crate::{PosecastError, Result};

/// Scene selection shared with every client, sent on join and on change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneState {
    pub scene_index: i32,
    pub show_y_frame: bool,
}

struct PeerEntry {
    connection: Connection,
    ip: String,
}

#[derive(Default)]
struct Registry {
    peers: BTreeMap<PeerId, PeerEntry>,
    connected: usize,
}

impl Registry {
    /// Lowest id >= 1 not held by a connected peer
    fn next_free_id(&self) -> PeerId {
        let mut candidate = 1;
        for id in self.peers.keys() {
            if id.0 == candidate {
                candidate += 1;
            } else if id.0 > candidate {
                break;
            }
        }
        PeerId(candidate)
    }
}

struct ServerInner {
    config: Arc<Config>,
    inbox: DispatchQueue,
    // Lock order: registry, then scene
    registry: Mutex<Registry>,
    scene: Mutex<SceneState>,
}

/// Listening server
///
/// Dropping the server stops accepting and closes every peer. Use
/// [`Server::handle`] to broadcast from elsewhere.
///
/// ```rust,no_run
/// use posecast::{Config, DispatchQueue, Message, Server};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> posecast::Result<()> {
///     let inbox = DispatchQueue::new();
///     let server = Server::bind(Arc::new(Config::default()), inbox.clone()).await?;
///     println!("listening on {}", server.local_addr());
///
///     let reached = server.handle().broadcast(&Message::ChangeScene(2));
///     println!("sent to {} peers", reached);
///     Ok(())
/// }
/// ```
pub struct Server {
    handle: ServerHandle,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

/// Cloneable access to a running server's peers and scene state
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind `config.bind_address:config.port` and start accepting clients
    pub async fn bind(config: Arc<Config>, inbox: DispatchQueue) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            PosecastError::connection_failed_with_source(format!("failed to bind {}", addr), Box::new(e))
        })?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(ServerInner {
            config,
            inbox,
            registry: Mutex::new(Registry::default()),
            scene: Mutex::new(SceneState::default()),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(inner.clone(), listener, cancel.clone()));

        info!(%local_addr, "Server listening");
        Ok(Self { handle: ServerHandle { inner }, local_addr, cancel })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.handle.peer_count()
    }

    /// Stop accepting and close every connected peer
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let connections: Vec<Connection> =
            lock(&self.handle.inner.registry).peers.values().map(|entry| entry.connection.clone()).collect();
        info!(peers = connections.len(), "Server shutting down");
        for connection in connections {
            connection.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ServerHandle {
    /// Send `message` to every connected peer. Returns how many peers it was queued for.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.inner.broadcast_frame(message.to_packet().to_frame())
    }

    pub fn broadcast_packet(&self, packet: &Packet) -> usize {
        self.inner.broadcast_frame(packet.to_frame())
    }

    /// Send to one peer. Unknown peers are reported, never fatal.
    pub fn send_to(&self, peer: PeerId, message: &Message) -> Result<()> {
        let registry = lock(&self.inner.registry);
        match registry.peers.get(&peer) {
            Some(entry) => entry.connection.send_message(message),
            None => {
                warn!(%peer, packet_type = ?message.packet_type(), "Cannot send to unknown peer");
                Err(PosecastError::PeerNotFound { peer_id: peer })
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.inner.registry).connected
    }

    /// Connected peers in id order
    pub fn peers(&self) -> Vec<Peer> {
        lock(&self.inner.registry).peers.iter().map(|(id, entry)| Peer { id: *id, ip: entry.ip.clone() }).collect()
    }

    pub fn scene_state(&self) -> SceneState {
        *lock(&self.inner.scene)
    }

    /// Switch every client to `scene_index`; the latest call wins
    pub fn set_scene(&self, scene_index: i32) -> usize {
        self.inner.update_scene(|scene| scene.scene_index = scene_index, Message::ChangeScene(scene_index))
    }

    /// Show or hide the Y frame on every client; the latest call wins
    pub fn set_y_frame(&self, visible: bool) -> usize {
        self.inner.update_scene(|scene| scene.show_y_frame = visible, Message::ShowYFrame(visible))
    }

    /// Close one peer's connection. Returns false if it was not connected.
    pub fn kick(&self, peer: PeerId) -> bool {
        let connection = lock(&self.inner.registry).peers.get(&peer).map(|entry| entry.connection.clone());
        match connection {
            Some(connection) => {
                info!(%peer, "Kicking peer");
                connection.close();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").field("peers", &self.peer_count()).field("scene", &self.scene_state()).finish()
    }
}

impl ServerInner {
    fn admit(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        let ip = remote.ip().to_string();
        let sink = Arc::new(ServerSink { server: Arc::downgrade(self) });

        let mut registry = lock(&self.registry);
        let scene = *lock(&self.scene);
        let peer = registry.next_free_id();

        // Announced before the reader starts so its packets never precede the join
        self.inbox.enqueue(NetEvent::PeerConnected { peer, ip: ip.clone() });
        let connection = Connection::spawn(stream, remote, peer, sink, self.config.max_frame_len);

        let onboarding = [
            Message::Version(self.config.protocol_version.clone()),
            Message::ChangeScene(scene.scene_index),
            Message::ShowYFrame(scene.show_y_frame),
        ];
        for message in &onboarding {
            if let Err(e) = connection.send_message(message) {
                warn!(%peer, error = %e, "Failed to queue onboarding packet");
            }
        }

        registry.peers.insert(peer, PeerEntry { connection, ip: ip.clone() });
        registry.connected += 1;
        info!(%peer, %ip, peers = registry.connected, "Client connected");
    }

    fn remove_peer(&self, peer: PeerId, reason: &DisconnectReason) {
        let removed = {
            let mut registry = lock(&self.registry);
            let entry = registry.peers.remove(&peer);
            if entry.is_some() {
                registry.connected = registry.connected.saturating_sub(1);
            }
            entry.map(|entry| (entry, registry.connected))
        };

        // Entry is dropped here, outside the registry lock
        if let Some((entry, remaining)) = removed {
            info!(%peer, ip = %entry.ip, %reason, peers = remaining, "Client disconnected");
            self.inbox.enqueue(NetEvent::PeerDisconnected { peer, ip: entry.ip });
        }
    }

    fn broadcast_frame(&self, frame: Bytes) -> usize {
        let mut reached = 0;
        let mut failed = Vec::new();
        {
            let registry = lock(&self.registry);
            for (peer, entry) in &registry.peers {
                match entry.connection.send_frame(frame.clone()) {
                    Ok(()) => reached += 1,
                    Err(e) => {
                        warn!(%peer, error = %e, "Broadcast to peer failed");
                        failed.push(entry.connection.clone());
                    }
                }
            }
        }

        for connection in failed {
            connection.close();
        }
        reached
    }

    fn update_scene(&self, apply: impl FnOnce(&mut SceneState), message: Message) -> usize {
        let frame = message.to_packet().to_frame();
        let mut reached = 0;
        let mut failed = Vec::new();
        {
            let registry = lock(&self.registry);
            apply(&mut lock(&self.scene));
            // Sent under the registry lock so concurrent updates reach every peer in the same order
            for entry in registry.peers.values() {
                match entry.connection.send_frame(frame.clone()) {
                    Ok(()) => reached += 1,
                    Err(_) => failed.push(entry.connection.clone()),
                }
            }
        }

        debug!(?message, reached, "Scene state updated");
        for connection in failed {
            connection.close();
        }
        reached
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => inner.admit(stream, remote),
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

/// Forwards a peer's packets to the inbox and unregisters it on close
struct ServerSink {
    server: Weak<ServerInner>,
}

impl PacketSink for ServerSink {
    fn deliver(&self, peer: PeerId, packet: Packet) -> Flow {
        if let Some(flow) = reject_undecodable(peer, &packet) {
            return flow;
        }
        if let Some(server) = self.server.upgrade() {
            server.inbox.enqueue(NetEvent::PacketReceived { peer, packet });
        }
        Flow::Continue
    }

    fn closed(&self, peer: PeerId, reason: DisconnectReason) {
        if let Some(server) = self.server.upgrade() {
            server.remove_peer(peer, &reason);
        }
    }
}
