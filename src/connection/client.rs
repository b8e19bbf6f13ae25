//! Client side: retrying connect loop and version handshake

use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connector::{Connector, TcpConnector};
use super::lock;
use super::transport::{Connection, DisconnectReason, Flow, PacketSink, reject_undecodable};
use crate::address::{AddressStore, ServerAddress};
use crate::config::Config;
use crate::dispatch::{DispatchQueue, NetEvent};
use crate::protocol::{Message, Packet};
use crate::types::{PacketType, PeerId};
use crate::{PosecastError, Result};

/// Connection lifecycle as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    /// Linked to the server; `validated` once the versions matched
    Connected { validated: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Pending,
    Validated,
    Mismatch,
    Lost,
}

/// How one established link ended
enum LinkEnd {
    Cancelled,
    Mismatch,
    Lost,
}

struct ClientInner {
    config: Arc<Config>,
    inbox: DispatchQueue,
    connector: Arc<dyn Connector>,
    store: Option<Arc<dyn AddressStore>>,
    runtime: Handle,
    state: watch::Sender<ClientState>,
    // Bumped by every connect/disconnect so a superseded loop cannot publish state
    generation: AtomicU64,
    attempt: Mutex<Option<CancellationToken>>,
    link: Mutex<Option<Connection>>,
}

/// Client end of the telemetry link
///
/// Events (connect results, server packets, disconnects, version mismatches)
/// are pushed onto the [`DispatchQueue`] given at construction; nothing is
/// delivered on the background tasks themselves.
///
/// ```rust,no_run
/// use posecast::{Client, Config, DispatchQueue};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> posecast::Result<()> {
///     let inbox = DispatchQueue::new();
///     let client = Client::new(Arc::new(Config::default()), inbox.clone())?;
///     client.connect("192.168.1.20:5555".parse::<posecast::ServerAddress>()?);
///     Ok(())
/// }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a disconnected client using plain TCP
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: Arc<Config>, inbox: DispatchQueue) -> Result<Self> {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::with_parts(config, inbox, connector, None)
    }

    /// Create a client with a custom connector and optional address store
    pub fn with_parts(
        config: Arc<Config>,
        inbox: DispatchQueue,
        connector: Arc<dyn Connector>,
        store: Option<Arc<dyn AddressStore>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            PosecastError::connection_failed_with_source("client requires a tokio runtime", Box::new(e))
        })?;
        let (state, _) = watch::channel(ClientState::Disconnected);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                inbox,
                connector,
                store,
                runtime,
                state,
                generation: AtomicU64::new(0),
                attempt: Mutex::new(None),
                link: Mutex::new(None),
            }),
        })
    }

    /// Start connecting to `address`, retrying until it succeeds or is cancelled
    ///
    /// Does nothing while connected. A connect loop already running is
    /// cancelled and replaced, so attempts never stack.
    pub fn connect(&self, address: impl Into<ServerAddress>) {
        let address = address.into();
        if let ClientState::Connected { .. } = self.state() {
            debug!(%address, "Already connected, ignoring connect request");
            return;
        }

        let cancel = CancellationToken::new();
        let generation = {
            let mut attempt = lock(&self.inner.attempt);
            if let Some(previous) = attempt.replace(cancel.clone()) {
                debug!("Restarting in-flight connect loop");
                previous.cancel();
            }
            self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        self.inner.publish(generation, ClientState::Connecting);
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move { inner.run(address, generation, cancel).await });
    }

    /// Stop retrying, close the link and go back to disconnected. Always safe to call.
    pub fn disconnect(&self) {
        let attempt = {
            let mut attempt = lock(&self.inner.attempt);
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            attempt.take()
        };
        if let Some(cancel) = attempt {
            cancel.cancel();
        }

        let link = lock(&self.inner.link).take();
        if let Some(connection) = link {
            connection.close();
        }

        self.inner.state.send_if_modified(|state| {
            let changed = *state != ClientState::Disconnected;
            *state = ClientState::Disconnected;
            changed
        });
    }

    /// Send a message to the server. Only allowed once the version is validated.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_packet(&message.to_packet())
    }

    pub fn send_packet(&self, packet: &Packet) -> Result<()> {
        if !self.is_validated() {
            return Err(PosecastError::NotConnected);
        }
        let link = lock(&self.inner.link).clone();
        match link {
            Some(connection) => connection.send(packet),
            None => Err(PosecastError::NotConnected),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    pub fn is_validated(&self) -> bool {
        self.state() == ClientState::Connected { validated: true }
    }

    /// Stream of state changes, starting with the current state
    pub fn state_updates(&self) -> impl Stream<Item = ClientState> + 'static {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// Last server address persisted by the address store, if any
    pub async fn last_known_address(&self) -> Result<Option<ServerAddress>> {
        match &self.inner.store {
            Some(store) => store.load().await,
            None => Ok(None),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("state", &self.state()).finish()
    }
}

impl ClientInner {
    fn publish(&self, generation: u64, next: ClientState) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    async fn run(self: Arc<Self>, address: ServerAddress, generation: u64, cancel: CancellationToken) {
        let backoff = self.config.retry_backoff();
        let mut attempts = 0u32;
        info!(%address, "Connecting to server");

        loop {
            if cancel.is_cancelled() {
                return;
            }
            attempts += 1;

            // An in-flight connect is allowed to finish; cancellation is observed around it
            match self.connector.connect(address.socket_addr()).await {
                Ok(stream) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match self.link(stream, address, generation, &cancel).await {
                        LinkEnd::Cancelled => return,
                        LinkEnd::Mismatch => {
                            self.publish(generation, ClientState::Disconnected);
                            return;
                        }
                        LinkEnd::Lost if !self.config.reconnect_on_loss => {
                            info!(%address, "Connection lost");
                            self.publish(generation, ClientState::Disconnected);
                            return;
                        }
                        LinkEnd::Lost => {
                            warn!(%address, "Connection lost, reconnecting in {:?}", backoff);
                            self.publish(generation, ClientState::Connecting);
                            attempts = 0;
                        }
                    }
                }
                Err(e) => {
                    warn!(%address, attempt = attempts, error = %e, "Connection attempt failed, retrying in {:?}", backoff);
                    self.inbox.enqueue(NetEvent::ConnectResult { success: false });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn link(
        &self,
        stream: tokio::net::TcpStream,
        address: ServerAddress,
        generation: u64,
        cancel: &CancellationToken,
    ) -> LinkEnd {
        let (handshake_tx, mut handshake_rx) = watch::channel(Handshake::Pending);
        let sink = Arc::new(ClientSink {
            inbox: self.inbox.clone(),
            expected_version: self.config.protocol_version.clone(),
            server_ip: address.ip().to_string(),
            handshake: handshake_tx,
        });

        self.inbox.enqueue(NetEvent::ConnectResult { success: true });
        let connection =
            Connection::spawn(stream, address.socket_addr(), PeerId::SERVER, sink, self.config.max_frame_len);
        *lock(&self.link) = Some(connection.clone());
        self.publish(generation, ClientState::Connected { validated: false });
        info!(%address, "Connected to server, waiting for version");

        let handshake_timeout = self.config.handshake_timeout();
        let handshake = tokio::select! {
            _ = cancel.cancelled() => {
                connection.close();
                return LinkEnd::Cancelled;
            }
            outcome = tokio::time::timeout(
                handshake_timeout,
                async { handshake_rx.wait_for(|h| *h != Handshake::Pending).await.map(|h| *h) },
            ) => match outcome {
                Ok(Ok(handshake)) => handshake,
                Ok(Err(_)) => Handshake::Lost,
                Err(_) => {
                    warn!(%address, "No version received within {:?}", handshake_timeout);
                    Handshake::Lost
                }
            },
        };

        match handshake {
            Handshake::Validated => {
                self.publish(generation, ClientState::Connected { validated: true });
                info!(%address, "Server version validated");
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(&address).await {
                        warn!(%address, error = %e, "Failed to persist server address");
                    }
                }
            }
            Handshake::Mismatch => {
                self.clear_link(&connection);
                return LinkEnd::Mismatch;
            }
            Handshake::Pending | Handshake::Lost => {
                connection.close();
                self.clear_link(&connection);
                return LinkEnd::Lost;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                connection.close();
                LinkEnd::Cancelled
            }
            _ = connection.closed() => {
                self.clear_link(&connection);
                LinkEnd::Lost
            }
        }
    }

    fn clear_link(&self, connection: &Connection) {
        let mut link = lock(&self.link);
        if link.as_ref().is_some_and(|current| current.same_link(connection)) {
            *link = None;
        }
    }
}

/// Gates inbound packets on the version handshake
struct ClientSink {
    inbox: DispatchQueue,
    expected_version: String,
    server_ip: String,
    handshake: watch::Sender<Handshake>,
}

impl ClientSink {
    fn mismatch(&self, found: String) -> Flow {
        error!(
            expected = %self.expected_version,
            found = %found,
            "Protocol version mismatch, server needs updating"
        );
        self.inbox.enqueue(NetEvent::VersionMismatch { expected: self.expected_version.clone(), found });
        self.handshake.send_replace(Handshake::Mismatch);
        Flow::Close(DisconnectReason::ProtocolMismatch)
    }
}

/// Best-effort rendering of a Version payload that failed to decode
fn raw_version(packet: &Packet) -> String {
    let payload = packet.body().get(8..).unwrap_or_default();
    String::from_utf8_lossy(payload).into_owned()
}

impl PacketSink for ClientSink {
    fn deliver(&self, peer: PeerId, packet: Packet) -> Flow {
        if *self.handshake.borrow() == Handshake::Validated {
            if let Some(flow) = reject_undecodable(peer, &packet) {
                return flow;
            }
            self.inbox.enqueue(NetEvent::PacketReceived { peer, packet });
            return Flow::Continue;
        }

        match Message::decode(&packet) {
            Ok(Message::Version(found)) if found == self.expected_version => {
                debug!(version = %found, "Protocol version matches");
                self.handshake.send_replace(Handshake::Validated);
                Flow::Continue
            }
            Ok(Message::Version(found)) => self.mismatch(found),
            Ok(other) => {
                warn!(packet_type = ?other.packet_type(), "Dropping packet received before version");
                Flow::Continue
            }
            // A version that does not decode can never equal ours
            Err(_) if matches!(packet.packet_type(), Ok(PacketType::Version)) => {
                self.mismatch(raw_version(&packet))
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable packet received before version");
                Flow::Continue
            }
        }
    }

    fn closed(&self, peer: PeerId, reason: DisconnectReason) {
        self.handshake.send_if_modified(|h| {
            let pending = *h == Handshake::Pending;
            if pending {
                *h = Handshake::Lost;
            }
            pending
        });
        info!(server = %self.server_ip, %reason, "Disconnected from server");
        self.inbox.enqueue(NetEvent::PeerDisconnected { peer, ip: self.server_ip.clone() });
    }
}
