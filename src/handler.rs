//! Routing of decoded packets to the recorder and the host application

use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::ServerHandle;
use crate::dispatch::{DispatchQueue, EventBus, NetEvent};
use crate::protocol::{Message, Packet};
use crate::telemetry::TelemetryWriter;
use crate::types::{PeerId, Pose};

/// Application side of the protocol: scene control and pose display
///
/// Errors are logged by the handler and never stop the tick.
pub trait SceneHost {
    fn change_scene(&mut self, scene_index: i32) -> anyhow::Result<()>;

    fn show_y_frame(&mut self, visible: bool) -> anyhow::Result<()>;

    fn apply_poses(&mut self, _poses: &[Pose]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_int(&mut self, _value: i32) -> anyhow::Result<()> {
        Ok(())
    }

    /// The server speaks another protocol version and must be updated
    fn on_version_mismatch(&mut self, _expected: &str, _found: &str) {}
}

/// Drains the dispatch queue once per application tick
///
/// Pose rows are recorded when the writer is recording; scene changes go to
/// the host and, on the server, are relayed to every client (latest wins).
///
/// ```rust,no_run
/// use posecast::dispatch::{DispatchQueue, EventBus};
/// use posecast::handler::{ProtocolHandler, SceneHost};
/// use posecast::telemetry::TelemetryWriter;
/// use std::sync::Arc;
///
/// struct Headless;
///
/// impl SceneHost for Headless {
///     fn change_scene(&mut self, _scene: i32) -> anyhow::Result<()> { Ok(()) }
///     fn show_y_frame(&mut self, _visible: bool) -> anyhow::Result<()> { Ok(()) }
/// }
///
/// let queue = DispatchQueue::new();
/// let mut bus = EventBus::new();
/// let writer = Arc::new(TelemetryWriter::new(vec!["Head".into()], "data", 100));
/// let mut handler = ProtocolHandler::new(writer);
/// handler.tick(&queue, &mut bus, &mut Headless);
/// ```
#[derive(Debug)]
pub struct ProtocolHandler {
    writer: Arc<TelemetryWriter>,
    relay: Option<ServerHandle>,
}

impl ProtocolHandler {
    pub fn new(writer: Arc<TelemetryWriter>) -> Self {
        Self { writer, relay: None }
    }

    /// Relay scene requests through `server` (server side only)
    pub fn with_relay(mut self, server: ServerHandle) -> Self {
        self.relay = Some(server);
        self
    }

    pub fn writer(&self) -> &Arc<TelemetryWriter> {
        &self.writer
    }

    /// Handle every pending event, then publish it on `bus`. Returns the number handled.
    pub fn tick<H>(&mut self, queue: &DispatchQueue, bus: &mut EventBus, host: &mut H) -> usize
    where
        H: SceneHost + ?Sized,
    {
        let events = queue.drain_all();
        for event in &events {
            match event {
                NetEvent::PacketReceived { peer, packet } => self.handle_packet(*peer, packet, host),
                NetEvent::VersionMismatch { expected, found } => host.on_version_mismatch(expected, found),
                _ => {}
            }
            bus.publish(event);
        }
        events.len()
    }

    /// Decode one packet and route it by type
    pub fn handle_packet<H>(&mut self, peer: PeerId, packet: &Packet, host: &mut H)
    where
        H: SceneHost + ?Sized,
    {
        let message = match Message::decode(packet) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping undecodable packet");
                return;
            }
        };

        match message {
            Message::TelemetryEntry(row) => {
                if let Err(e) = host.apply_poses(&row.poses) {
                    warn!(%peer, error = %e, "Host failed to apply poses");
                }
                if let Err(e) = self.writer.add_row(&row) {
                    warn!(%peer, error = %e, "Failed to record row");
                }
            }
            Message::ChangeScene(scene_index) => {
                if let Some(server) = &self.relay {
                    server.set_scene(scene_index);
                }
                if let Err(e) = host.change_scene(scene_index) {
                    warn!(%peer, scene_index, error = %e, "Host failed to change scene");
                }
            }
            Message::ShowYFrame(visible) => {
                if let Some(server) = &self.relay {
                    server.set_y_frame(visible);
                }
                if let Err(e) = host.show_y_frame(visible) {
                    warn!(%peer, visible, error = %e, "Host failed to toggle Y frame");
                }
            }
            Message::Int(value) => {
                if let Err(e) = host.on_int(value) {
                    warn!(%peer, value, error = %e, "Host failed to handle int");
                }
            }
            Message::Version(version) => {
                debug!(%peer, %version, "Ignoring version packet outside the handshake");
            }
        }
    }
}
