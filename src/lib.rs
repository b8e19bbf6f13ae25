//! Pose telemetry streaming over TCP with batched CSV recording.
//!
//! Posecast links a pose-producing application (the server) with any number
//! of observing applications (clients). The server streams timestamped
//! position and rotation samples of a fixed set of tracked objects; clients
//! validate the protocol version, drive scene selection, and record the
//! incoming samples to CSV files for later analysis.
//!
//! # Features
//!
//! - **Wire protocol**: length-prefixed little-endian packets with a typed message layer
//! - **Resilient clients**: cancellable retry loop with a version handshake
//! - **Peer management**: id reuse, onboarding, broadcast and per-peer send
//! - **Recording**: batched, locale-independent CSV output with start/stop listeners
//!
//! # Data Flow
//!
//! ```text
//! PoseSource ─► PoseSampler ─► Server::broadcast ──TCP──► Client
//!                                                           │ NetEvent
//!                                                           ▼
//!                        SceneHost ◄── ProtocolHandler ◄── DispatchQueue
//!                                            │
//!                                            ▼
//!                                     TelemetryWriter ─► data/<subject>/<trial>.csv
//! ```
//!
//! ## Example (recording client)
//!
//! ```rust,no_run
//! use posecast::{Posecast, ServerAddress};
//! use posecast::dispatch::{DispatchQueue, EventBus};
//! use posecast::handler::{ProtocolHandler, SceneHost};
//! use std::sync::Arc;
//!
//! struct Headless;
//!
//! impl SceneHost for Headless {
//!     fn change_scene(&mut self, _scene: i32) -> anyhow::Result<()> { Ok(()) }
//!     fn show_y_frame(&mut self, _visible: bool) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! #[tokio::main]
//! async fn main() -> posecast::Result<()> {
//!     let config = Arc::new(posecast::Config::load("posecast.yaml")?);
//!     let inbox = DispatchQueue::new();
//!     let client = Posecast::client(config.clone(), inbox.clone())?;
//!     client.connect("192.168.1.20:5555".parse::<ServerAddress>()?);
//!
//!     let writer = Arc::new(Posecast::recorder(&config));
//!     writer.start_recording_for("S01", "squat-1")?;
//!
//!     let mut handler = ProtocolHandler::new(writer);
//!     let mut bus = EventBus::new();
//!     let mut ticker = tokio::time::interval(config.tick_interval());
//!     loop {
//!         ticker.tick().await;
//!         handler.tick(&inbox, &mut bus, &mut Headless);
//!     }
//! }
//! ```

// Core types and error handling
pub mod address;
pub mod config;
mod error;
pub mod logging;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire protocol and transport
pub mod connection;
pub mod dispatch;
pub mod protocol;

// Application side
pub mod handler;
pub mod sampler;
pub mod telemetry;

// Core exports
pub use error::*;
pub use types::*;

pub use address::{AddressStore, FileAddressStore, MemoryAddressStore, ServerAddress};
pub use config::{Config, PROTOCOL_VERSION};
pub use connection::{Client, ClientState, SceneState, Server, ServerHandle};
pub use dispatch::{DispatchQueue, EventBus, EventKind, NetEvent};
pub use protocol::{Message, Packet};
pub use telemetry::{Recording, TelemetryWriter};

use std::sync::Arc;

/// Unified entry point for posecast endpoints.
///
/// Every constructor takes the shared configuration explicitly; there is no
/// global state.
///
/// # Examples
///
/// ## Streaming server
/// ```rust,no_run
/// use posecast::{Config, DispatchQueue, Posecast};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> posecast::Result<()> {
///     let server = Posecast::serve(Arc::new(Config::default()), DispatchQueue::new()).await?;
///     println!("listening on {}", server.local_addr());
///     Ok(())
/// }
/// ```
pub struct Posecast;

impl Posecast {
    /// Bind a server on `config.bind_address:config.port`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration does not validate
    /// - The address cannot be bound
    pub async fn serve(config: Arc<Config>, inbox: DispatchQueue) -> Result<Server> {
        Server::bind(config, inbox).await
    }

    /// Create a disconnected client. Call [`Client::connect`] to start connecting.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn client(config: Arc<Config>, inbox: DispatchQueue) -> Result<Client> {
        Client::new(config, inbox)
    }

    /// Create an idle CSV recorder for the configured objects and data directory.
    pub fn recorder(config: &Config) -> TelemetryWriter {
        TelemetryWriter::from_config(config)
    }
}
