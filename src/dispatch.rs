//! Hand-off of network events from background tasks to the owning loop.
//!
//! Reader tasks never touch application state directly. They enqueue a
//! [`NetEvent`] and the owning loop drains the queue once per tick, in order,
//! and routes each event to its subscribers.
//!
//! ```text
//! reader task ─┐
//! reader task ─┼─► DispatchQueue ──drain_all()──► ProtocolHandler / EventBus
//! connect loop ┘     (FIFO, mutex)                  (owning loop, one tick)
//! ```
//!
//! ## Usage Example
//!
//! ```rust
//! use posecast::dispatch::{DispatchQueue, EventBus, EventKind, NetEvent};
//! use posecast::types::PeerId;
//!
//! let queue = DispatchQueue::new();
//! let mut bus = EventBus::new();
//! bus.subscribe(EventKind::PeerConnected, |event| println!("{:?}", event));
//!
//! queue.enqueue(NetEvent::PeerConnected { peer: PeerId(1), ip: "10.0.0.2".into() });
//! assert_eq!(bus.pump(&queue), 1);
//! assert!(queue.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::protocol::Packet;
use crate::types::PeerId;

/// Event produced by a connection task for the owning loop
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// A packet arrived from a peer (the server is [`PeerId::SERVER`] on the client side)
    PacketReceived { peer: PeerId, packet: Packet },
    /// A client was admitted by the server
    PeerConnected { peer: PeerId, ip: String },
    /// A peer link closed, reported once per link
    PeerDisconnected { peer: PeerId, ip: String },
    /// Outcome of one client connection attempt
    ConnectResult { success: bool },
    /// The server speaks a different protocol version
    VersionMismatch { expected: String, found: String },
}

impl NetEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NetEvent::PacketReceived { .. } => EventKind::PacketReceived,
            NetEvent::PeerConnected { .. } => EventKind::PeerConnected,
            NetEvent::PeerDisconnected { .. } => EventKind::PeerDisconnected,
            NetEvent::ConnectResult { .. } => EventKind::ConnectResult,
            NetEvent::VersionMismatch { .. } => EventKind::VersionMismatch,
        }
    }
}

/// Discriminant of a [`NetEvent`], used as a subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PacketReceived,
    PeerConnected,
    PeerDisconnected,
    ConnectResult,
    VersionMismatch,
}

/// Multi-producer FIFO drained by a single consumer
///
/// Cloning shares the same queue.
#[derive(Debug, Clone, Default)]
pub struct DispatchQueue {
    events: Arc<Mutex<Vec<NetEvent>>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Safe from any task or thread.
    pub fn enqueue(&self, event: NetEvent) {
        trace!(kind = ?event.kind(), "Enqueue event");
        self.lock().push(event);
    }

    /// Take every pending event in enqueue order, leaving the queue empty
    pub fn drain_all(&self) -> Vec<NetEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<NetEvent>> {
        // A panicking producer cannot leave the Vec half-written
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&NetEvent) + Send>;

/// Per-kind subscriber lists, invoked on the owning loop only
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&NetEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.entry(kind).or_default().push((id, Box::new(callback)));
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.subscribers.values_mut() {
            if let Some(index) = list.iter().position(|(sub, _)| *sub == id) {
                drop(list.remove(index));
                return true;
            }
        }
        false
    }

    /// Invoke every subscriber of the event's kind, in subscription order
    pub fn publish(&mut self, event: &NetEvent) {
        if let Some(list) = self.subscribers.get_mut(&event.kind()) {
            for (_, callback) in list.iter_mut() {
                callback(event);
            }
        }
    }

    /// Drain the queue and publish each event. Returns the number drained.
    pub fn pump(&mut self, queue: &DispatchQueue) -> usize {
        let events = queue.drain_all();
        for event in &events {
            self.publish(event);
        }
        events.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self.subscribers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}
