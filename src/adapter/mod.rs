//! Broadcast adapter contract and shared option types.
//!
//! The adapter owns the room index for one namespace and realizes broadcast
//! intents against it. The default [`MemoryAdapter`] serves a single node;
//! clustered deployments plug in an adapter that relays intents over an
//! external bus and answers through the same callbacks.

mod memory;

pub use memory::MemoryAdapter;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::broadcast;

use crate::error::EmitError;
use crate::packet::{Packet, Payload};
use crate::session::Session;

/// Session identifier, unique within a namespace.
pub type Sid = String;

/// Named multicast group a session may join or leave. A session's own id is
/// also a room (the personal room), so unicast rides the same mechanism.
pub type Room = String;

/// Default capacity of the membership event channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Per-broadcast modifier flags.
#[derive(Debug, Clone, Default)]
pub struct BroadcastFlags {
    /// Allow wire compression for this packet.
    pub compress: bool,
    /// Delivery may be dropped if a recipient transport is not ready.
    pub volatile: bool,
    /// Keep the broadcast on this node even in a cluster.
    pub local: bool,
    /// Force the binary packet encoding.
    pub binary: bool,
    /// Deadline for acknowledgement gathering. `None` behaves as a zero
    /// deadline: the ack terminal fails fast instead of waiting forever.
    pub timeout: Option<Duration>,
}

/// A broadcast intent: the rooms to target, the rooms to subtract, and the
/// modifier flags. Empty `rooms` targets every session in the namespace;
/// `except` always subtracts at the session level.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub rooms: HashSet<Room>,
    pub except: HashSet<Room>,
    pub flags: BroadcastFlags,
}

/// Membership change notifications published by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A room gained its first member.
    RoomCreated(Room),
    /// The last member left a room.
    RoomDeleted(Room),
    /// A session entered a room it was not in.
    Joined { room: Room, sid: Sid },
    /// A session left a room it was in.
    Left { room: Room, sid: Sid },
}

/// Tuning knobs for an adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Capacity of the membership event channel. Subscribers that fall
    /// behind skip events (`RecvError::Lagged`).
    pub event_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            event_capacity: EVENT_BUFFER_SIZE,
        }
    }
}

/// Replacement broadcast routine installed with [`Adapter::set_broadcast`].
pub type BroadcastFn = Arc<dyn Fn(Packet, &BroadcastOptions) + Send + Sync>;

/// Invoked once per cluster server with the number of sessions it wrote to.
pub type ClientCountFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Invoked once per client acknowledgement with the reply payloads.
pub type AckReplyFn = Arc<dyn Fn(Vec<Payload>) + Send + Sync>;

/// Room bookkeeping plus the broadcast engine for one namespace.
pub trait Adapter: Send + Sync {
    /// Called when the owning namespace is set up.
    fn init(&self) {}

    /// Called when the owning namespace shuts down.
    fn close(&self) {}

    /// Number of servers in the cluster. Single node: 1.
    fn server_count(&self) -> u64 {
        1
    }

    /// Adds a session to every room in `rooms`. Idempotent per (sid, room).
    fn add_all(&self, sid: &str, rooms: &[Room]);

    /// Removes a session from one room. Idempotent for absent memberships.
    fn del(&self, sid: &str, room: &str);

    /// Removes a session from every room it joined and forgets the sid.
    fn del_all(&self, sid: &str);

    /// Installs a replacement broadcast routine. Used by parent namespaces
    /// and clustered adapters to take over fan-out.
    fn set_broadcast(&self, broadcast: BroadcastFn);

    /// Fans the packet out, once per matching session.
    fn broadcast(&self, packet: Packet, opts: &BroadcastOptions);

    /// Fans out and gathers acknowledgements: assigns a fresh ack id,
    /// registers `ack` under it on each recipient, then reports the number
    /// of recipients through `client_count`.
    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        client_count: ClientCountFn,
        ack: AckReplyFn,
    );

    /// Ids of the sessions matching `rooms` (empty targets every session),
    /// deduplicated.
    fn sockets(&self, rooms: &HashSet<Room>) -> HashSet<Sid>;

    /// Rooms a session has joined, or `None` for an unknown sid.
    fn socket_rooms(&self, sid: &str) -> Option<HashSet<Room>>;

    /// Live session handles matching the intent.
    fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<Arc<Session>>;

    /// Joins every matching session to `rooms`.
    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    /// Removes every matching session from `rooms`.
    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    /// Disconnects every matching session; `close` tears the connection
    /// down instead of only leaving the namespace.
    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool);

    /// Relays an event to the other servers in the cluster. The in-memory
    /// adapter has no peers and logs a warning instead.
    fn server_side_emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        let _ = args;
        warn!("this adapter does not support server_side_emit ({event})");
        Ok(())
    }

    /// Subscribes to membership change events.
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}
