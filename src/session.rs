//! Connected session handle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::adapter::{AckReplyFn, Room, Sid};
use crate::namespace::Namespace;
use crate::packet::{Packet, Payload};
use crate::transport::{Frame, Transport, WriteOptions};

/// Handshake details captured when a session is registered.
#[derive(Debug, Clone, Serialize)]
pub struct Handshake {
    /// When the session completed registration.
    pub issued: DateTime<Utc>,
    /// Remote address as reported by the transport layer.
    pub address: String,
    /// Authentication payload supplied by the client.
    pub auth: Value,
}

/// Hook observing every outgoing packet selected for a session.
pub type OutgoingListener = Arc<dyn Fn(&Packet) + Send + Sync>;

/// A connected client session.
///
/// Owned by its namespace's registry; the adapter refers to it by id only.
/// The ack table maps pending ack ids to the responder that handles the
/// client's reply.
pub struct Session {
    id: Sid,
    handshake: Handshake,
    nsp: Weak<Namespace>,
    transport: Arc<dyn Transport>,
    acks: DashMap<u64, AckReplyFn>,
    data: RwLock<Value>,
    outgoing: RwLock<Option<OutgoingListener>>,
    connected: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: Sid,
        handshake: Handshake,
        nsp: Weak<Namespace>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            handshake,
            nsp,
            transport,
            acks: DashMap::new(),
            data: RwLock::new(Value::Null),
            outgoing: RwLock::new(None),
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Arbitrary user data attached to the session.
    pub fn data(&self) -> Value {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_data(&self, value: Value) {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = value;
    }

    /// Joins the given rooms.
    pub fn join(&self, rooms: &[Room]) {
        if let Some(nsp) = self.nsp.upgrade() {
            nsp.adapter().add_all(&self.id, rooms);
        }
    }

    /// Leaves one room.
    pub fn leave(&self, room: &str) {
        if let Some(nsp) = self.nsp.upgrade() {
            nsp.adapter().del(&self.id, room);
        }
    }

    /// Rooms this session is currently in.
    pub fn rooms(&self) -> HashSet<Room> {
        self.nsp
            .upgrade()
            .and_then(|nsp| nsp.adapter().socket_rooms(&self.id))
            .unwrap_or_default()
    }

    /// Disconnects the session, at most once. `close` tears the underlying
    /// connection down; otherwise the client is told with a DISCONNECT
    /// packet and only this namespace is left.
    pub fn disconnect(&self, close: bool) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if close {
            self.transport.close();
        } else if let Some(nsp) = self.nsp.upgrade() {
            let frames = nsp.encoder().encode(&Packet::disconnect(nsp.name()));
            self.write(
                &frames,
                &WriteOptions {
                    pre_encoded: true,
                    ..Default::default()
                },
            );
        }
        if let Some(nsp) = self.nsp.upgrade() {
            nsp.remove(&self.id);
        }
    }

    /// Registers a responder under an ack id.
    pub(crate) fn register_ack(&self, id: u64, responder: AckReplyFn) {
        self.acks.insert(id, responder);
    }

    /// Entry point for a client acknowledgement. The responder is removed
    /// before it runs, so each reply fires at most once per (session, id).
    pub fn ack(&self, id: u64, args: Vec<Payload>) {
        match self.acks.remove(&id) {
            Some((_, responder)) => responder(args),
            None => debug!("session {}: no pending ack {id}, reply dropped", self.id),
        }
    }

    /// Installs a hook observing packets selected for this session.
    pub fn set_outgoing_listener(&self, listener: OutgoingListener) {
        *self.outgoing.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    pub(crate) fn notify_outgoing(&self, packet: &Packet) {
        let listener = self
            .outgoing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(packet);
        }
    }

    pub(crate) fn write(&self, frames: &[Frame], opts: &WriteOptions) {
        self.transport.write(frames, opts);
    }
}
