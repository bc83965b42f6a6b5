//! Namespace: session registry, selector seeds and registration lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info};
use serde_json::Value;
use uuid::Uuid;

use crate::ack::AckCallback;
use crate::adapter::{Adapter, MemoryAdapter, Room, Sid};
use crate::encoder::{Encoder, JsonEncoder};
use crate::error::EmitError;
use crate::operator::{BroadcastOperator, RemoteSocket};
use crate::packet::{is_reserved_event, Packet, Payload};
use crate::session::{Handshake, Session};
use crate::transport::{Transport, WriteOptions};

/// Middleware run for each session before it is registered; an error rejects
/// the connection.
pub type Middleware = Arc<dyn Fn(&Session) -> Result<()> + Send + Sync>;

/// Listener invoked once a session is registered.
pub type ConnectListener = Arc<dyn Fn(Arc<Session>) + Send + Sync>;

/// A logical channel owning a session registry and its broadcast adapter.
pub struct Namespace {
    name: String,
    sockets: DashMap<Sid, Arc<Session>>,
    ids: AtomicU64,
    adapter: Arc<dyn Adapter>,
    encoder: Arc<dyn Encoder>,
    middleware: RwLock<Vec<Middleware>>,
    connect_listeners: RwLock<Vec<ConnectListener>>,
}

impl Namespace {
    /// Creates a namespace backed by the in-memory adapter and the default
    /// JSON encoder.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_encoder(name, Arc::new(JsonEncoder))
    }

    /// Creates a namespace with a custom encoder.
    pub fn with_encoder(name: impl Into<String>, encoder: Arc<dyn Encoder>) -> Arc<Self> {
        Arc::new_cyclic(|nsp| Self {
            name: name.into(),
            sockets: DashMap::new(),
            ids: AtomicU64::new(0),
            adapter: Arc::new(MemoryAdapter::new(nsp.clone())),
            encoder,
            middleware: RwLock::new(Vec::new()),
            connect_listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    /// Next monotonic ack id.
    pub fn next_ack_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn socket(&self, sid: &str) -> Option<Arc<Session>> {
        self.sockets.get(sid).map(|session| Arc::clone(&session))
    }

    /// Number of registered sessions.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Appends a middleware to the chain run at registration.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.middleware
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(middleware);
    }

    /// Registers a listener invoked for every new session.
    pub fn on_connection(&self, listener: ConnectListener) {
        self.connect_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub(crate) fn middleware_snapshot(&self) -> Vec<Middleware> {
        self.middleware
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn listener_snapshot(&self) -> Vec<ConnectListener> {
        self.connect_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Registers a new session over `transport`: runs the middleware chain,
    /// joins the personal room, delivers the CONNECT packet and notifies
    /// connection listeners. A middleware error rejects the connection and
    /// leaves no trace in the registry.
    pub fn add(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        address: impl Into<String>,
        auth: Value,
    ) -> Result<Arc<Session>> {
        let sid = Uuid::new_v4().to_string();
        let handshake = Handshake {
            issued: Utc::now(),
            address: address.into(),
            auth,
        };
        let session = Arc::new(Session::new(
            sid.clone(),
            handshake,
            Arc::downgrade(self),
            transport,
        ));

        for middleware in self.middleware_snapshot() {
            middleware(&session)?;
        }

        self.sockets.insert(sid.clone(), Arc::clone(&session));
        self.adapter.add_all(&sid, &[sid.clone()]);

        let frames = self.encoder.encode(&Packet::connect(&self.name, &sid));
        session.write(
            &frames,
            &WriteOptions {
                pre_encoded: true,
                ..Default::default()
            },
        );
        info!("session {sid} connected to namespace {}", self.name);

        for listener in self.listener_snapshot() {
            listener(Arc::clone(&session));
        }
        Ok(session)
    }

    /// Deregisters a session and clears its room memberships.
    pub fn remove(&self, sid: &str) {
        self.adapter.del_all(sid);
        if self.sockets.remove(sid).is_some() {
            debug!("session {sid} removed from namespace {}", self.name);
        }
    }

    fn operator(&self) -> BroadcastOperator {
        BroadcastOperator::new(Some(Arc::clone(&self.adapter)))
    }

    /// Targets rooms for the next emit.
    pub fn to<I, R>(&self, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().to(rooms)
    }

    /// Alias of [`to`](Self::to).
    pub fn within<I, R>(&self, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().within(rooms)
    }

    /// Excludes rooms from the next emit.
    pub fn except<I, R>(&self, rooms: I) -> BroadcastOperator
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().except(rooms)
    }

    /// Sets the compress flag for the next emit.
    pub fn compress(&self, compress: bool) -> BroadcastOperator {
        self.operator().compress(compress)
    }

    /// Marks the next emit droppable when a recipient is not ready.
    pub fn volatile(&self) -> BroadcastOperator {
        self.operator().volatile()
    }

    /// Restricts the next emit to this node.
    pub fn local(&self) -> BroadcastOperator {
        self.operator().local()
    }

    /// Deadline for the next ack-gathering emit.
    pub fn timeout(&self, timeout: Duration) -> BroadcastOperator {
        self.operator().timeout(timeout)
    }

    /// Emits to every session of the namespace.
    pub fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        self.operator().emit(event, args)
    }

    /// Emits to every session and gathers acknowledgements.
    pub fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Payload>,
        callback: AckCallback,
    ) -> Result<(), EmitError> {
        self.operator().emit_with_ack(event, args, callback)
    }

    /// Emits a "message" event to every session.
    pub fn send(&self, args: Vec<Payload>) -> Result<(), EmitError> {
        self.operator().send(args)
    }

    /// Ids of every session in the namespace.
    pub fn all_sockets(&self) -> Result<HashSet<Sid>, EmitError> {
        self.operator().all_sockets()
    }

    /// Read-only snapshots of every session.
    pub fn fetch_sockets(&self) -> Vec<RemoteSocket> {
        self.operator().fetch_sockets()
    }

    /// Joins every session to `rooms`.
    pub fn sockets_join(&self, rooms: &[Room]) {
        self.operator().sockets_join(rooms);
    }

    /// Removes every session from `rooms`.
    pub fn sockets_leave(&self, rooms: &[Room]) {
        self.operator().sockets_leave(rooms);
    }

    /// Disconnects every session.
    pub fn disconnect_sockets(&self, close: bool) {
        self.operator().disconnect_sockets(close);
    }

    /// Relays an event to the other servers of the cluster.
    pub fn server_side_emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_string()));
        }
        self.adapter.server_side_emit(event, args)
    }
}
