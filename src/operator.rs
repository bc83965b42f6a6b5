//! Fluent broadcast selector.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::ack::{AckCallback, AckGatherer};
use crate::adapter::{Adapter, BroadcastFlags, BroadcastOptions, Room, Sid};
use crate::error::EmitError;
use crate::packet::{is_reserved_event, Packet, PacketType, Payload};
use crate::session::{Handshake, Session};

/// Immutable, chainable broadcast selector.
///
/// Every combinator clones the selector and returns a new one, so an
/// intermediate value can be held and branched from without the branches
/// leaking state into each other.
#[derive(Clone)]
pub struct BroadcastOperator {
    adapter: Option<Arc<dyn Adapter>>,
    rooms: HashSet<Room>,
    except: HashSet<Room>,
    flags: BroadcastFlags,
}

impl BroadcastOperator {
    pub(crate) fn new(adapter: Option<Arc<dyn Adapter>>) -> Self {
        Self {
            adapter,
            rooms: HashSet::new(),
            except: HashSet::new(),
            flags: BroadcastFlags::default(),
        }
    }

    /// Targets additional rooms.
    pub fn to<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let mut next = self.clone();
        next.rooms.extend(rooms.into_iter().map(Into::into));
        next
    }

    /// Alias of [`to`](Self::to).
    pub fn within<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.to(rooms)
    }

    /// Excludes rooms. Exclusion wins over targeting at the session level.
    pub fn except<I, R>(&self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let mut next = self.clone();
        next.except.extend(rooms.into_iter().map(Into::into));
        next
    }

    /// Sets the compress flag for the next emit.
    pub fn compress(&self, compress: bool) -> Self {
        let mut next = self.clone();
        next.flags.compress = compress;
        next
    }

    /// Marks the next emit droppable when a recipient is not ready to
    /// receive (network slowness, or a long-polling client in the middle of
    /// a request-response cycle).
    pub fn volatile(&self) -> Self {
        let mut next = self.clone();
        next.flags.volatile = true;
        next
    }

    /// Restricts the next emit to this node in a clustered deployment.
    pub fn local(&self) -> Self {
        let mut next = self.clone();
        next.flags.local = true;
        next
    }

    /// Deadline for [`emit_with_ack`](Self::emit_with_ack). Leaving the
    /// deadline unset behaves as zero: the ack terminal fails fast instead
    /// of waiting forever.
    pub fn timeout(&self, timeout: Duration) -> Self {
        let mut next = self.clone();
        next.flags.timeout = Some(timeout);
        next
    }

    /// Rooms this selector targets.
    pub fn rooms(&self) -> &HashSet<Room> {
        &self.rooms
    }

    /// Rooms this selector excludes.
    pub fn except_rooms(&self) -> &HashSet<Room> {
        &self.except
    }

    /// Flags accumulated so far.
    pub fn flags(&self) -> &BroadcastFlags {
        &self.flags
    }

    fn options(&self) -> BroadcastOptions {
        BroadcastOptions {
            rooms: self.rooms.clone(),
            except: self.except.clone(),
            flags: self.flags.clone(),
        }
    }

    fn event_packet(&self, event: &str, args: Vec<Payload>) -> Result<Packet, EmitError> {
        if is_reserved_event(event) {
            return Err(EmitError::ReservedEvent(event.to_string()));
        }
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Payload::Json(Value::String(event.to_string())));
        data.extend(args);
        let mut packet = Packet::event(data);
        if self.flags.binary {
            packet.packet_type = PacketType::BinaryEvent;
        }
        Ok(packet)
    }

    /// Emits to every matching session.
    pub fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        let packet = self.event_packet(event, args)?;
        let adapter = self.adapter.as_ref().ok_or(EmitError::NoAdapter)?;
        adapter.broadcast(packet, &self.options());
        Ok(())
    }

    /// Emits and gathers one acknowledgement per recipient, delivering a
    /// single terminal callback once every reply has arrived or the deadline
    /// elapsed. Must be called within a Tokio runtime.
    pub fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Payload>,
        callback: AckCallback,
    ) -> Result<(), EmitError> {
        let packet = self.event_packet(event, args)?;
        let adapter = self.adapter.as_ref().ok_or(EmitError::NoAdapter)?;
        let gatherer = AckGatherer::arm(self.flags.timeout, callback);
        let count_target = Arc::clone(&gatherer);
        let reply_target = Arc::clone(&gatherer);
        adapter.broadcast_with_ack(
            packet,
            &self.options(),
            Arc::new(move |clients| count_target.on_server_report(clients)),
            Arc::new(move |reply| reply_target.on_client_reply(reply)),
        );
        // the server count is read after dispatch: clustered adapters may
        // only learn it asynchronously
        gatherer.finish_dispatch(adapter.server_count());
        Ok(())
    }

    /// Emits a "message" event.
    pub fn send(&self, args: Vec<Payload>) -> Result<(), EmitError> {
        self.emit("message", args)
    }

    /// Deduplicated ids of every matching session.
    pub fn all_sockets(&self) -> Result<HashSet<Sid>, EmitError> {
        let adapter = self.adapter.as_ref().ok_or(EmitError::NoAdapter)?;
        Ok(adapter.sockets(&self.rooms))
    }

    /// Read-only snapshots of the matching sessions.
    pub fn fetch_sockets(&self) -> Vec<RemoteSocket> {
        let Some(adapter) = &self.adapter else {
            return Vec::new();
        };
        adapter
            .fetch_sockets(&self.options())
            .into_iter()
            .map(|session| RemoteSocket::new(Arc::clone(adapter), &session))
            .collect()
    }

    /// Joins every matching session to `rooms`.
    pub fn sockets_join(&self, rooms: &[Room]) {
        if let Some(adapter) = &self.adapter {
            adapter.add_sockets(&self.options(), rooms);
        }
    }

    /// Removes every matching session from `rooms`.
    pub fn sockets_leave(&self, rooms: &[Room]) {
        if let Some(adapter) = &self.adapter {
            adapter.del_sockets(&self.options(), rooms);
        }
    }

    /// Disconnects every matching session; `close` tears the connection
    /// down instead of only leaving the namespace.
    pub fn disconnect_sockets(&self, close: bool) {
        if let Some(adapter) = &self.adapter {
            adapter.disconnect_sockets(&self.options(), close);
        }
    }
}

/// Read-only view of a matched session.
///
/// Snapshot semantics keep clustered callers from accidentally holding live
/// local state; the mutating helpers go back through a selector targeting
/// the session's personal room.
pub struct RemoteSocket {
    id: Sid,
    handshake: Handshake,
    rooms: HashSet<Room>,
    data: Value,
    operator: BroadcastOperator,
}

impl RemoteSocket {
    fn new(adapter: Arc<dyn Adapter>, session: &Session) -> Self {
        let id = session.id().to_string();
        let rooms = adapter.socket_rooms(&id).unwrap_or_default();
        let operator = BroadcastOperator::new(Some(adapter)).to([id.clone()]);
        Self {
            id,
            handshake: session.handshake().clone(),
            rooms,
            data: session.data(),
            operator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Rooms the session was in when the snapshot was taken.
    pub fn rooms(&self) -> &HashSet<Room> {
        &self.rooms
    }

    /// User data attached to the session when the snapshot was taken.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Emits to this session.
    pub fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        self.operator.emit(event, args)
    }

    /// Joins this session to the given rooms.
    pub fn join(&self, rooms: &[Room]) {
        self.operator.sockets_join(rooms);
    }

    /// Removes this session from a room.
    pub fn leave(&self, room: &str) {
        self.operator.sockets_leave(&[room.to_string()]);
    }

    /// Disconnects this session.
    pub fn disconnect(&self, close: bool) {
        self.operator.disconnect_sockets(close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operator() -> BroadcastOperator {
        BroadcastOperator::new(None)
    }

    #[test]
    fn test_combinators_snapshot_instead_of_sharing() {
        let base = operator().to(["a"]);
        let extended = base.to(["b"]);

        assert_eq!(base.rooms().len(), 1);
        assert!(base.rooms().contains("a"));
        assert_eq!(extended.rooms().len(), 2);
        assert!(extended.rooms().contains("a"));
        assert!(extended.rooms().contains("b"));
    }

    #[test]
    fn test_flag_combinators_do_not_mutate_the_source() {
        let base = operator();
        let configured = base
            .volatile()
            .local()
            .compress(true)
            .timeout(Duration::from_millis(250));

        assert!(!base.flags().volatile);
        assert!(!base.flags().local);
        assert!(!base.flags().compress);
        assert!(base.flags().timeout.is_none());

        assert!(configured.flags().volatile);
        assert!(configured.flags().local);
        assert!(configured.flags().compress);
        assert_eq!(configured.flags().timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_emit_rejects_reserved_event_names() {
        let result = operator().emit("disconnect", vec![]);
        assert!(matches!(result, Err(EmitError::ReservedEvent(name)) if name == "disconnect"));
    }

    #[test]
    fn test_all_sockets_without_adapter() {
        assert!(matches!(
            operator().all_sockets(),
            Err(EmitError::NoAdapter)
        ));
    }

    #[test]
    fn test_emit_without_adapter() {
        assert!(matches!(
            operator().emit("hello", vec![json!(1).into()]),
            Err(EmitError::NoAdapter)
        ));
    }
}
