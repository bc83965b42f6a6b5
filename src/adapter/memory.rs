//! Single-node adapter: the room index plus the fan-out engine.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use tokio::sync::broadcast;

use super::{
    AckReplyFn, Adapter, AdapterConfig, AdapterEvent, BroadcastFlags, BroadcastFn,
    BroadcastOptions, ClientCountFn, Room, Sid,
};
use crate::namespace::Namespace;
use crate::packet::Packet;
use crate::session::Session;
use crate::transport::WriteOptions;

/// In-memory adapter for a single server.
///
/// Keeps the bidirectional room index as two concurrent maps that are mutual
/// inverses: `rooms` (room to members) and `sids` (session to joined rooms).
/// A room key exists iff it has at least one member. Membership transitions
/// are published on a broadcast channel.
pub struct MemoryAdapter {
    nsp: Weak<Namespace>,
    rooms: DashMap<Room, HashSet<Sid>>,
    sids: DashMap<Sid, HashSet<Room>>,
    events: broadcast::Sender<AdapterEvent>,
    broadcast_override: RwLock<Option<BroadcastFn>>,
}

impl MemoryAdapter {
    pub fn new(nsp: Weak<Namespace>) -> Self {
        Self::with_config(nsp, AdapterConfig::default())
    }

    pub fn with_config(nsp: Weak<Namespace>, config: AdapterConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            nsp,
            rooms: DashMap::new(),
            sids: DashMap::new(),
            events,
            broadcast_override: RwLock::new(None),
        }
    }

    fn publish(&self, event: AdapterEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Sids excluded by the intent's except rooms, materialized once per
    /// selection pass.
    fn except_sids(&self, except: &HashSet<Room>) -> HashSet<Sid> {
        let mut out = HashSet::new();
        for room in except {
            if let Some(members) = self.rooms.get(room) {
                out.extend(members.iter().cloned());
            }
        }
        out
    }

    /// Resolves the intent against the index and the session registry into
    /// an at-most-once list of live sessions.
    ///
    /// The plan is materialized before any per-session action runs, so
    /// actions are free to re-enter the index (bulk join/leave do) and
    /// membership drift mid-broadcast only affects later calls.
    fn apply(&self, opts: &BroadcastOptions) -> Vec<Arc<Session>> {
        let Some(nsp) = self.nsp.upgrade() else {
            return Vec::new();
        };
        let except = self.except_sids(&opts.except);
        let mut plan = Vec::new();
        if !opts.rooms.is_empty() {
            let mut visited: HashSet<Sid> = HashSet::new();
            for room in &opts.rooms {
                let Some(members) = self.rooms.get(room) else {
                    continue;
                };
                for sid in members.iter() {
                    if visited.contains(sid) || except.contains(sid) {
                        continue;
                    }
                    if let Some(session) = nsp.socket(sid) {
                        plan.push(session);
                        visited.insert(sid.clone());
                    }
                }
            }
        } else {
            for entry in self.sids.iter() {
                if except.contains(entry.key()) {
                    continue;
                }
                if let Some(session) = nsp.socket(entry.key()) {
                    plan.push(session);
                }
            }
        }
        plan
    }

    fn write_options(flags: &BroadcastFlags) -> WriteOptions {
        WriteOptions {
            pre_encoded: true,
            volatile: flags.volatile,
            compress: flags.compress,
        }
    }

    /// Single-node fan-out: encode once, write per recipient.
    fn broadcast_local(&self, mut packet: Packet, opts: &BroadcastOptions) {
        let Some(nsp) = self.nsp.upgrade() else {
            return;
        };
        packet.nsp = nsp.name().to_string();
        let frames = nsp.encoder().encode(&packet);
        let write_opts = Self::write_options(&opts.flags);
        for session in self.apply(opts) {
            session.notify_outgoing(&packet);
            session.write(&frames, &write_opts);
        }
    }

    /// Room-side removal with its leave/delete transitions.
    fn del_from_room(&self, room: &str, sid: &str) {
        let (removed, emptied) = match self.rooms.get_mut(room) {
            Some(mut members) => (members.remove(sid), members.is_empty()),
            None => return,
        };
        if removed {
            self.publish(AdapterEvent::Left {
                room: room.to_string(),
                sid: sid.to_string(),
            });
        }
        if emptied && self.rooms.remove_if(room, |_, members| members.is_empty()).is_some() {
            self.publish(AdapterEvent::RoomDeleted(room.to_string()));
        }
    }
}

impl Adapter for MemoryAdapter {
    fn add_all(&self, sid: &str, rooms: &[Room]) {
        // Sid side first; its guard is dropped before the room side is
        // touched so no call holds entries on both maps at once.
        {
            let mut joined = self.sids.entry(sid.to_string()).or_default();
            for room in rooms {
                joined.insert(room.clone());
            }
        }
        for room in rooms {
            let (created, added) = match self.rooms.entry(room.clone()) {
                Entry::Occupied(mut entry) => (false, entry.get_mut().insert(sid.to_string())),
                Entry::Vacant(entry) => {
                    entry.insert(HashSet::from([sid.to_string()]));
                    (true, true)
                }
            };
            if created {
                self.publish(AdapterEvent::RoomCreated(room.clone()));
            }
            if added {
                self.publish(AdapterEvent::Joined {
                    room: room.clone(),
                    sid: sid.to_string(),
                });
            }
        }
    }

    fn del(&self, sid: &str, room: &str) {
        if let Some(mut joined) = self.sids.get_mut(sid) {
            joined.remove(room);
        }
        self.del_from_room(room, sid);
    }

    fn del_all(&self, sid: &str) {
        let rooms: Vec<Room> = self
            .sids
            .get(sid)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default();
        for room in &rooms {
            self.del_from_room(room, sid);
        }
        self.sids.remove(sid);
    }

    fn set_broadcast(&self, broadcast: BroadcastFn) {
        *self
            .broadcast_override
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(broadcast);
    }

    fn broadcast(&self, packet: Packet, opts: &BroadcastOptions) {
        let replacement = self
            .broadcast_override
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match replacement {
            Some(broadcast) => broadcast(packet, opts),
            None => self.broadcast_local(packet, opts),
        }
    }

    fn broadcast_with_ack(
        &self,
        mut packet: Packet,
        opts: &BroadcastOptions,
        client_count: ClientCountFn,
        ack: AckReplyFn,
    ) {
        let Some(nsp) = self.nsp.upgrade() else {
            client_count(0);
            return;
        };
        packet.nsp = nsp.name().to_string();
        // one id for the whole fan-out: replies are distinguished by session
        // identity, not by ack id
        let id = nsp.next_ack_id();
        packet.id = Some(id);
        let frames = nsp.encoder().encode(&packet);
        let write_opts = Self::write_options(&opts.flags);
        let mut recipients: u64 = 0;
        for session in self.apply(opts) {
            recipients += 1;
            session.register_ack(id, ack.clone());
            session.notify_outgoing(&packet);
            session.write(&frames, &write_opts);
        }
        debug!("broadcast {id} delivered to {recipients} sessions");
        client_count(recipients);
    }

    fn sockets(&self, rooms: &HashSet<Room>) -> HashSet<Sid> {
        let opts = BroadcastOptions {
            rooms: rooms.clone(),
            ..Default::default()
        };
        self.apply(&opts)
            .into_iter()
            .map(|session| session.id().to_string())
            .collect()
    }

    fn socket_rooms(&self, sid: &str) -> Option<HashSet<Room>> {
        self.sids.get(sid).map(|joined| joined.value().clone())
    }

    fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<Arc<Session>> {
        self.apply(opts)
    }

    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        for session in self.apply(opts) {
            session.join(rooms);
        }
    }

    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        for session in self.apply(opts) {
            for room in rooms {
                session.leave(room);
            }
        }
    }

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        for session in self.apply(opts) {
            session.disconnect(close);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}
