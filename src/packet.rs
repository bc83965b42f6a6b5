//! Packet model shared by the selector, the adapter and the encoder.

use bytes::Bytes;
use serde_json::Value;

/// Event names the server reserves for lifecycle signaling. User code may
/// not emit these.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connection",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Returns true if `name` is reserved for lifecycle signaling.
pub fn is_reserved_event(name: &str) -> bool {
    RESERVED_EVENTS.contains(&name)
}

/// Protocol packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    /// Wire digit for this packet type.
    pub(crate) fn code(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }
}

/// A single payload item: JSON or raw binary.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// Returns true if any item in `data` carries binary content.
pub fn has_binary(data: &[Payload]) -> bool {
    data.iter().any(Payload::is_binary)
}

/// A logical packet before encoding.
///
/// `nsp` is stamped by the adapter right before encoding; `id` is assigned
/// only on packets that expect acknowledgements.
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub nsp: String,
    pub data: Vec<Payload>,
    pub id: Option<u64>,
}

impl Packet {
    /// Builds an event packet, selecting the binary variant when any payload
    /// item is binary.
    pub fn event(data: Vec<Payload>) -> Self {
        let packet_type = if has_binary(&data) {
            PacketType::BinaryEvent
        } else {
            PacketType::Event
        };
        Self {
            packet_type,
            nsp: String::new(),
            data,
            id: None,
        }
    }

    /// CONNECT packet carrying the session id assigned by the server.
    pub fn connect(nsp: &str, sid: &str) -> Self {
        Self {
            packet_type: PacketType::Connect,
            nsp: nsp.to_string(),
            data: vec![Payload::Json(serde_json::json!({ "sid": sid }))],
            id: None,
        }
    }

    /// Server-initiated DISCONNECT packet.
    pub fn disconnect(nsp: &str) -> Self {
        Self {
            packet_type: PacketType::Disconnect,
            nsp: nsp.to_string(),
            data: Vec::new(),
            id: None,
        }
    }
}
