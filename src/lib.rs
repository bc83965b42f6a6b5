//! Room-based broadcast core for realtime messaging servers.
//!
//! `wavehub` keeps the bidirectional mapping between connected sessions and
//! named rooms, and fans application packets out to the sessions selected by
//! a room/exclusion filter — optionally gathering one acknowledgement per
//! recipient under a deadline.
//!
//! ## Architecture
//!
//! ```text
//! Namespace ── selector seeds ──► BroadcastOperator (immutable chain)
//!     │                                   │ terminal
//!     │ owns                              ▼
//!     └────────────────────────► Adapter (room index + fan-out)
//!                                         │ encode once, write per session
//!                                         ▼
//!                               Session ──► Transport (FIFO frames)
//! ```
//!
//! A selector accumulates target rooms, exclusions and flags, then hands a
//! single broadcast intent to the adapter. The adapter resolves the intent
//! against its room index into an at-most-once set of sessions and writes
//! the pre-encoded frames through each. The adapter is the clustering seam:
//! the in-memory one serves a single node, and `set_broadcast` lets a parent
//! namespace or a clustered adapter take over fan-out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use wavehub::{ChannelTransport, Namespace};
//!
//! # fn main() -> anyhow::Result<()> {
//! let nsp = Namespace::new("/");
//! let (transport, _rx) = ChannelTransport::channel();
//! let session = nsp.add(Arc::new(transport), "127.0.0.1:4000", json!(null))?;
//! session.join(&["lobby".to_string()]);
//! nsp.to(["lobby"]).emit("welcome", vec![json!("hi").into()])?;
//! # Ok(())
//! # }
//! ```

mod ack;
pub mod adapter;
pub mod encoder;
pub mod error;
pub mod namespace;
pub mod operator;
pub mod packet;
pub mod parent;
pub mod session;
pub mod transport;

pub use ack::AckCallback;
pub use adapter::{
    AckReplyFn, Adapter, AdapterConfig, AdapterEvent, BroadcastFlags, BroadcastFn,
    BroadcastOptions, ClientCountFn, MemoryAdapter, Room, Sid,
};
pub use encoder::{Encoder, JsonEncoder};
pub use error::{AckError, EmitError};
pub use namespace::{ConnectListener, Middleware, Namespace};
pub use operator::{BroadcastOperator, RemoteSocket};
pub use packet::{has_binary, is_reserved_event, Packet, PacketType, Payload, RESERVED_EVENTS};
pub use parent::ParentNamespace;
pub use session::{Handshake, OutgoingListener, Session};
pub use transport::{ChannelTransport, Frame, Transport, TransportEvent, WriteOptions};
