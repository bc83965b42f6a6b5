//! Packet encoding.

use bytes::Bytes;
use serde_json::{json, Value};

use crate::packet::{Packet, PacketType, Payload};
use crate::transport::Frame;

/// Turns a logical packet into transport frames.
///
/// Implementations must be pure and safe to call from multiple threads: the
/// adapter encodes once per broadcast and reuses the frames for every
/// recipient.
pub trait Encoder: Send + Sync {
    fn encode(&self, packet: &Packet) -> Vec<Frame>;
}

/// Default JSON encoder.
///
/// Wire form: `<type>[<attachments>-][<nsp>,][<id>][<body>]`. Binary payload
/// items are replaced by `{"_placeholder":true,"num":n}` markers in the JSON
/// body and appended as separate binary frames in marker order.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, packet: &Packet) -> Vec<Frame> {
        let mut attachments: Vec<Bytes> = Vec::new();
        let body: Vec<Value> = packet
            .data
            .iter()
            .map(|item| match item {
                Payload::Json(value) => value.clone(),
                Payload::Binary(bytes) => {
                    let num = attachments.len();
                    attachments.push(bytes.clone());
                    json!({ "_placeholder": true, "num": num })
                }
            })
            .collect();

        let mut head = String::new();
        head.push(packet.packet_type.code());
        if !attachments.is_empty() {
            head.push_str(&attachments.len().to_string());
            head.push('-');
        }
        if !packet.nsp.is_empty() && packet.nsp != "/" {
            head.push_str(&packet.nsp);
            head.push(',');
        }
        if let Some(id) = packet.id {
            head.push_str(&id.to_string());
        }
        match packet.packet_type {
            // CONNECT and CONNECT_ERROR carry a single object, not an array
            PacketType::Connect | PacketType::ConnectError => {
                if let Some(first) = body.first() {
                    head.push_str(&first.to_string());
                }
            }
            _ => {
                if !body.is_empty() {
                    head.push_str(&Value::Array(body).to_string());
                }
            }
        }

        let mut frames = Vec::with_capacity(1 + attachments.len());
        frames.push(Frame::Text(head));
        frames.extend(attachments.into_iter().map(Frame::Binary));
        frames
    }
}
