//! Shared test fixtures.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::Value;
use wavehub::{Frame, Namespace, Session, Transport, WriteOptions};

/// Transport that records every write for inspection.
#[derive(Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<(Vec<Frame>, WriteOptions)>>,
    closed: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<(Vec<Frame>, WriteOptions)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Text frames flattened across every recorded write.
    pub fn texts(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(frames, _)| frames.iter())
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(text.clone()),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Transport for RecordingTransport {
    fn write(&self, frames: &[Frame], opts: &WriteOptions) {
        self.writes.lock().unwrap().push((frames.to_vec(), *opts));
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Registers a session and discards its CONNECT packet so assertions only
/// see broadcast traffic.
pub fn connect(nsp: &Arc<Namespace>, address: &str) -> (Arc<Session>, Arc<RecordingTransport>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = RecordingTransport::new();
    let session = nsp
        .add(transport.clone(), address, Value::Null)
        .expect("session registration failed");
    transport.clear();
    (session, transport)
}

pub fn rooms(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

/// Extracts the ack id from an encoded event head like `27["ping"]`.
pub fn ack_id(text: &str) -> u64 {
    text[1..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .expect("no ack id in packet head")
}
