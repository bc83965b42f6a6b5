//! Transport seam: encoded frames and the per-session write contract.

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;

/// A single encoded transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// Sidecar options for a transport write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Frames were produced by the encoder ahead of time and must not be
    /// re-encoded.
    pub pre_encoded: bool,
    /// Delivery may be dropped if the peer is not ready to receive.
    pub volatile: bool,
    /// Frames may be compressed on the wire.
    pub compress: bool,
}

/// Write side of a session's underlying connection.
///
/// Implementations must keep frames from a single writer FIFO. Write
/// failures stay inside the transport: broadcast delivery is best effort.
pub trait Transport: Send + Sync {
    fn write(&self, frames: &[Frame], opts: &WriteOptions);
    fn close(&self);
}

/// What a [`ChannelTransport`] hands to its drain task.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Encoded frames plus their write options.
    Write(Vec<Frame>, WriteOptions),
    /// The session asked for the connection to be torn down.
    Close,
}

/// Transport over an unbounded in-process channel.
///
/// The receiving half is drained by whatever task owns the real connection.
/// Dropping the receiver turns writes into no-ops.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver draining it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn write(&self, frames: &[Frame], opts: &WriteOptions) {
        if self
            .tx
            .send(TransportEvent::Write(frames.to_vec(), *opts))
            .is_err()
        {
            debug!("transport receiver dropped, discarding write");
        }
    }

    fn close(&self) {
        let _ = self.tx.send(TransportEvent::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport_is_fifo() {
        let (transport, mut rx) = ChannelTransport::channel();
        for i in 0..3 {
            transport.write(
                &[Frame::Text(format!("frame-{i}"))],
                &WriteOptions::default(),
            );
        }
        transport.close();

        for i in 0..3 {
            match rx.try_recv() {
                Ok(TransportEvent::Write(frames, _)) => {
                    assert_eq!(frames, vec![Frame::Text(format!("frame-{i}"))]);
                }
                other => panic!("expected a write, got {other:?}"),
            }
        }
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Close)));
    }

    #[test]
    fn test_write_after_receiver_dropped_is_a_noop() {
        let (transport, rx) = ChannelTransport::channel();
        drop(rx);
        transport.write(&[Frame::Text("lost".into())], &WriteOptions::default());
        transport.close();
    }
}
