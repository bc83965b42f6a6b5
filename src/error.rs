//! Error types for the broadcast core.

use thiserror::Error;

use crate::packet::Payload;

/// Errors returned synchronously from selector terminals.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Attempt to emit one of the reserved lifecycle event names.
    #[error(r#""{0}" is a reserved event name"#)]
    ReservedEvent(String),

    /// The selector has no adapter behind it, e.g. a dynamic namespace that
    /// has not been materialized yet.
    #[error("no adapter for this namespace")]
    NoAdapter,

    /// The operation has no defined semantics on a parent namespace.
    #[error("fetch_sockets() is not supported on parent namespaces")]
    UnsupportedOnParent,
}

/// Errors delivered through an acknowledgement callback.
#[derive(Debug, Error)]
pub enum AckError {
    /// The deadline elapsed before every expected reply arrived.
    #[error("operation has timed out")]
    Timeout {
        /// Replies collected before the deadline.
        responses: Vec<Payload>,
    },
}
