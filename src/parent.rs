//! Parent namespaces: one broadcast surface over many child namespaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::EmitError;
use crate::namespace::Namespace;
use crate::operator::RemoteSocket;
use crate::packet::Payload;

/// Process-wide counter naming parent namespaces `/_1`, `/_2`, ...
static PARENT_COUNT: AtomicU64 = AtomicU64::new(0);

/// A namespace grouping every session of its child namespaces.
///
/// Children are created on demand, typically for dynamic namespaces matched
/// by a predicate at connection time. The parent installs a broadcast
/// override that forwards each intent to every child's adapter, so selectors
/// seeded from the parent reach the union of the children.
pub struct ParentNamespace {
    nsp: Arc<Namespace>,
    children: Arc<RwLock<Vec<Arc<Namespace>>>>,
}

impl ParentNamespace {
    pub fn new() -> Self {
        let nsp = Namespace::new(format!(
            "/_{}",
            PARENT_COUNT.fetch_add(1, Ordering::Relaxed) + 1
        ));
        let children = Arc::new(RwLock::new(Vec::<Arc<Namespace>>::new()));
        let fanout = Arc::clone(&children);
        nsp.adapter().set_broadcast(Arc::new(move |packet, opts| {
            for child in fanout.read().unwrap_or_else(|e| e.into_inner()).iter() {
                child.adapter().broadcast(packet.clone(), opts);
            }
        }));
        Self { nsp, children }
    }

    /// The namespace backing this parent. Selectors seeded from it route
    /// through the child fan-out override.
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.nsp
    }

    /// Creates a child namespace inheriting the parent's middleware chain
    /// and connection listeners as they exist right now.
    pub fn create_child(&self, name: impl Into<String>) -> Arc<Namespace> {
        let child = Namespace::new(name);
        for middleware in self.nsp.middleware_snapshot() {
            child.use_middleware(middleware);
        }
        for listener in self.nsp.listener_snapshot() {
            child.on_connection(listener);
        }
        self.children
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&child));
        child
    }

    /// Emits to every child namespace.
    pub fn emit(&self, event: &str, args: Vec<Payload>) -> Result<(), EmitError> {
        let children = self
            .children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for child in children {
            child.emit(event, args.clone())?;
        }
        Ok(())
    }

    /// Children may exist on some cluster nodes only (they are created when
    /// a client connects), so enumerating their sessions has no reliable
    /// meaning.
    pub fn fetch_sockets(&self) -> Result<Vec<RemoteSocket>, EmitError> {
        Err(EmitError::UnsupportedOnParent)
    }
}

impl Default for ParentNamespace {
    fn default() -> Self {
        Self::new()
    }
}
