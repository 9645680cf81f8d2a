//! In-process message channel pair.
//!
//! Two linked endpoints; `send` on one synchronously hands the message to the
//! other's receive handler. Nothing is serialized and nothing touches the
//! network. Delivery for one endpoint is ordered because it is synchronous.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::mcp::Message;

pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
pub type CloseHandler = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("peer transport closed")]
    PeerClosed,
}

/// The contract a session needs from any transport, in-process or not.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn set_on_message(&self, handler: MessageHandler);
    fn set_on_close(&self, handler: CloseHandler);
    async fn start(&self) -> Result<(), TransportError>;
    async fn send(&self, message: Message) -> Result<(), TransportError>;
    /// Idempotent. The close handler runs at most once and the peer is not
    /// notified.
    async fn close(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
struct Slot {
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
    closed: bool,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One side of a channel pair. Only constructible through [`channel_pair`].
pub struct Endpoint {
    label: &'static str,
    local: Arc<Mutex<Slot>>,
    peer: Arc<Mutex<Slot>>,
}

/// Create a bound (server, client) endpoint pair.
pub fn channel_pair() -> (Endpoint, Endpoint) {
    let server = Arc::new(Mutex::new(Slot::default()));
    let client = Arc::new(Mutex::new(Slot::default()));
    (
        Endpoint { label: "server", local: server.clone(), peer: client.clone() },
        Endpoint { label: "client", local: client, peer: server },
    )
}

impl Endpoint {
    pub fn is_closed(&self) -> bool {
        lock(&self.local).closed
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for Endpoint {
    fn set_on_message(&self, handler: MessageHandler) {
        lock(&self.local).on_message = Some(handler);
    }

    fn set_on_close(&self, handler: CloseHandler) {
        lock(&self.local).on_close = Some(handler);
    }

    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if lock(&self.local).closed {
            return Err(TransportError::Closed);
        }
        // Clone the handler out so the peer may send back from inside it.
        let handler = {
            let peer = lock(&self.peer);
            if peer.closed {
                return Err(TransportError::PeerClosed);
            }
            peer.on_message.clone()
        };
        match handler {
            Some(deliver) => deliver(message),
            None => tracing::trace!(from = self.label, id = ?message.id(), "dropped: peer has no receiver"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let on_close = {
            let mut slot = lock(&self.local);
            if slot.closed {
                return Ok(());
            }
            slot.closed = true;
            slot.on_message = None;
            slot.on_close.take()
        };
        tracing::debug!(endpoint = self.label, "transport closed");
        if let Some(cb) = on_close {
            cb();
        }
        Ok(())
    }
}
