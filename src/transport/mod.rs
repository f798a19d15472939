//! Broker boundary.
//!
//! The coordination layer assumes a reliable external publish/subscribe
//! broker and consumes it through the `Transport` trait: publish bytes to a
//! named queue, subscribe to a named queue, close the shared connection.
//! Broker provisioning (framing, exchange/queue declaration, reconnect
//! policy) belongs to the implementation behind the trait.
//!
//! One implementation ships with the crate: the in-process loopback broker
//! in [`memory`], used by standalone deployments and tests.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::descriptor::DeliveryMode;

pub use memory::{MemoryBroker, MemoryTransport};

/// Errors at the broker boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("transport is closed")]
    Closed,
}

/// The broker connection shared by every queue on one process.
///
/// Acquired once at process startup and released exactly once on shutdown;
/// `close` unsubscribes everything this connection registered before the
/// connection goes away.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish an opaque payload to the named queue.
    ///
    /// `mode` is routing metadata for the broker (fan-out vs. competing
    /// consumers). The call suspends only until the broker accepts the
    /// bytes, never until consumers process them. No retry is performed
    /// here; the error is the caller's to act on.
    async fn publish(
        &self,
        queue: &str,
        mode: DeliveryMode,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Open a subscription on the named queue.
    async fn subscribe(
        &self,
        queue: &str,
        mode: DeliveryMode,
    ) -> Result<Subscription, TransportError>;

    /// Release the connection: unsubscribe every subscription opened
    /// through it, then reject further use with `TransportError::Closed`.
    /// Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// One open subscription: a stream of raw envelope bytes for a queue.
pub struct Subscription {
    queue: String,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    /// Build a subscription from a byte channel. Transport implementations
    /// pump broker deliveries into the sender half.
    pub fn new(queue: impl Into<String>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            rx,
        }
    }

    /// The queue this subscription is bound to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .finish()
    }
}
