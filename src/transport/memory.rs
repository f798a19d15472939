//! In-process loopback broker.
//!
//! Routes envelopes over tokio channels within a single OS process: the
//! whole deployment for standalone mode, or several simulated processes
//! sharing one `MemoryBroker` in tests. Delivery semantics match the
//! contract a real broker provides: fan-out per subscription for multicast
//! queues, competing consumers for worker-pool queues, per-publisher FIFO,
//! at-most-once with no backlog for absent subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Subscription, Transport, TransportError};
use crate::config::BrokerConfig;
use crate::descriptor::DeliveryMode;

/// Buffered deliveries per subscription before publishers are backpressured.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Endpoint {
    owner: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct QueueSubscribers {
    endpoints: Vec<Endpoint>,
    /// Round-robin cursor for worker-pool delivery.
    cursor: usize,
}

struct BrokerShared {
    capacity: usize,
    queues: Mutex<HashMap<String, QueueSubscribers>>,
    next_owner: AtomicU64,
}

/// The shared in-process broker. Clone-cheap; every simulated process
/// attaches with [`MemoryBroker::connect`].
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<BrokerShared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Broker sized from configuration.
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::with_capacity(config.channel_capacity)
    }

    /// Broker with a custom per-subscription buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                capacity,
                queues: Mutex::new(HashMap::new()),
                next_owner: AtomicU64::new(0),
            }),
        }
    }

    /// Attach one process to the broker, yielding its shared connection.
    pub fn connect(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            shared: Arc::clone(&self.shared),
            owner: self.shared.next_owner.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One process's connection to the loopback broker.
pub struct MemoryTransport {
    shared: Arc<BrokerShared>,
    owner: u64,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueSubscribers>> {
        self.shared.queues.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        queue: &str,
        mode: DeliveryMode,
        mut payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Snapshot targets under the lock, send outside it.
        let targets: Vec<mpsc::Sender<Vec<u8>>> = {
            let mut queues = self.lock_queues();
            let Some(subscribers) = queues.get_mut(queue) else {
                debug!(queue = %queue, "no subscribers, message dropped");
                return Ok(());
            };
            subscribers.endpoints.retain(|e| !e.tx.is_closed());
            if subscribers.endpoints.is_empty() {
                debug!(queue = %queue, "no live subscribers, message dropped");
                return Ok(());
            }
            match mode {
                DeliveryMode::WorkerPool => {
                    let index = subscribers.cursor % subscribers.endpoints.len();
                    subscribers.cursor = subscribers.cursor.wrapping_add(1);
                    vec![subscribers.endpoints[index].tx.clone()]
                }
                DeliveryMode::LeaderOnly | DeliveryMode::Multicast => subscribers
                    .endpoints
                    .iter()
                    .map(|e| e.tx.clone())
                    .collect(),
            }
        };

        let count = targets.len();
        for (i, tx) in targets.into_iter().enumerate() {
            // Hand over the buffer on the final delivery.
            let bytes = if i + 1 == count {
                std::mem::take(&mut payload)
            } else {
                payload.clone()
            };
            if tx.send(bytes).await.is_err() {
                // Subscriber went away between snapshot and send.
                debug!(queue = %queue, "subscriber closed mid-delivery, copy dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        _mode: DeliveryMode,
    ) -> Result<Subscription, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let mut queues = self.lock_queues();
        queues
            .entry(queue.to_string())
            .or_default()
            .endpoints
            .push(Endpoint {
                owner: self.owner,
                tx,
            });
        debug!(queue = %queue, owner = self.owner, "subscription opened");
        Ok(Subscription::new(queue, rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut queues = self.lock_queues();
        for (name, subscribers) in queues.iter_mut() {
            let before = subscribers.endpoints.len();
            subscribers.endpoints.retain(|e| e.owner != self.owner);
            if subscribers.endpoints.len() != before {
                debug!(queue = %name, owner = self.owner, "subscription released");
            }
        }
        queues.retain(|_, subscribers| !subscribers.endpoints.is_empty());
        Ok(())
    }
}
