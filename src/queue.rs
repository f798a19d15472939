//! Typed queue handles.
//!
//! The contract every logical queue exposes to application and plugin
//! code: a stable name, the routing policy, `send`, and handler
//! registration — all typed by the queue kind's declared payload.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::client::{ConnectClient, HandlerError};
use crate::descriptor::{DeliveryMode, QueueDescriptor, QueueKind, TopologyError};
use crate::server::{ConnectServer, SendError};

/// Handle to one declared queue, obtained from `Node::declare`.
pub struct Queue<K: QueueKind> {
    descriptor: QueueDescriptor,
    server: Arc<ConnectServer>,
    client: Arc<ConnectClient>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: QueueKind> Queue<K> {
    pub(crate) fn new(
        descriptor: QueueDescriptor,
        server: Arc<ConnectServer>,
        client: Arc<ConnectClient>,
    ) -> Self {
        Self {
            descriptor,
            server,
            client,
            _kind: PhantomData,
        }
    }

    /// Stable queue name, derived at declaration time.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The queue's descriptor.
    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.descriptor
    }

    /// Routing policy of this queue.
    pub fn mode(&self) -> DeliveryMode {
        self.descriptor.mode()
    }

    /// Whether every subscribed process receives each message.
    pub fn is_multicast(&self) -> bool {
        self.mode() == DeliveryMode::Multicast
    }

    /// Whether each message goes to exactly one subscribed worker.
    pub fn is_worker_pool(&self) -> bool {
        self.mode() == DeliveryMode::WorkerPool
    }

    /// Publish a payload on this queue.
    pub async fn send(&self, payload: &K::Payload) -> Result<(), SendError> {
        self.server.send_message(&self.descriptor, payload).await
    }

    /// Register this process's single handler for the queue.
    ///
    /// Must happen before the node starts; a second registration fails
    /// with `TopologyError::DuplicateHandler`.
    pub fn set_message_handler<F, Fut>(&self, handler: F) -> Result<(), TopologyError>
    where
        F: Fn(K::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.client.register_handler::<K, F, Fut>(&self.descriptor, handler)
    }
}

impl<K: QueueKind> Clone for Queue<K> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            server: Arc::clone(&self.server),
            client: Arc::clone(&self.client),
            _kind: PhantomData,
        }
    }
}

impl<K: QueueKind> std::fmt::Debug for Queue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
