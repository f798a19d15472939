//! Process node runtime.
//!
//! A `Node` is one process's view of the coordination layer: the resolved
//! role, the descriptor registry, and the publish/dispatch halves wired
//! over one shared broker connection. The connection is acquired once at
//! startup and released exactly once on shutdown — including when startup
//! itself fails partway through subscribing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::client::ConnectClient;
use crate::config::{Config, ConfigError};
use crate::descriptor::{DeliveryMode, QueueKind, QueueRegistry, TopologyError};
use crate::queue::Queue;
use crate::role::Role;
use crate::server::ConnectServer;
use crate::transport::{Transport, TransportError};

/// Startup failure: either the declared topology is inconsistent or the
/// broker rejected a subscription.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Builder for a [`Node`].
pub struct NodeBuilder {
    role: Role,
    node_id: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    mode_overrides: HashMap<String, DeliveryMode>,
}

impl NodeBuilder {
    /// Set the resolved role directly.
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Take role and delivery-mode overrides from loaded configuration.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.role = config.role.resolve();
        self.mode_overrides = config.queues.clone();
        self
    }

    /// The shared broker connection for this process.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Stable identifier for this process, carried as the envelope sender.
    /// A random id is assigned when not set.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn build(self) -> Result<Node, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        let role = self.role;
        let node_id = self
            .node_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(role = ?role, node = %node_id, "node built");
        Ok(Node {
            role,
            node_id: node_id.clone(),
            registry: QueueRegistry::new(),
            mode_overrides: self.mode_overrides,
            server: Arc::new(ConnectServer::new(role, node_id, Arc::clone(&transport))),
            client: Arc::new(ConnectClient::new(role, Arc::clone(&transport))),
            transport,
            state: AtomicU8::new(STATE_IDLE),
        })
    }
}

/// One process's coordination-layer runtime.
pub struct Node {
    role: Role,
    node_id: String,
    registry: QueueRegistry,
    mode_overrides: HashMap<String, DeliveryMode>,
    server: Arc<ConnectServer>,
    client: Arc<ConnectClient>,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.role)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder {
            role: Role::Standalone,
            node_id: None,
            transport: None,
            mode_overrides: HashMap::new(),
        }
    }

    /// The role resolved at startup. Pure, idempotent read.
    pub fn role(&self) -> Role {
        self.role
    }

    /// This process's identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register the queue kind `K` and return its typed handle.
    ///
    /// Every process declares the same kinds and derives identical names;
    /// a duplicate declaration fails with `TopologyError::DuplicateQueue`.
    pub fn declare<K: QueueKind>(&self) -> Result<Queue<K>, TopologyError> {
        if self.state.load(Ordering::Acquire) != STATE_IDLE {
            return Err(TopologyError::AlreadyRunning);
        }
        let mode_override = self.mode_overrides.get(K::TAG).copied();
        let descriptor = self.registry.register::<K>(mode_override)?;
        info!(
            queue = %descriptor.name(),
            mode = ?descriptor.mode(),
            payload = descriptor.payload_type(),
            "queue declared"
        );
        Ok(Queue::new(
            descriptor,
            Arc::clone(&self.server),
            Arc::clone(&self.client),
        ))
    }

    /// Open subscriptions for every declared queue this role may receive
    /// and begin dispatching.
    ///
    /// On failure the shared connection is released before the error is
    /// returned; the node cannot be restarted afterwards.
    pub async fn start(&self) -> Result<(), StartupError> {
        if self
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(TopologyError::AlreadyRunning.into());
        }

        let descriptors = self.registry.descriptors();
        if let Err(e) = self.client.start(&descriptors).await {
            self.release().await;
            return Err(e.into());
        }
        info!(role = ?self.role, node = %self.node_id, "node started");
        Ok(())
    }

    /// Stop dispatching and release the broker connection. Idempotent;
    /// only the first call tears anything down.
    pub async fn shutdown(&self) {
        let prior = self.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if prior == STATE_STOPPED {
            return;
        }
        self.release().await;
        info!(node = %self.node_id, "node stopped");
    }

    /// Drain dispatch tasks, unsubscribe, close the connection.
    async fn release(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
        self.client.shutdown().await;
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed");
        }
    }
}
