//! Queue descriptors, delivery modes, and the startup-time registry.
//!
//! Every process (leader and each worker) builds an identical descriptor
//! table independently: a queue's name derives from the static tag on its
//! `QueueKind` declaration, so two processes agree on "this is the same
//! logical channel" with zero coordination traffic.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Prefix for derived queue names, namespacing them on a shared broker.
const QUEUE_NAME_PREFIX: &str = "hivelink";

/// Routing policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Self-addressed leader queue, used when the leader defers work to
    /// itself asynchronously.
    LeaderOnly,
    /// Competing consumers: exactly one subscribed worker receives each
    /// message. Which one is unspecified and may vary message to message.
    WorkerPool,
    /// Fan-out: every subscribed process receives its own copy.
    Multicast,
}

impl DeliveryMode {
    /// Whether `role` may publish on a queue with this mode.
    ///
    /// Standalone substitutes for both leader and sole worker in every row
    /// of the policy table.
    pub fn may_publish(self, role: Role) -> bool {
        match self {
            DeliveryMode::LeaderOnly => role.is_leader(),
            DeliveryMode::WorkerPool => true,
            DeliveryMode::Multicast => role.is_leader(),
        }
    }

    /// Whether a process with `role` receives from a queue with this mode.
    ///
    /// The leader never joins a WorkerPool queue as a fallback consumer; a
    /// deployment without workers runs Standalone instead.
    pub fn delivers_to(self, role: Role) -> bool {
        match self {
            DeliveryMode::LeaderOnly => role.is_leader(),
            DeliveryMode::WorkerPool => role.is_worker(),
            DeliveryMode::Multicast => true,
        }
    }
}

/// Static declaration of a logical queue.
///
/// Implemented by zero-sized marker types, one per queue kind:
///
/// ```
/// use hivelink::descriptor::{DeliveryMode, QueueKind};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct PlatformEvent {
///     channel: String,
///     text: String,
/// }
///
/// struct PlatformEvents;
///
/// impl QueueKind for PlatformEvents {
///     type Payload = PlatformEvent;
///     const TAG: &'static str = "platform-events";
///     const MODE: DeliveryMode = DeliveryMode::Multicast;
/// }
/// ```
///
/// `TAG` must be unique across the deployment; the derived queue name is
/// identical in every process by construction.
pub trait QueueKind: Send + Sync + 'static {
    /// The decoded type carried by this queue. Heterogeneous payloads on
    /// one queue are a programming error.
    type Payload: Serialize + DeserializeOwned + Send + 'static;

    /// Stable tag assigned at the point the queue kind is declared.
    const TAG: &'static str;

    /// Routing policy, overridable per deployment through configuration.
    const MODE: DeliveryMode;
}

/// Derive the broker queue name for a declared tag.
pub fn queue_name(tag: &str) -> String {
    format!("{QUEUE_NAME_PREFIX}.{tag}")
}

/// Immutable description of one registered queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    name: String,
    mode: DeliveryMode,
    payload_type: &'static str,
}

impl QueueDescriptor {
    /// Globally unique queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routing policy, fixed at registration.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Rust name of the declared payload type, for diagnostics.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }
}

/// Topology misconfiguration. Fatal at startup: the process must not run
/// with duplicate or contradictory queue/handler state.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("queue '{0}' is already registered")]
    DuplicateQueue(String),

    #[error("a handler is already registered for queue '{0}'")]
    DuplicateHandler(String),

    #[error("node is already running; queues and handlers are registered before start")]
    AlreadyRunning,
}

/// The name → descriptor table, built once at process startup and read-only
/// thereafter.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    entries: Mutex<HashMap<String, QueueDescriptor>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the descriptor for `K`, deriving its name from `K::TAG`.
    ///
    /// `mode_override` replaces `K::MODE` when the deployment configures a
    /// different routing policy for this tag; the mode is immutable once
    /// registered either way.
    pub fn register<K: QueueKind>(
        &self,
        mode_override: Option<DeliveryMode>,
    ) -> Result<QueueDescriptor, TopologyError> {
        let descriptor = QueueDescriptor {
            name: queue_name(K::TAG),
            mode: mode_override.unwrap_or(K::MODE),
            payload_type: std::any::type_name::<K::Payload>(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(descriptor.name()) {
            return Err(TopologyError::DuplicateQueue(descriptor.name().to_string()));
        }
        entries.insert(descriptor.name().to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Snapshot of every registered descriptor.
    pub fn descriptors(&self) -> Vec<QueueDescriptor> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    struct Pings;
    impl QueueKind for Pings {
        type Payload = Ping;
        const TAG: &'static str = "pings";
        const MODE: DeliveryMode = DeliveryMode::Multicast;
    }

    struct SamePings;
    impl QueueKind for SamePings {
        type Payload = Ping;
        const TAG: &'static str = "pings";
        const MODE: DeliveryMode = DeliveryMode::WorkerPool;
    }

    #[test]
    fn test_queue_name_is_deterministic() {
        assert_eq!(queue_name(Pings::TAG), "hivelink.pings");
        assert_eq!(queue_name(Pings::TAG), queue_name(SamePings::TAG));
    }

    #[test]
    fn test_register_builds_descriptor() {
        let registry = QueueRegistry::new();
        let descriptor = registry.register::<Pings>(None).unwrap();
        assert_eq!(descriptor.name(), "hivelink.pings");
        assert_eq!(descriptor.mode(), DeliveryMode::Multicast);
        assert!(descriptor.payload_type().ends_with("Ping"));
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let registry = QueueRegistry::new();
        registry.register::<Pings>(None).unwrap();
        let err = registry.register::<SamePings>(None).unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateQueue(name) if name == "hivelink.pings"));
    }

    #[test]
    fn test_register_applies_mode_override() {
        let registry = QueueRegistry::new();
        let descriptor = registry
            .register::<Pings>(Some(DeliveryMode::WorkerPool))
            .unwrap();
        assert_eq!(descriptor.mode(), DeliveryMode::WorkerPool);
    }

    #[test]
    fn test_leader_only_policy() {
        let mode = DeliveryMode::LeaderOnly;
        assert!(mode.may_publish(Role::Leader));
        assert!(mode.may_publish(Role::Standalone));
        assert!(!mode.may_publish(Role::Worker));
        assert!(mode.delivers_to(Role::Leader));
        assert!(mode.delivers_to(Role::Standalone));
        assert!(!mode.delivers_to(Role::Worker));
    }

    #[test]
    fn test_worker_pool_policy() {
        let mode = DeliveryMode::WorkerPool;
        assert!(mode.may_publish(Role::Leader));
        assert!(mode.may_publish(Role::Worker));
        assert!(mode.may_publish(Role::Standalone));
        assert!(mode.delivers_to(Role::Worker));
        assert!(mode.delivers_to(Role::Standalone));
    }

    #[test]
    fn worker_pool_not_delivered_to_leader() {
        assert!(!DeliveryMode::WorkerPool.delivers_to(Role::Leader));
    }

    #[test]
    fn test_multicast_policy() {
        let mode = DeliveryMode::Multicast;
        assert!(mode.may_publish(Role::Leader));
        assert!(mode.may_publish(Role::Standalone));
        assert!(!mode.may_publish(Role::Worker));
        assert!(mode.delivers_to(Role::Leader));
        assert!(mode.delivers_to(Role::Worker));
        assert!(mode.delivers_to(Role::Standalone));
    }

    #[test]
    fn test_delivery_mode_deserializes_snake_case() {
        let mode: DeliveryMode = serde_json::from_str("\"worker_pool\"").unwrap();
        assert_eq!(mode, DeliveryMode::WorkerPool);
    }
}
