//! Connect server: the publish path.
//!
//! Serializes a payload into an envelope and hands it to the transport,
//! tagged with the queue's delivery mode. Publishing is stateless; the only
//! side effect is the broker I/O itself.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::descriptor::{DeliveryMode, QueueDescriptor};
use crate::envelope::Envelope;
use crate::role::Role;
use crate::transport::{Transport, TransportError};

/// Publish failure, surfaced synchronously to the caller.
///
/// There is no implicit retry or buffering: whether re-sending the same
/// logical action is safe depends on the payload, so retry policy belongs
/// to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("role {role:?} may not publish to queue '{queue}' ({mode:?})")]
    NotEligible {
        queue: String,
        role: Role,
        mode: DeliveryMode,
    },

    #[error("failed to encode payload for queue '{queue}'")]
    Encode {
        queue: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The publish half of a node's coordination layer.
pub struct ConnectServer {
    role: Role,
    node_id: String,
    transport: Arc<dyn Transport>,
}

impl ConnectServer {
    pub(crate) fn new(role: Role, node_id: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            role,
            node_id,
            transport,
        }
    }

    /// Publish `payload` on the described queue.
    ///
    /// Checks publish eligibility against the delivery-mode policy table,
    /// then serializes and hands the envelope to the transport.
    pub async fn send_message<T: Serialize>(
        &self,
        descriptor: &QueueDescriptor,
        payload: &T,
    ) -> Result<(), SendError> {
        let mode = descriptor.mode();
        if !mode.may_publish(self.role) {
            return Err(SendError::NotEligible {
                queue: descriptor.name().to_string(),
                role: self.role,
                mode,
            });
        }

        let envelope = Envelope::seal(descriptor.name(), Some(&self.node_id), payload).map_err(
            |source| SendError::Encode {
                queue: descriptor.name().to_string(),
                source,
            },
        )?;
        let bytes = envelope.to_bytes().map_err(|source| SendError::Encode {
            queue: descriptor.name().to_string(),
            source,
        })?;

        self.transport
            .publish(descriptor.name(), mode, bytes)
            .await?;
        debug!(queue = %descriptor.name(), mode = ?mode, "message published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{QueueKind, QueueRegistry};
    use crate::transport::MemoryBroker;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Action {
        command: String,
    }

    struct Actions;
    impl QueueKind for Actions {
        type Payload = Action;
        const TAG: &'static str = "actions";
        const MODE: DeliveryMode = DeliveryMode::Multicast;
    }

    fn server_for(role: Role, broker: &MemoryBroker) -> ConnectServer {
        ConnectServer::new(role, "test-node".to_string(), broker.connect())
    }

    #[tokio::test]
    async fn test_worker_may_not_publish_multicast() {
        let broker = MemoryBroker::new();
        let registry = QueueRegistry::new();
        let descriptor = registry.register::<Actions>(None).unwrap();

        let server = server_for(Role::Worker, &broker);
        let err = server
            .send_message(&descriptor, &Action {
                command: "say".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NotEligible { role: Role::Worker, .. }));
    }

    #[tokio::test]
    async fn test_leader_publish_reaches_subscriber() {
        let broker = MemoryBroker::new();
        let registry = QueueRegistry::new();
        let descriptor = registry.register::<Actions>(None).unwrap();

        let consumer = broker.connect();
        let mut sub = consumer
            .subscribe(descriptor.name(), descriptor.mode())
            .await
            .unwrap();

        let server = server_for(Role::Leader, &broker);
        let action = Action {
            command: "say hello".to_string(),
        };
        server.send_message(&descriptor, &action).await.unwrap();

        let bytes = sub.recv().await.unwrap();
        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.queue, descriptor.name());
        assert_eq!(envelope.sender.as_deref(), Some("test-node"));
        assert_eq!(envelope.open::<Action>().unwrap(), action);
    }

    #[tokio::test]
    async fn test_publish_after_close_surfaces_transport_error() {
        let broker = MemoryBroker::new();
        let registry = QueueRegistry::new();
        let descriptor = registry.register::<Actions>(None).unwrap();

        let transport = broker.connect();
        let server = ConnectServer::new(Role::Leader, "test-node".to_string(), transport.clone());
        transport.close().await.unwrap();

        let err = server
            .send_message(&descriptor, &Action {
                command: "say".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Transport(TransportError::Closed)));
    }
}
