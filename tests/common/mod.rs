//! Shared helpers for integration tests.
//!
//! One `MemoryBroker` stands in for the external broker; each simulated
//! process is a `Node` with its own connection to it.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use hivelink::descriptor::{DeliveryMode, QueueKind};
use hivelink::node::Node;
use hivelink::role::Role;
use hivelink::transport::MemoryBroker;
use hivelink::HandlerError;

/// An event observed by the leader on the platform gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub channel: String,
    pub user: String,
    pub text: String,
}

pub fn platform_event(text: &str) -> PlatformEvent {
    PlatformEvent {
        channel: "#general".to_string(),
        user: "wanda".to_string(),
        text: text.to_string(),
    }
}

/// An outbound action a plugin wants executed against the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub target: String,
}

pub fn action_request(action: &str) -> ActionRequest {
    ActionRequest {
        action: action.to_string(),
        target: "#general".to_string(),
    }
}

/// Gateway events fan out to every process.
pub struct PlatformEvents;
impl QueueKind for PlatformEvents {
    type Payload = PlatformEvent;
    const TAG: &'static str = "platform-events";
    const MODE: DeliveryMode = DeliveryMode::Multicast;
}

/// Action requests funnel to exactly one executor.
pub struct ActionRequests;
impl QueueKind for ActionRequests {
    type Payload = ActionRequest;
    const TAG: &'static str = "action-requests";
    const MODE: DeliveryMode = DeliveryMode::WorkerPool;
}

/// One simulated process attached to the shared broker.
pub fn node(broker: &MemoryBroker, role: Role) -> Node {
    Node::builder()
        .role(role)
        .transport(broker.connect())
        .build()
        .expect("node build")
}

/// A handler that forwards every payload into an mpsc channel.
pub fn forward<T: Send + 'static>(
    tx: mpsc::Sender<T>,
) -> impl Fn(T) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static {
    move |payload| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(payload).await.expect("test receiver dropped");
            Ok(())
        })
    }
}
