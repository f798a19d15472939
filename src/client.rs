//! Connect client: the subscribe/dispatch path.
//!
//! Each process registers at most one handler per queue, then opens
//! subscriptions once at startup for every queue its role may receive.
//! Every subscribed queue gets its own dispatch task, so a slow handler on
//! one queue never starves delivery on another; messages within one queue
//! are handled serially, preserving per-publisher FIFO.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::descriptor::{QueueDescriptor, QueueKind, TopologyError};
use crate::envelope::Envelope;
use crate::role::Role;
use crate::transport::{Subscription, Transport, TransportError};

/// Error type application handlers may return; logged and dropped at the
/// dispatch boundary.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-message dispatch failure. Isolated to the one message: logged, the
/// message is dropped, and the subscription loop continues.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to decode message on queue '{queue}'")]
    Decode {
        queue: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler on queue '{queue}' failed")]
    Handler {
        queue: String,
        #[source]
        source: HandlerError,
    },
}

type BoxedHandler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;

/// The subscribe/dispatch half of a node's coordination layer.
pub struct ConnectClient {
    role: Role,
    transport: Arc<dyn Transport>,
    handlers: Mutex<HashMap<String, BoxedHandler>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectClient {
    pub(crate) fn new(role: Role, transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            role,
            transport,
            handlers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register the single handler for `K`'s queue.
    ///
    /// The handler closure is typed by the queue's declared payload;
    /// decoding happens at the dispatch boundary before the handler runs.
    pub(crate) fn register_handler<K, F, Fut>(
        &self,
        descriptor: &QueueDescriptor,
        handler: F,
    ) -> Result<(), TopologyError>
    where
        K: QueueKind,
        F: Fn(K::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(TopologyError::AlreadyRunning);
        }

        let queue = descriptor.name().to_string();
        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |envelope: Envelope| {
            let handler = Arc::clone(&handler);
            let queue = envelope.queue.clone();
            async move {
                let payload: K::Payload =
                    envelope
                        .open()
                        .map_err(|source| DispatchError::Decode {
                            queue: queue.clone(),
                            source,
                        })?;
                handler(payload)
                    .await
                    .map_err(|source| DispatchError::Handler { queue, source })
            }
            .boxed()
        });

        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&queue) {
            return Err(TopologyError::DuplicateHandler(queue));
        }
        handlers.insert(queue, boxed);
        Ok(())
    }

    /// Open subscriptions and spawn one dispatch task per eligible queue.
    ///
    /// Eligibility is evaluated here, once: a queue is subscribed when a
    /// handler is registered for it and its delivery mode delivers to this
    /// process's role.
    pub(crate) async fn start(
        &self,
        descriptors: &[QueueDescriptor],
    ) -> Result<(), TransportError> {
        self.running.store(true, Ordering::Release);
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for descriptor in descriptors {
            let Some(handler) = handlers.get(descriptor.name()) else {
                debug!(queue = %descriptor.name(), "no handler registered, not subscribing");
                continue;
            };
            if !descriptor.mode().delivers_to(self.role) {
                debug!(
                    queue = %descriptor.name(),
                    mode = ?descriptor.mode(),
                    role = ?self.role,
                    "role not eligible, not subscribing"
                );
                continue;
            }

            let subscription = self
                .transport
                .subscribe(descriptor.name(), descriptor.mode())
                .await?;
            info!(
                queue = %descriptor.name(),
                mode = ?descriptor.mode(),
                "subscription opened"
            );

            let task = tokio::spawn(dispatch_loop(
                subscription,
                Arc::clone(handler),
                self.shutdown_tx.subscribe(),
            ));
            self.tasks.lock().await.push(task);
        }
        Ok(())
    }

    /// Signal every dispatch task and wait for them to exit.
    pub(crate) async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Per-queue dispatch loop.
///
/// One bad message never stops this queue's loop nor any other queue's:
/// decode failures and handler failures are logged and the loop moves on.
async fn dispatch_loop(
    mut subscription: Subscription,
    handler: BoxedHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = subscription.queue().to_string();
    debug!(queue = %queue, "dispatch loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(queue = %queue, "dispatch loop stopping");
                break;
            }
            bytes = subscription.recv() => {
                let Some(bytes) = bytes else {
                    info!(queue = %queue, "subscription closed, dispatch loop stopping");
                    break;
                };
                let envelope = match Envelope::from_bytes(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        error!(queue = %queue, error = %e, "undecodable envelope, message dropped");
                        continue;
                    }
                };
                if let Err(e) = handler(envelope).await {
                    match e {
                        DispatchError::Decode { ref source, .. } => {
                            error!(queue = %queue, error = %source, "payload decode failed, message dropped");
                        }
                        DispatchError::Handler { ref source, .. } => {
                            error!(queue = %queue, error = %source, "handler failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DeliveryMode, QueueRegistry};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    struct Notes;
    impl QueueKind for Notes {
        type Payload = Note;
        const TAG: &'static str = "notes";
        const MODE: DeliveryMode = DeliveryMode::Multicast;
    }

    fn test_client() -> (ConnectClient, QueueDescriptor) {
        let broker = crate::transport::MemoryBroker::new();
        let registry = QueueRegistry::new();
        let descriptor = registry.register::<Notes>(None).unwrap();
        (ConnectClient::new(Role::Worker, broker.connect()), descriptor)
    }

    #[tokio::test]
    async fn test_second_handler_registration_is_rejected() {
        let (client, descriptor) = test_client();
        client
            .register_handler::<Notes, _, _>(&descriptor, |_note: Note| async { Ok::<(), HandlerError>(()) })
            .unwrap();
        let err = client
            .register_handler::<Notes, _, _>(&descriptor, |_note: Note| async { Ok::<(), HandlerError>(()) })
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateHandler(name) if name == "hivelink.notes"));
    }

    #[tokio::test]
    async fn test_registration_after_start_is_rejected() {
        let (client, descriptor) = test_client();
        client.start(&[descriptor.clone()]).await.unwrap();
        let err = client
            .register_handler::<Notes, _, _>(&descriptor, |_note: Note| async { Ok::<(), HandlerError>(()) })
            .unwrap_err();
        assert!(matches!(err, TopologyError::AlreadyRunning));
    }
}
