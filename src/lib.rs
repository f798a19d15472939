//! hivelink - leader/worker coordination for multi-process chat bots
//!
//! A chat platform allows one process per bot identity to hold the
//! real-time gateway connection. hivelink lets that one "leader" process
//! own the connection while any number of stateless "worker" processes
//! execute plugin and command logic, routing traffic over an external
//! publish/subscribe broker: platform events fan out from the leader to
//! every worker, and action requests funnel to whichever process may
//! execute them.

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod node;
pub mod queue;
pub mod role;
pub mod server;
pub mod transport;

pub use client::HandlerError;
pub use config::Config;
pub use descriptor::{DeliveryMode, QueueKind};
pub use node::Node;
pub use queue::Queue;
pub use role::Role;
pub use transport::{MemoryBroker, Transport};
