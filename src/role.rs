//! Process role resolution.
//!
//! A deployment runs exactly one leader (the process holding the platform's
//! exclusive real-time gateway connection) and any number of workers. The
//! role is resolved once from configuration before any queue registration
//! and is immutable for the process lifetime; it is passed by value into
//! the connect server/client rather than read from global state.

use serde::Deserialize;

/// The role a process plays in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the platform gateway connection; publishes platform events.
    Leader,
    /// Executes plugin/command logic; no direct platform connection.
    Worker,
    /// Single-process deployment acting as leader and sole worker.
    Standalone,
}

impl Role {
    /// Resolve the process role from the two configured intents.
    ///
    /// Worker intent wins when both are set; neither set means Standalone.
    pub fn resolve(want_leader: bool, want_worker: bool) -> Role {
        if want_worker {
            Role::Worker
        } else if want_leader {
            Role::Leader
        } else {
            Role::Standalone
        }
    }

    /// Whether this process carries leader responsibilities.
    pub fn is_leader(self) -> bool {
        matches!(self, Role::Leader | Role::Standalone)
    }

    /// Whether this process carries worker responsibilities.
    pub fn is_worker(self) -> bool {
        matches!(self, Role::Worker | Role::Standalone)
    }
}

/// Role intents as they appear in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Run this process as a worker.
    pub run_as_worker: bool,
    /// Run this process as the leader.
    pub run_as_leader: bool,
}

impl RoleConfig {
    /// Resolve the configured intents into a role.
    pub fn resolve(&self) -> Role {
        Role::resolve(self.run_as_leader, self.run_as_worker)
    }
}
