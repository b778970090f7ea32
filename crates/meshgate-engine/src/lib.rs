//! Meshgate Engine - reconciliation between declared state and the daemon
//!
//! Mutations and their daemon-side effects are strictly ordered: a
//! record is persisted first, then an explicit reconciliation step
//! drives the daemon and the packet filter toward the new state.
//! Daemon-facing failures never roll back declared records; they are
//! logged and reported as a [`SyncOutcome`] so the scheduler can retry
//! on its next pass.
//!
//! # Modules
//!
//! - [`provision`] - Site and peer lifecycle command handlers
//! - [`sync`] - Full config regeneration and live peer patching
//! - [`ingest`] - Stats ingestion and traffic snapshots
//! - [`firewall`] - Firewall rule materialization and application
//! - [`error`] - Engine error type

pub mod error;
pub mod firewall;
pub mod ingest;
pub mod provision;
pub mod sync;

pub use error::{EngineError, Result};
pub use provision::{NewPeer, NewSite, UpdateSite};

use dashmap::DashMap;
use meshgate_core::config::EngineConfig;
use meshgate_overlay::firewall::PacketFilter;
use meshgate_overlay::runner::CommandRunner;
use meshgate_store::Store;
use std::sync::Arc;
use uuid::Uuid;

/// Per-operation reconciliation signal
///
/// `Applied` means the daemon/filter now reflects the declared state;
/// `Deferred` means the declared record is committed but the external
/// side could not be converged and will be retried by the next
/// scheduled pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// External state was brought in line with the declared state
    Applied,

    /// External convergence failed or was skipped; retried later
    Deferred { reason: String },
}

impl SyncOutcome {
    /// Construct a deferred outcome
    pub fn deferred(reason: impl Into<String>) -> Self {
        SyncOutcome::Deferred {
            reason: reason.into(),
        }
    }

    /// Whether the external state was converged
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied)
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Applied => write!(f, "applied"),
            SyncOutcome::Deferred { reason } => write!(f, "deferred: {reason}"),
        }
    }
}

/// The reconciliation engine
///
/// Wires the store to the two injectable process boundaries and holds
/// the locks that serialize address allocation per network and config
/// writes per interface.
pub struct Engine {
    store: Arc<dyn Store>,
    runner: Arc<dyn CommandRunner>,
    filter: Arc<dyn PacketFilter>,
    config: EngineConfig,

    /// Serializes allocation per network id
    alloc_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,

    /// Serializes config writes per interface; live patches take the
    /// read half so they exclude full syncs but not each other
    iface_locks: DashMap<String, Arc<tokio::sync::RwLock<()>>>,
}

impl Engine {
    /// Create an engine over the given collaborators
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn CommandRunner>,
        filter: Arc<dyn PacketFilter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            runner,
            filter,
            config,
            alloc_locks: DashMap::new(),
            iface_locks: DashMap::new(),
        }
    }

    /// The underlying declared-state store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub(crate) fn filter(&self) -> &Arc<dyn PacketFilter> {
        &self.filter
    }

    pub(crate) fn alloc_lock(&self, network_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.alloc_locks
            .entry(network_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    pub(crate) fn iface_lock(&self, interface: &str) -> Arc<tokio::sync::RwLock<()>> {
        self.iface_locks
            .entry(interface.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::RwLock::new(())))
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_outcome_display() {
        assert_eq!(SyncOutcome::Applied.to_string(), "applied");
        assert_eq!(
            SyncOutcome::deferred("wg timed out").to_string(),
            "deferred: wg timed out"
        );
    }

    #[test]
    fn test_sync_outcome_is_applied() {
        assert!(SyncOutcome::Applied.is_applied());
        assert!(!SyncOutcome::deferred("x").is_applied());
    }
}
