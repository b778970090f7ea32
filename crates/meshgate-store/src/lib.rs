//! Meshgate Store - declared state records and storage backends
//!
//! Holds the records the reconciliation engine treats as the source of
//! truth (sites, networks, peers, firewall rules, traffic samples) and
//! a [`Store`] trait with two backends: persistent redb and an
//! in-memory twin for tests.
//!
//! Records are plain data. Mutations and their daemon-side effects are
//! orchestrated by the engine crate; saving a record here never
//! triggers a sync.

pub mod records;
pub mod store;

pub use records::{
    FirewallRule, Network, Peer, PeerStatus, Protocol, RuleAction, Site, TrafficSample,
};
pub use store::{InMemoryStore, RedbStore, Store, StoreError};
