//! Storage backends for declared state
//!
//! A [`Store`] trait with create-or-update semantics per record family,
//! backed either by a persistent redb database or by an in-memory twin
//! for tests. Values are serde_json blobs keyed by record id; the
//! targeted queries the engine needs (peers of a network, rules of a
//! network in priority order) scan and filter, which is comfortably
//! fast at the scale of one site's peer set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::records::{FirewallRule, Network, Peer, Site, TrafficSample};

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const SITES_TABLE: Table = TableDefinition::new("sites");
const NETWORKS_TABLE: Table = TableDefinition::new("networks");
const PEERS_TABLE: Table = TableDefinition::new("peers");
const RULES_TABLE: Table = TableDefinition::new("firewall_rules");
const SAMPLES_TABLE: Table = TableDefinition::new("traffic_samples");

const ALL_TABLES: [Table; 5] = [
    SITES_TABLE,
    NETWORKS_TABLE,
    PEERS_TABLE,
    RULES_TABLE,
    SAMPLES_TABLE,
];

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Trait for declared-state storage backends
///
/// `put_*` methods create or update; `delete_*` methods return whether
/// the record existed.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_site(&self, site: &Site) -> Result<(), StoreError>;
    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError>;
    async fn site_by_name(&self, name: &str) -> Result<Option<Site>, StoreError>;
    async fn list_sites(&self) -> Result<Vec<Site>, StoreError>;
    async fn delete_site(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn put_network(&self, network: &Network) -> Result<(), StoreError>;
    async fn get_network(&self, id: Uuid) -> Result<Option<Network>, StoreError>;
    /// Networks of a site, oldest first -- the first one is the default
    /// target for new peers
    async fn networks_for_site(&self, site_id: Uuid) -> Result<Vec<Network>, StoreError>;
    async fn delete_network(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn put_peer(&self, peer: &Peer) -> Result<(), StoreError>;
    async fn get_peer(&self, id: Uuid) -> Result<Option<Peer>, StoreError>;
    async fn list_peers(&self) -> Result<Vec<Peer>, StoreError>;
    async fn peers_for_site(&self, site_id: Uuid) -> Result<Vec<Peer>, StoreError>;
    async fn peers_for_network(&self, network_id: Uuid) -> Result<Vec<Peer>, StoreError>;
    async fn peer_by_public_key(&self, public_key: &str) -> Result<Option<Peer>, StoreError>;
    async fn delete_peer(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn put_rule(&self, rule: &FirewallRule) -> Result<(), StoreError>;
    /// Rules of a network ordered by ascending priority
    async fn rules_for_network(&self, network_id: Uuid) -> Result<Vec<FirewallRule>, StoreError>;
    /// Drop every rule derived from the given peer, returning the count
    async fn delete_rules_for_peer(&self, peer_id: Uuid) -> Result<usize, StoreError>;
    /// Drop every rule of the given network, returning the count
    async fn delete_rules_for_network(&self, network_id: Uuid) -> Result<usize, StoreError>;

    async fn add_sample(&self, sample: &TrafficSample) -> Result<(), StoreError>;
    /// Samples of a peer, oldest first
    async fn samples_for_peer(&self, peer_id: Uuid) -> Result<Vec<TrafficSample>, StoreError>;
}

/// Redb-based persistent storage
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        Self::init_tables(db)
    }

    /// Create an in-memory redb database (useful for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init_tables(db)
    }

    fn init_tables(db: Database) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            for table in ALL_TABLES {
                let _ = write_txn.open_table(table)?;
            }
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn put<T: Serialize>(
        &self,
        table: Table,
        id: Uuid,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = id.to_string();
        let data = serde_json::to_vec(value)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        table: Table,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;

        match table.get(id.to_string().as_str())? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
    ) -> Result<Vec<T>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    fn remove(&self, table: Table, id: Uuid) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(table)?;
            let existed = table.remove(id.to_string().as_str())?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn remove_where<T, F>(
        &self,
        table: Table,
        predicate: F,
    ) -> Result<usize, StoreError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(table)?;

            let mut doomed = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let record: T = serde_json::from_slice(value.value())?;
                if predicate(&record) {
                    doomed.push(key.value().to_string());
                }
            }

            for key in &doomed {
                table.remove(key.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn put_site(&self, site: &Site) -> Result<(), StoreError> {
        self.put(SITES_TABLE, site.id, site)
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError> {
        self.fetch(SITES_TABLE, id)
    }

    async fn site_by_name(&self, name: &str) -> Result<Option<Site>, StoreError> {
        let sites: Vec<Site> = self.scan(SITES_TABLE)?;
        Ok(sites.into_iter().find(|s| s.name == name))
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut sites: Vec<Site> = self.scan(SITES_TABLE)?;
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    async fn delete_site(&self, id: Uuid) -> Result<bool, StoreError> {
        self.remove(SITES_TABLE, id)
    }

    async fn put_network(&self, network: &Network) -> Result<(), StoreError> {
        self.put(NETWORKS_TABLE, network.id, network)
    }

    async fn get_network(&self, id: Uuid) -> Result<Option<Network>, StoreError> {
        self.fetch(NETWORKS_TABLE, id)
    }

    async fn networks_for_site(&self, site_id: Uuid) -> Result<Vec<Network>, StoreError> {
        let mut networks: Vec<Network> = self.scan(NETWORKS_TABLE)?;
        networks.retain(|n| n.site_id == site_id);
        networks.sort_by_key(|n| n.created_at);
        Ok(networks)
    }

    async fn delete_network(&self, id: Uuid) -> Result<bool, StoreError> {
        self.remove(NETWORKS_TABLE, id)
    }

    async fn put_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        self.put(PEERS_TABLE, peer.id, peer)
    }

    async fn get_peer(&self, id: Uuid) -> Result<Option<Peer>, StoreError> {
        self.fetch(PEERS_TABLE, id)
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, StoreError> {
        let mut peers: Vec<Peer> = self.scan(PEERS_TABLE)?;
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peers_for_site(&self, site_id: Uuid) -> Result<Vec<Peer>, StoreError> {
        let mut peers: Vec<Peer> = self.scan(PEERS_TABLE)?;
        peers.retain(|p| p.site_id == site_id);
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peers_for_network(&self, network_id: Uuid) -> Result<Vec<Peer>, StoreError> {
        let mut peers: Vec<Peer> = self.scan(PEERS_TABLE)?;
        peers.retain(|p| p.network_id == network_id);
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peer_by_public_key(&self, public_key: &str) -> Result<Option<Peer>, StoreError> {
        let peers: Vec<Peer> = self.scan(PEERS_TABLE)?;
        Ok(peers.into_iter().find(|p| p.public_key == public_key))
    }

    async fn delete_peer(&self, id: Uuid) -> Result<bool, StoreError> {
        self.remove(PEERS_TABLE, id)
    }

    async fn put_rule(&self, rule: &FirewallRule) -> Result<(), StoreError> {
        self.put(RULES_TABLE, rule.id, rule)
    }

    async fn rules_for_network(&self, network_id: Uuid) -> Result<Vec<FirewallRule>, StoreError> {
        let mut rules: Vec<FirewallRule> = self.scan(RULES_TABLE)?;
        rules.retain(|r| r.network_id == network_id);
        rules.sort_by_key(|r| (r.priority, r.created_at));
        Ok(rules)
    }

    async fn delete_rules_for_peer(&self, peer_id: Uuid) -> Result<usize, StoreError> {
        self.remove_where(RULES_TABLE, |r: &FirewallRule| r.peer_id == Some(peer_id))
    }

    async fn delete_rules_for_network(&self, network_id: Uuid) -> Result<usize, StoreError> {
        self.remove_where(RULES_TABLE, |r: &FirewallRule| r.network_id == network_id)
    }

    async fn add_sample(&self, sample: &TrafficSample) -> Result<(), StoreError> {
        self.put(SAMPLES_TABLE, sample.id, sample)
    }

    async fn samples_for_peer(&self, peer_id: Uuid) -> Result<Vec<TrafficSample>, StoreError> {
        let mut samples: Vec<TrafficSample> = self.scan(SAMPLES_TABLE)?;
        samples.retain(|s| s.peer_id == peer_id);
        samples.sort_by_key(|s| s.recorded_at);
        Ok(samples)
    }
}

#[derive(Default)]
struct InMemoryInner {
    sites: HashMap<Uuid, Site>,
    networks: HashMap<Uuid, Network>,
    peers: HashMap<Uuid, Peer>,
    rules: HashMap<Uuid, FirewallRule>,
    samples: HashMap<Uuid, TrafficSample>,
}

/// In-memory storage for testing
#[derive(Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<InMemoryInner>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_site(&self, site: &Site) -> Result<(), StoreError> {
        self.inner.write().await.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError> {
        Ok(self.inner.read().await.sites.get(&id).cloned())
    }

    async fn site_by_name(&self, name: &str) -> Result<Option<Site>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sites.values().find(|s| s.name == name).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let inner = self.inner.read().await;
        let mut sites: Vec<_> = inner.sites.values().cloned().collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    async fn delete_site(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.sites.remove(&id).is_some())
    }

    async fn put_network(&self, network: &Network) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .networks
            .insert(network.id, network.clone());
        Ok(())
    }

    async fn get_network(&self, id: Uuid) -> Result<Option<Network>, StoreError> {
        Ok(self.inner.read().await.networks.get(&id).cloned())
    }

    async fn networks_for_site(&self, site_id: Uuid) -> Result<Vec<Network>, StoreError> {
        let inner = self.inner.read().await;
        let mut networks: Vec<_> = inner
            .networks
            .values()
            .filter(|n| n.site_id == site_id)
            .cloned()
            .collect();
        networks.sort_by_key(|n| n.created_at);
        Ok(networks)
    }

    async fn delete_network(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.networks.remove(&id).is_some())
    }

    async fn put_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        self.inner.write().await.peers.insert(peer.id, peer.clone());
        Ok(())
    }

    async fn get_peer(&self, id: Uuid) -> Result<Option<Peer>, StoreError> {
        Ok(self.inner.read().await.peers.get(&id).cloned())
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, StoreError> {
        let inner = self.inner.read().await;
        let mut peers: Vec<_> = inner.peers.values().cloned().collect();
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peers_for_site(&self, site_id: Uuid) -> Result<Vec<Peer>, StoreError> {
        let inner = self.inner.read().await;
        let mut peers: Vec<_> = inner
            .peers
            .values()
            .filter(|p| p.site_id == site_id)
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peers_for_network(&self, network_id: Uuid) -> Result<Vec<Peer>, StoreError> {
        let inner = self.inner.read().await;
        let mut peers: Vec<_> = inner
            .peers
            .values()
            .filter(|p| p.network_id == network_id)
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.created_at);
        Ok(peers)
    }

    async fn peer_by_public_key(&self, public_key: &str) -> Result<Option<Peer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .peers
            .values()
            .find(|p| p.public_key == public_key)
            .cloned())
    }

    async fn delete_peer(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.peers.remove(&id).is_some())
    }

    async fn put_rule(&self, rule: &FirewallRule) -> Result<(), StoreError> {
        self.inner.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn rules_for_network(&self, network_id: Uuid) -> Result<Vec<FirewallRule>, StoreError> {
        let inner = self.inner.read().await;
        let mut rules: Vec<_> = inner
            .rules
            .values()
            .filter(|r| r.network_id == network_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.priority, r.created_at));
        Ok(rules)
    }

    async fn delete_rules_for_peer(&self, peer_id: Uuid) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.rules.len();
        inner.rules.retain(|_, r| r.peer_id != Some(peer_id));
        Ok(before - inner.rules.len())
    }

    async fn delete_rules_for_network(&self, network_id: Uuid) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.rules.len();
        inner.rules.retain(|_, r| r.network_id != network_id);
        Ok(before - inner.rules.len())
    }

    async fn add_sample(&self, sample: &TrafficSample) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .samples
            .insert(sample.id, sample.clone());
        Ok(())
    }

    async fn samples_for_peer(&self, peer_id: Uuid) -> Result<Vec<TrafficSample>, StoreError> {
        let inner = self.inner.read().await;
        let mut samples: Vec<_> = inner
            .samples
            .values()
            .filter(|s| s.peer_id == peer_id)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.recorded_at);
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{PeerStatus, Protocol, RuleAction};
    use chrono::Utc;

    fn test_site(name: &str) -> Site {
        let now = Utc::now();
        Site {
            id: Uuid::new_v4(),
            name: name.to_string(),
            endpoint: "203.0.113.10".to_string(),
            listen_port: 51820,
            subnet: "10.13.13.0/24".parse().unwrap(),
            interface: "wg0".to_string(),
            private_key: "priv".to_string(),
            public_key: format!("pub-{name}"),
            dns_servers: vec!["1.1.1.1".to_string()],
            allowed_ranges: vec!["0.0.0.0/0".to_string()],
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_peer(site: &Site, network: &Network, name: &str, last_octet: u8) -> Peer {
        let now = Utc::now();
        Peer {
            id: Uuid::new_v4(),
            user: "alice".to_string(),
            site_id: site.id,
            network_id: network.id,
            name: name.to_string(),
            address: format!("10.13.13.{last_octet}").parse().unwrap(),
            private_key: "priv".to_string(),
            public_key: format!("pub-{name}"),
            allowed_ranges: vec!["0.0.0.0/0".to_string()],
            status: PeerStatus::Active,
            endpoint: None,
            bytes_sent: 0,
            bytes_received: 0,
            last_handshake: None,
            connected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_rule(network: &Network, peer: Option<&Peer>, priority: u32) -> FirewallRule {
        FirewallRule {
            id: Uuid::new_v4(),
            network_id: network.id,
            peer_id: peer.map(|p| p.id),
            name: format!("rule-{priority}"),
            action: RuleAction::Allow,
            protocol: Protocol::Any,
            source: String::new(),
            destination: String::new(),
            priority,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    async fn run_store_suite(store: &dyn Store) {
        let site = test_site("fra1");
        store.put_site(&site).await.unwrap();

        assert!(store.get_site(site.id).await.unwrap().is_some());
        assert!(store.site_by_name("fra1").await.unwrap().is_some());
        assert!(store.site_by_name("ams1").await.unwrap().is_none());

        let network = Network::default_for_site(&site);
        store.put_network(&network).await.unwrap();
        assert_eq!(store.networks_for_site(site.id).await.unwrap().len(), 1);

        let peer_a = test_peer(&site, &network, "laptop", 2);
        let peer_b = test_peer(&site, &network, "phone", 3);
        store.put_peer(&peer_a).await.unwrap();
        store.put_peer(&peer_b).await.unwrap();

        assert_eq!(store.peers_for_network(network.id).await.unwrap().len(), 2);
        let found = store
            .peer_by_public_key("pub-laptop")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, peer_a.id);

        // Rules come back ordered by priority
        store
            .put_rule(&test_rule(&network, None, 20))
            .await
            .unwrap();
        store
            .put_rule(&test_rule(&network, Some(&peer_a), 10))
            .await
            .unwrap();
        let rules = store.rules_for_network(network.id).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].priority, 10);

        // Wholesale replacement drops only the peer's rules
        let removed = store.delete_rules_for_peer(peer_a.id).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.rules_for_network(network.id).await.unwrap().len(), 1);

        let sample = TrafficSample::of(&peer_a, Utc::now());
        store.add_sample(&sample).await.unwrap();
        assert_eq!(store.samples_for_peer(peer_a.id).await.unwrap().len(), 1);

        assert!(store.delete_peer(peer_b.id).await.unwrap());
        assert!(!store.delete_peer(peer_b.id).await.unwrap());
        assert!(store.delete_site(site.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_suite() {
        let store = InMemoryStore::new();
        run_store_suite(&store).await;
    }

    #[tokio::test]
    async fn test_redb_suite() {
        let store = RedbStore::in_memory().unwrap();
        run_store_suite(&store).await;
    }

    #[tokio::test]
    async fn test_redb_put_is_upsert() {
        let store = RedbStore::in_memory().unwrap();
        let mut site = test_site("fra1");
        store.put_site(&site).await.unwrap();

        site.listen_port = 51821;
        store.put_site(&site).await.unwrap();

        let fetched = store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(fetched.listen_port, 51821);
        assert_eq!(store.list_sites().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redb_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshgate.redb");
        let site = test_site("fra1");

        {
            let store = RedbStore::open(&path).unwrap();
            store.put_site(&site).await.unwrap();
        }

        {
            let store = RedbStore::open(&path).unwrap();
            let fetched = store.get_site(site.id).await.unwrap();
            assert!(fetched.is_some());
            assert_eq!(fetched.unwrap().name, "fra1");
        }
    }
}
