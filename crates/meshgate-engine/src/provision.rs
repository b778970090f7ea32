//! Site and peer lifecycle command handlers
//!
//! The explicit orchestration layer: each handler validates, persists,
//! and only then triggers the matching reconciliation step. Validation
//! and pool exhaustion surface to the caller with nothing committed;
//! daemon-side failures after the commit point are deferred outcomes.

use crate::error::{EngineError, Result};
use crate::{Engine, SyncOutcome};
use chrono::Utc;
use ipnet::Ipv4Net;
use meshgate_core::error::ValidationError;
use meshgate_overlay::allocator;
use meshgate_overlay::keys::{self, Keypair};
use meshgate_overlay::render::render_peer_config;
use meshgate_store::{Network, Peer, PeerStatus, Site};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters for creating a site
#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub endpoint: String,
    pub listen_port: u16,
    /// Subnet in CIDR notation; validated and normalized
    pub subnet: String,
    /// Interface name; auto-assigned to the next free `wg<N>` when absent
    pub interface: Option<String>,
    pub dns_servers: Vec<String>,
    pub allowed_ranges: Vec<String>,
    /// Keypair; generated when absent
    pub keypair: Option<Keypair>,
}

/// Partial update of a site's client-facing settings
///
/// `None` fields are left untouched. Subnet and interface are fixed at
/// creation; changing them means recreating the site.
#[derive(Debug, Clone, Default)]
pub struct UpdateSite {
    pub endpoint: Option<String>,
    pub listen_port: Option<u16>,
    pub dns_servers: Option<Vec<String>>,
    pub allowed_ranges: Option<Vec<String>>,
}

/// Parameters for creating a peer
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub user: String,
    pub name: String,
    pub site_id: Uuid,
    /// Explicit address; allocated from the default network when absent
    pub address: Option<Ipv4Addr>,
    /// Allowed ranges; the network's defaults when absent
    pub allowed_ranges: Option<Vec<String>>,
    /// Keypair; generated when absent
    pub keypair: Option<Keypair>,
}

impl Engine {
    /// Create a site with its default network, then sync its interface
    pub async fn create_site(&self, new: NewSite) -> Result<(Site, SyncOutcome)> {
        if self.store().site_by_name(&new.name).await?.is_some() {
            return Err(ValidationError::DuplicateSiteName(new.name).into());
        }

        let subnet: Ipv4Net = new
            .subnet
            .parse::<Ipv4Net>()
            .map_err(|_| ValidationError::InvalidCidr(new.subnet.clone()))?
            .trunc();

        let taken: HashSet<String> = self
            .store()
            .list_sites()
            .await?
            .into_iter()
            .map(|s| s.interface)
            .collect();

        let interface = match new.interface {
            Some(name) => {
                validate_interface_name(&name)?;
                if taken.contains(&name) {
                    return Err(ValidationError::DuplicateInterface(name).into());
                }
                name
            }
            None => next_interface(&taken)?,
        };

        let keypair = match new.keypair {
            Some(keypair) => {
                keys::validate_key(&keypair.private_key)?;
                keys::validate_key(&keypair.public_key)?;
                keypair
            }
            None => keys::generate_keypair(),
        };

        let now = Utc::now();
        let site = Site {
            id: Uuid::new_v4(),
            name: new.name,
            endpoint: new.endpoint,
            listen_port: new.listen_port,
            subnet,
            interface,
            private_key: keypair.private_key,
            public_key: keypair.public_key,
            dns_servers: new.dns_servers,
            allowed_ranges: new.allowed_ranges,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.store().put_site(&site).await?;

        let network = Network::default_for_site(&site);
        self.store().put_network(&network).await?;

        info!(site = %site.name, subnet = %site.subnet, interface = %site.interface, "created site");

        let outcome = self.full_sync_site(site.id).await?;
        Ok((site, outcome))
    }

    /// Edit a site's client-facing settings, then re-sync
    ///
    /// The change is mirrored into the site's networks so freshly
    /// rendered client configs pick it up.
    pub async fn update_site(&self, site_id: Uuid, update: UpdateSite) -> Result<(Site, SyncOutcome)> {
        let mut site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or(EngineError::not_found("site", site_id))?;

        if let Some(endpoint) = update.endpoint {
            site.endpoint = endpoint;
        }
        if let Some(listen_port) = update.listen_port {
            site.listen_port = listen_port;
        }
        if let Some(dns_servers) = update.dns_servers {
            site.dns_servers = dns_servers;
        }
        if let Some(allowed_ranges) = update.allowed_ranges {
            site.allowed_ranges = allowed_ranges;
        }
        site.touch();
        self.store().put_site(&site).await?;

        for mut network in self.store().networks_for_site(site_id).await? {
            network.listen_port = site.listen_port;
            network.dns_servers = site.dns_servers.clone();
            network.allowed_ranges = site.allowed_ranges.clone();
            network.server_public_key = site.public_key.clone();
            network.updated_at = Utc::now();
            self.store().put_network(&network).await?;
        }

        info!(site = %site.name, "updated site");

        let outcome = self.full_sync_site(site_id).await?;
        Ok((site, outcome))
    }

    /// Activate or deactivate a site
    ///
    /// Activation re-syncs the interface; deactivation tears it down.
    pub async fn set_site_active(&self, site_id: Uuid, active: bool) -> Result<SyncOutcome> {
        let mut site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or(EngineError::not_found("site", site_id))?;

        site.active = active;
        site.touch();
        self.store().put_site(&site).await?;

        if active {
            self.full_sync_site(site_id).await
        } else {
            Ok(self.teardown_site(&site).await)
        }
    }

    /// Delete a site, cascading to its networks, peers, and rules
    ///
    /// Daemon teardown failures are logged, never block record removal.
    pub async fn delete_site(&self, site_id: Uuid) -> Result<()> {
        let site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or(EngineError::not_found("site", site_id))?;

        let outcome = self.teardown_site(&site).await;
        if !outcome.is_applied() {
            warn!(site = %site.name, %outcome, "site teardown incomplete, deleting records anyway");
        }

        for peer in self.store().peers_for_site(site_id).await? {
            self.store().delete_rules_for_peer(peer.id).await?;
            self.store().delete_peer(peer.id).await?;
        }
        for network in self.store().networks_for_site(site_id).await? {
            self.store().delete_rules_for_network(network.id).await?;
            self.store().delete_network(network.id).await?;
        }
        self.store().delete_site(site_id).await?;

        info!(site = %site.name, "deleted site");
        Ok(())
    }

    /// Create a peer in a site's default network, live-patch it into the
    /// running interface, and materialize its firewall rules
    ///
    /// Allocation is serialized per network, so two concurrent creates
    /// can never be handed the same address.
    pub async fn create_peer(&self, new: NewPeer) -> Result<(Peer, SyncOutcome)> {
        let site = self
            .store()
            .get_site(new.site_id)
            .await?
            .ok_or(EngineError::not_found("site", new.site_id))?;

        let network = self
            .store()
            .networks_for_site(site.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ValidationError::NoDefaultNetwork(site.name.clone()))?;

        let duplicate_name = self
            .store()
            .list_peers()
            .await?
            .into_iter()
            .any(|p| p.user == new.user && p.name == new.name);
        if duplicate_name {
            return Err(ValidationError::DuplicatePeerName {
                user: new.user,
                name: new.name,
            }
            .into());
        }

        let keypair = match new.keypair {
            Some(keypair) => {
                keys::validate_key(&keypair.private_key)?;
                keys::validate_key(&keypair.public_key)?;
                keypair
            }
            None => keys::generate_keypair(),
        };

        if self
            .store()
            .peer_by_public_key(&keypair.public_key)
            .await?
            .is_some()
        {
            return Err(ValidationError::DuplicatePublicKey(keypair.public_key).into());
        }

        // Hold the network's allocation lock across read-used-set,
        // pick, and insert
        let lock = self.alloc_lock(network.id);
        let _guard = lock.lock().await;

        let used: HashSet<Ipv4Addr> = self
            .store()
            .peers_for_network(network.id)
            .await?
            .into_iter()
            .map(|p| p.address)
            .collect();

        let address = match new.address {
            Some(address) => {
                if !network.subnet.contains(&address) {
                    return Err(ValidationError::AddressNotInSubnet {
                        addr: address,
                        subnet: network.subnet.to_string(),
                    }
                    .into());
                }
                if used.contains(&address) {
                    return Err(ValidationError::DuplicateAddress(address).into());
                }
                address
            }
            None => allocator::next_available(network.subnet, &used)?,
        };

        let now = Utc::now();
        let peer = Peer {
            id: Uuid::new_v4(),
            user: new.user,
            site_id: site.id,
            network_id: network.id,
            name: new.name,
            address,
            private_key: keypair.private_key,
            public_key: keypair.public_key,
            allowed_ranges: new
                .allowed_ranges
                .unwrap_or_else(|| network.allowed_ranges.clone()),
            status: PeerStatus::Active,
            endpoint: None,
            bytes_sent: 0,
            bytes_received: 0,
            last_handshake: None,
            connected_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store().put_peer(&peer).await?;
        drop(_guard);

        info!(peer = %peer.name, user = %peer.user, address = %peer.address, "created peer");

        let outcome = self.live_patch_peer(&peer).await?;
        self.rebuild_peer_rules(peer.id).await?;

        Ok((peer, outcome))
    }

    /// Change a peer's lifecycle status
    ///
    /// Leaving Active removes the live daemon peer and its allow rules;
    /// entering Active patches it back in.
    pub async fn set_peer_status(&self, peer_id: Uuid, status: PeerStatus) -> Result<SyncOutcome> {
        let mut peer = self
            .store()
            .get_peer(peer_id)
            .await?
            .ok_or(EngineError::not_found("peer", peer_id))?;

        let was_active = peer.status == PeerStatus::Active;
        peer.status = status;
        peer.touch();
        self.store().put_peer(&peer).await?;

        let outcome = match (was_active, status == PeerStatus::Active) {
            (true, false) => self.remove_live_peer(&peer).await?,
            (false, true) => self.live_patch_peer(&peer).await?,
            _ => SyncOutcome::Applied,
        };

        self.rebuild_peer_rules(peer.id).await?;
        Ok(outcome)
    }

    /// Delete a peer
    ///
    /// The live daemon entry is removed first; a failure there is
    /// logged and the record is removed regardless.
    pub async fn delete_peer(&self, peer_id: Uuid) -> Result<SyncOutcome> {
        let peer = self
            .store()
            .get_peer(peer_id)
            .await?
            .ok_or(EngineError::not_found("peer", peer_id))?;

        let outcome = self.remove_live_peer(&peer).await?;

        self.store().delete_rules_for_peer(peer_id).await?;
        self.store().delete_peer(peer_id).await?;

        info!(peer = %peer.name, user = %peer.user, %outcome, "deleted peer");
        Ok(outcome)
    }

    /// Render a peer's client config and write it into the export
    /// directory with owner-only permissions
    pub async fn export_peer_config(&self, peer_id: Uuid) -> Result<PathBuf> {
        let peer = self
            .store()
            .get_peer(peer_id)
            .await?
            .ok_or(EngineError::not_found("peer", peer_id))?;
        let site = self
            .store()
            .get_site(peer.site_id)
            .await?
            .ok_or(EngineError::not_found("site", peer.site_id))?;
        let network = self
            .store()
            .get_network(peer.network_id)
            .await?
            .ok_or(EngineError::not_found("network", peer.network_id))?;

        let rendered = render_peer_config(&peer, &site, &network)?;

        tokio::fs::create_dir_all(&self.config().export_dir).await?;
        let path = self
            .config()
            .export_dir
            .join(format!("{}-{}.conf", peer.user, peer.name));
        tokio::fs::write(&path, rendered).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(path)
    }

    /// Total and active peer counts for a site
    pub async fn peer_counts(&self, site_id: Uuid) -> Result<(usize, usize)> {
        let peers = self.store().peers_for_site(site_id).await?;
        let active = peers
            .iter()
            .filter(|p| p.status == PeerStatus::Active)
            .count();
        Ok((peers.len(), active))
    }
}

fn validate_interface_name(name: &str) -> Result<(), ValidationError> {
    let valid = name
        .strip_prefix("wg")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidInterfaceName(name.to_string()))
    }
}

/// First unused `wg<N>` name
fn next_interface(taken: &HashSet<String>) -> Result<String, ValidationError> {
    for n in 0..100 {
        let name = format!("wg{n}");
        if !taken.contains(&name) {
            return Ok(name);
        }
    }
    Err(ValidationError::NoFreeInterface)
}
