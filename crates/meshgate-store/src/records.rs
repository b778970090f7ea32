//! Declared-state records
//!
//! Sites own networks and peers; firewall rules belong to a network and
//! usually to the peer they were derived from; traffic samples are an
//! append-only history of peer counters.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// One VPN server endpoint and its subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Record id
    pub id: Uuid,

    /// Unique site name
    pub name: String,

    /// Public endpoint address (IP or hostname) clients connect to
    pub endpoint: String,

    /// WireGuard UDP listen port
    pub listen_port: u16,

    /// Private subnet the site hands addresses out of
    pub subnet: Ipv4Net,

    /// WireGuard interface name (wg<N>)
    pub interface: String,

    /// Server private key (base64)
    pub private_key: String,

    /// Server public key (base64)
    pub public_key: String,

    /// DNS servers pushed to clients
    pub dns_servers: Vec<String>,

    /// Default allowed ranges for new peers
    pub allowed_ranges: Vec<String>,

    /// Whether the site is reconciled at all
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Gateway address: the first host of the subnet, reserved for the
    /// server and excluded from allocation
    pub fn gateway_ip(&self) -> Option<Ipv4Addr> {
        self.subnet.hosts().next()
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Address pool within a site
///
/// Normally one per site, mirroring the site's subnet; the first
/// network of a site is the default target for new peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub subnet: Ipv4Net,
    pub listen_port: u16,
    pub dns_servers: Vec<String>,
    pub allowed_ranges: Vec<String>,

    /// Server public key, duplicated from the site for rendering
    pub server_public_key: String,

    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Network {
    /// Create the default network mirroring a site
    pub fn default_for_site(site: &Site) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            site_id: site.id,
            name: format!("{} - default", site.name),
            subnet: site.subnet,
            listen_port: site.listen_port,
            dns_servers: site.dns_servers.clone(),
            allowed_ranges: site.allowed_ranges.clone(),
            server_public_key: site.public_key.clone(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Peer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// Rendered into the daemon config and allowed through the filter
    Active,
    /// Kept on record but removed from the live daemon
    Inactive,
    /// Administratively locked out
    Blocked,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Active => write!(f, "active"),
            PeerStatus::Inactive => write!(f, "inactive"),
            PeerStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// One client tunnel identity attached to a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: Uuid,

    /// Owning user identity
    pub user: String,

    pub site_id: Uuid,
    pub network_id: Uuid,

    /// Human name, unique per owning user
    pub name: String,

    /// Tunnel address, unique within the network
    pub address: Ipv4Addr,

    /// Client private key (base64)
    pub private_key: String,

    /// Client public key (base64), unique globally
    pub public_key: String,

    /// Declared ranges this peer routes through the tunnel
    pub allowed_ranges: Vec<String>,

    pub status: PeerStatus,

    /// Last endpoint the daemon observed for this peer
    pub endpoint: Option<String>,

    /// Cumulative counters as reported by the daemon
    pub bytes_sent: u64,
    pub bytes_received: u64,

    /// Last protocol handshake reported by the daemon
    pub last_handshake: Option<DateTime<Utc>>,

    /// Start of the current online session; cleared when the peer
    /// drops offline
    pub connected_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Peer {
    /// The peer's address in /32 notation, as the daemon expects it
    pub fn allowed_ip(&self) -> String {
        format!("{}/32", self.address)
    }

    /// Total traffic in both directions
    pub fn traffic_total(&self) -> u64 {
        self.bytes_sent.saturating_add(self.bytes_received)
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Packet-filter rule verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// Protocol match for a firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

impl Protocol {
    /// Name as the packet filter expects it, `None` for any
    pub fn as_filter_arg(&self) -> Option<&'static str> {
        match self {
            Protocol::Tcp => Some("tcp"),
            Protocol::Udp => Some("udp"),
            Protocol::Icmp => Some("icmp"),
            Protocol::Any => None,
        }
    }
}

/// One materialized packet-filter rule
///
/// Rules derived from a peer's allowed ranges carry that peer's id so
/// they can be replaced wholesale when the declaration changes. The
/// per-network deny-all carries no peer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: Uuid,
    pub network_id: Uuid,
    pub peer_id: Option<Uuid>,
    pub name: String,
    pub action: RuleAction,
    pub protocol: Protocol,

    /// Source address or range; empty matches anything
    pub source: String,

    /// Destination address or range; empty matches anything
    pub destination: String,

    /// Lower is evaluated first
    pub priority: u32,

    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time snapshot of a peer's counters, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSample {
    pub id: Uuid,
    pub peer_id: Uuid,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub recorded_at: DateTime<Utc>,
}

impl TrafficSample {
    /// Snapshot the current counters of a peer
    pub fn of(peer: &Peer, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_id: peer.id,
            bytes_sent: peer.bytes_sent,
            bytes_received: peer.bytes_received,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_site() -> Site {
        let now = Utc::now();
        Site {
            id: Uuid::new_v4(),
            name: "fra1".to_string(),
            endpoint: "203.0.113.10".to_string(),
            listen_port: 51820,
            subnet: "10.13.13.0/24".parse().unwrap(),
            interface: "wg0".to_string(),
            private_key: "priv".to_string(),
            public_key: "pub".to_string(),
            dns_servers: vec!["1.1.1.1".to_string()],
            allowed_ranges: vec!["0.0.0.0/0".to_string()],
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_gateway_is_first_host() {
        let site = test_site();
        assert_eq!(site.gateway_ip(), Some("10.13.13.1".parse().unwrap()));
    }

    #[test]
    fn test_default_network_mirrors_site() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        assert_eq!(network.site_id, site.id);
        assert_eq!(network.subnet, site.subnet);
        assert_eq!(network.server_public_key, site.public_key);
        assert_eq!(network.listen_port, site.listen_port);
    }

    #[test]
    fn test_peer_status_display() {
        assert_eq!(PeerStatus::Active.to_string(), "active");
        assert_eq!(PeerStatus::Blocked.to_string(), "blocked");
    }

    #[test]
    fn test_status_serde_round_trip() {
        let json = serde_json::to_string(&PeerStatus::Inactive).unwrap();
        assert_eq!(json, r#""inactive""#);
        let status: PeerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, PeerStatus::Inactive);
    }

    #[test]
    fn test_protocol_filter_arg() {
        assert_eq!(Protocol::Tcp.as_filter_arg(), Some("tcp"));
        assert_eq!(Protocol::Any.as_filter_arg(), None);
    }
}
