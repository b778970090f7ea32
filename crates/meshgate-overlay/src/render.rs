//! Pure config rendering
//!
//! Maps declared state to the daemon's textual config format. Both
//! renderers are deterministic for a given snapshot and perform no IO;
//! malformed addresses fail rendering instead of producing a broken
//! file for the daemon to choke on.

use ipnet::Ipv4Net;
use meshgate_core::config::DEFAULT_KEEPALIVE_SECS;
use meshgate_core::error::ValidationError;
use meshgate_store::{Network, Peer, PeerStatus, Site};
use std::net::Ipv4Addr;

/// NAT setup hook rendered into every server config
const POST_UP: &str = "iptables -A FORWARD -i %i -j ACCEPT; iptables -A FORWARD -o %i -j ACCEPT; iptables -t nat -A POSTROUTING -o eth+ -j MASQUERADE";

/// NAT teardown hook rendered into every server config
const POST_DOWN: &str = "iptables -D FORWARD -i %i -j ACCEPT; iptables -D FORWARD -o %i -j ACCEPT; iptables -t nat -D POSTROUTING -o eth+ -j MASQUERADE";

/// Render the full server-side config for a site's interface
///
/// One `[Interface]` stanza followed by a `[Peer]` stanza per active
/// peer that has a public key; peers without a key are skipped, not
/// errored.
pub fn render_server_config(site: &Site, peers: &[Peer]) -> Result<String, ValidationError> {
    let gateway = site
        .gateway_ip()
        .ok_or_else(|| ValidationError::InvalidCidr(site.subnet.to_string()))?;

    let mut config = format!(
        "[Interface]\n\
         Address = {gateway}\n\
         ListenPort = {port}\n\
         PrivateKey = {key}\n\
         PostUp = {POST_UP}\n\
         PostDown = {POST_DOWN}\n",
        port = site.listen_port,
        key = site.private_key,
    );

    for peer in peers {
        if peer.status != PeerStatus::Active || peer.public_key.is_empty() {
            continue;
        }
        if !site.subnet.contains(&peer.address) {
            return Err(ValidationError::AddressNotInSubnet {
                addr: peer.address,
                subnet: site.subnet.to_string(),
            });
        }

        config.push_str(&format!(
            "\n[Peer]\nPublicKey = {}\nAllowedIPs = {}/32\n",
            peer.public_key, peer.address
        ));
    }

    Ok(config)
}

/// Render the client-side config for a single peer
pub fn render_peer_config(
    peer: &Peer,
    site: &Site,
    network: &Network,
) -> Result<String, ValidationError> {
    if !network.subnet.contains(&peer.address) {
        return Err(ValidationError::AddressNotInSubnet {
            addr: peer.address,
            subnet: network.subnet.to_string(),
        });
    }

    let dns = validated_dns(&network.dns_servers)?;
    let allowed = validated_ranges(&peer.allowed_ranges)?;

    Ok(format!(
        "[Interface]\n\
         PrivateKey = {private_key}\n\
         Address = {address}/{prefix}\n\
         DNS = {dns}\n\
         \n\
         [Peer]\n\
         PublicKey = {server_key}\n\
         Endpoint = {endpoint}:{port}\n\
         AllowedIPs = {allowed}\n\
         PersistentKeepalive = {keepalive}\n",
        private_key = peer.private_key,
        address = peer.address,
        prefix = network.subnet.prefix_len(),
        server_key = network.server_public_key,
        endpoint = site.endpoint,
        port = network.listen_port,
        keepalive = DEFAULT_KEEPALIVE_SECS,
    ))
}

fn validated_dns(servers: &[String]) -> Result<String, ValidationError> {
    for server in servers {
        server
            .parse::<Ipv4Addr>()
            .map_err(|_| ValidationError::InvalidAddress(server.clone()))?;
    }
    Ok(servers.join(", "))
}

fn validated_ranges(ranges: &[String]) -> Result<String, ValidationError> {
    for range in ranges {
        let ok = range.parse::<Ipv4Net>().is_ok() || range.parse::<Ipv4Addr>().is_ok();
        if !ok {
            return Err(ValidationError::InvalidCidr(range.clone()));
        }
    }
    Ok(ranges.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_site() -> Site {
        let now = Utc::now();
        Site {
            id: Uuid::new_v4(),
            name: "fra1".to_string(),
            endpoint: "vpn.example.com".to_string(),
            listen_port: 51820,
            subnet: "10.13.13.0/24".parse().unwrap(),
            interface: "wg0".to_string(),
            private_key: "SERVER_PRIVATE".to_string(),
            public_key: "SERVER_PUBLIC".to_string(),
            dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
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
            private_key: format!("PRIV_{name}"),
            public_key: format!("PUB_{name}"),
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

    #[test]
    fn test_server_config_layout() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        let peers = vec![
            test_peer(&site, &network, "laptop", 2),
            test_peer(&site, &network, "phone", 3),
        ];

        let config = render_server_config(&site, &peers).unwrap();

        assert!(config.starts_with("[Interface]\n"));
        assert!(config.contains("Address = 10.13.13.1\n"));
        assert!(config.contains("ListenPort = 51820\n"));
        assert!(config.contains("PrivateKey = SERVER_PRIVATE\n"));
        assert!(config.contains("PostUp = iptables"));
        assert!(config.contains("PublicKey = PUB_laptop\nAllowedIPs = 10.13.13.2/32"));
        assert!(config.contains("PublicKey = PUB_phone\nAllowedIPs = 10.13.13.3/32"));
        assert_eq!(config.matches("[Peer]").count(), 2);
    }

    #[test]
    fn test_server_config_is_deterministic() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        let peers = vec![test_peer(&site, &network, "laptop", 2)];

        let first = render_server_config(&site, &peers).unwrap();
        let second = render_server_config(&site, &peers).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_server_config_skips_inactive_and_keyless_peers() {
        let site = test_site();
        let network = Network::default_for_site(&site);

        let mut blocked = test_peer(&site, &network, "blocked", 2);
        blocked.status = PeerStatus::Blocked;
        let mut keyless = test_peer(&site, &network, "keyless", 3);
        keyless.public_key = String::new();

        let config = render_server_config(&site, &[blocked, keyless]).unwrap();
        assert_eq!(config.matches("[Peer]").count(), 0);
    }

    #[test]
    fn test_server_config_rejects_foreign_address() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        let mut peer = test_peer(&site, &network, "laptop", 2);
        peer.address = "192.168.99.7".parse().unwrap();

        assert!(matches!(
            render_server_config(&site, &[peer]),
            Err(ValidationError::AddressNotInSubnet { .. })
        ));
    }

    #[test]
    fn test_peer_config_layout() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        let peer = test_peer(&site, &network, "laptop", 5);

        let config = render_peer_config(&peer, &site, &network).unwrap();

        assert!(config.contains("PrivateKey = PRIV_laptop\n"));
        assert!(config.contains("Address = 10.13.13.5/24\n"));
        assert!(config.contains("DNS = 1.1.1.1, 8.8.8.8\n"));
        assert!(config.contains("PublicKey = SERVER_PUBLIC\n"));
        assert!(config.contains("Endpoint = vpn.example.com:51820\n"));
        assert!(config.contains("AllowedIPs = 0.0.0.0/0\n"));
        assert!(config.contains("PersistentKeepalive = 25\n"));
    }

    #[test]
    fn test_allocated_address_round_trips_into_config() {
        let site = test_site();
        let network = Network::default_for_site(&site);

        let address =
            crate::allocator::next_available(network.subnet, &std::collections::HashSet::new())
                .unwrap();
        let mut peer = test_peer(&site, &network, "laptop", 2);
        peer.address = address;

        let config = render_peer_config(&peer, &site, &network).unwrap();
        assert!(config.contains(&format!("Address = {address}/24\n")));
    }

    #[test]
    fn test_peer_config_rejects_bad_dns() {
        let site = test_site();
        let mut network = Network::default_for_site(&site);
        network.dns_servers = vec!["not-an-address".to_string()];
        let peer = test_peer(&site, &network, "laptop", 5);

        assert!(matches!(
            render_peer_config(&peer, &site, &network),
            Err(ValidationError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_peer_config_rejects_bad_range() {
        let site = test_site();
        let network = Network::default_for_site(&site);
        let mut peer = test_peer(&site, &network, "laptop", 5);
        peer.allowed_ranges = vec!["10.0.0.0/33".to_string()];

        assert!(matches!(
            render_peer_config(&peer, &site, &network),
            Err(ValidationError::InvalidCidr(_))
        ));
    }
}
