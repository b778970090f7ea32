//! Daemon telemetry parsing and the online predicate
//!
//! Parses `wg show <iface> dump` output into per-peer counter records
//! and defines the single authoritative connectivity predicate used
//! everywhere in the workspace.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How recent the last handshake must be for a peer to count as online
///
/// The one canonical window; "online" is always derived from this, it
/// is never stored.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(180);

/// Whether a peer with the given last handshake is online at `now`
pub fn is_online(last_handshake: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_handshake {
        Some(handshake) => {
            now.signed_duration_since(handshake).num_seconds() < ONLINE_WINDOW.as_secs() as i64
        }
        None => false,
    }
}

/// One peer's counters as reported by the daemon dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStats {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Parse `wg show <iface> dump` output
///
/// Peer lines are tab-separated with a fixed field order: public-key,
/// preshared-key, endpoint, allowed-ips, last-handshake (epoch seconds,
/// `0` = never), bytes-received, bytes-sent, persistent-keepalive.
/// The leading interface line (fewer fields) is skipped, as is the
/// interface-name prefix `wg show all dump` adds to each peer line.
pub fn parse_dump(output: &str) -> Vec<PeerStats> {
    let mut peers = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        let fields: &[&str] = match parts.len() {
            8 => parts.as_slice(),
            9 => &parts[1..],
            _ => continue,
        };

        let endpoint = match fields[2] {
            "" | "(none)" => None,
            endpoint => Some(endpoint.to_string()),
        };

        let allowed_ips = fields[3]
            .split(',')
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty() && ip != "(none)")
            .collect();

        let last_handshake = fields[4]
            .parse::<i64>()
            .ok()
            .filter(|&secs| secs > 0)
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        peers.push(PeerStats {
            public_key: fields[0].to_string(),
            endpoint,
            allowed_ips,
            last_handshake,
            bytes_received: fields[5].parse().unwrap_or(0),
            bytes_sent: fields[6].parse().unwrap_or(0),
        });
    }

    peers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_online_window_boundaries() {
        let now = Utc::now();
        let window = ONLINE_WINDOW.as_secs() as i64;

        let just_inside = now - chrono::Duration::seconds(window - 1);
        assert!(is_online(Some(just_inside), now));

        let just_outside = now - chrono::Duration::seconds(window + 1);
        assert!(!is_online(Some(just_outside), now));
    }

    #[test]
    fn test_never_handshaken_is_offline() {
        assert!(!is_online(None, Utc::now()));
    }

    #[test]
    fn test_parse_single_peer_line() {
        let output = "abc123\t-\t1.2.3.4:51820\t10.13.13.5/32\t1700000000\t500\t900\t25";
        let peers = parse_dump(output);

        assert_eq!(peers.len(), 1);
        let peer = &peers[0];
        assert_eq!(peer.public_key, "abc123");
        assert_eq!(peer.endpoint, Some("1.2.3.4:51820".to_string()));
        assert_eq!(peer.allowed_ips, vec!["10.13.13.5/32".to_string()]);
        assert_eq!(
            peer.last_handshake,
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
        assert_eq!(peer.bytes_received, 500);
        assert_eq!(peer.bytes_sent, 900);
    }

    #[test]
    fn test_parse_skips_interface_header() {
        let output = "SERVER_PRIV\tSERVER_PUB\t51820\toff\n\
                      abc123\t(none)\t1.2.3.4:51820\t10.13.13.5/32\t0\t0\t0\toff";
        let peers = parse_dump(output);

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, "abc123");
        assert_eq!(peers[0].last_handshake, None);
        assert_eq!(peers[0].endpoint, Some("1.2.3.4:51820".to_string()));
    }

    #[test]
    fn test_parse_none_endpoint_and_zero_handshake() {
        let output = "abc123\t(none)\t(none)\t10.13.13.5/32\t0\t0\t0\toff";
        let peers = parse_dump(output);

        assert_eq!(peers[0].endpoint, None);
        assert_eq!(peers[0].last_handshake, None);
    }

    #[test]
    fn test_parse_all_dump_interface_prefix() {
        // `wg show all dump` prefixes every peer line with the interface
        let output = "wg0\tabc123\t-\t1.2.3.4:51820\t10.13.13.5/32\t1700000000\t500\t900\t25";
        let peers = parse_dump(output);

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, "abc123");
        assert_eq!(peers[0].bytes_received, 500);
    }

    #[test]
    fn test_parse_multiple_allowed_ips() {
        let output = "abc123\t-\t(none)\t10.13.13.5/32, 192.168.40.0/24\t0\t0\t0\toff";
        let peers = parse_dump(output);

        assert_eq!(
            peers[0].allowed_ips,
            vec!["10.13.13.5/32".to_string(), "192.168.40.0/24".to_string()]
        );
    }

    #[test]
    fn test_parse_ignores_short_and_empty_lines() {
        let output = "\ngarbage line\tonly\tthree\n";
        assert!(parse_dump(output).is_empty());
    }
}
