//! Firewall rule materialization and application
//!
//! Each active peer contributes one allow rule per declared allowed
//! range at the high-priority tier. A peer declaring the everything
//! range additionally gets deny rules for private, loopback, and
//! link-local space directly beneath its allows, so split tunnels can
//! reach the internet without reaching back into private address
//! space. Every network ends in a deny-all.
//!
//! Application is fail-closed: the chain is flushed and set to a deny
//! default before any rule is appended, so a mid-apply failure leaves
//! the chain denying everything rather than allowing it.

use crate::error::{EngineError, Result};
use crate::{Engine, SyncOutcome};
use chrono::Utc;
use meshgate_store::{FirewallRule, PeerStatus, Protocol, RuleAction};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Priority tier for per-range allow rules
pub const ALLOW_PRIORITY: u32 = 10;

/// Priority tier for the split-tunnel private-space denies
pub const PRIVATE_DENY_PRIORITY: u32 = 15;

/// Priority tier for the per-network deny-all
pub const DENY_ALL_PRIORITY: u32 = 20;

/// Ranges a full-tunnel peer must not reach through the exit
const PRIVATE_RANGES: [&str; 6] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
];

impl Engine {
    /// Replace the materialized rules derived from one peer
    ///
    /// Idempotent: the peer's previous rules are deleted before the new
    /// set is inserted, and the network's deny-all is created at most
    /// once.
    pub async fn rebuild_peer_rules(&self, peer_id: Uuid) -> Result<()> {
        let peer = self
            .store()
            .get_peer(peer_id)
            .await?
            .ok_or(EngineError::not_found("peer", peer_id))?;

        let removed = self.store().delete_rules_for_peer(peer_id).await?;

        if peer.status == PeerStatus::Active {
            let source = peer.allowed_ip();

            for range in &peer.allowed_ranges {
                self.store()
                    .put_rule(&FirewallRule {
                        id: Uuid::new_v4(),
                        network_id: peer.network_id,
                        peer_id: Some(peer.id),
                        name: format!("allow {range} for {}", peer.name),
                        action: RuleAction::Allow,
                        protocol: Protocol::Any,
                        source: source.clone(),
                        destination: range.clone(),
                        priority: ALLOW_PRIORITY,
                        enabled: true,
                        created_at: Utc::now(),
                    })
                    .await?;
            }

            if peer.allowed_ranges.iter().any(|r| r == "0.0.0.0/0") {
                for range in PRIVATE_RANGES {
                    self.store()
                        .put_rule(&FirewallRule {
                            id: Uuid::new_v4(),
                            network_id: peer.network_id,
                            peer_id: Some(peer.id),
                            name: format!("deny private {range} for {}", peer.name),
                            action: RuleAction::Deny,
                            protocol: Protocol::Any,
                            source: source.clone(),
                            destination: range.to_string(),
                            priority: PRIVATE_DENY_PRIORITY,
                            enabled: true,
                            created_at: Utc::now(),
                        })
                        .await?;
                }
            }
        }

        self.ensure_deny_all(peer.network_id).await?;

        debug!(peer = %peer.name, removed, "rebuilt firewall rules");
        Ok(())
    }

    /// Apply a network's materialized rules to the live packet filter
    ///
    /// Flush, set the deny default, then append in priority order. Any
    /// failure stops the pass and leaves the chain default-deny.
    pub async fn apply_network_firewall(&self, network_id: Uuid) -> Result<SyncOutcome> {
        let rules = self.store().rules_for_network(network_id).await?;
        let chain = self.config().filter_chain.clone();

        if let Err(e) = self.filter().flush_chain(&chain).await {
            warn!(%network_id, error = %e, "failed to flush filter chain");
            return Ok(SyncOutcome::deferred(e.to_string()));
        }
        if let Err(e) = self.filter().set_default_deny(&chain).await {
            warn!(%network_id, error = %e, "failed to set deny default");
            return Ok(SyncOutcome::deferred(e.to_string()));
        }

        let mut applied = 0;
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Err(e) = self.filter().append_rule(&chain, rule).await {
                warn!(
                    %network_id,
                    rule = %rule.name,
                    error = %e,
                    "rule append failed, chain left default-deny"
                );
                return Ok(SyncOutcome::deferred(e.to_string()));
            }
            applied += 1;
        }

        info!(%network_id, applied, "applied firewall rules");
        Ok(SyncOutcome::Applied)
    }

    /// Reconcile the firewall for every network of every active site
    pub async fn reconcile_firewalls(&self) -> Result<Vec<(Uuid, SyncOutcome)>> {
        let mut outcomes = Vec::new();
        for site in self.store().list_sites().await? {
            if !site.active {
                continue;
            }
            for network in self.store().networks_for_site(site.id).await? {
                let outcome = self.apply_network_firewall(network.id).await?;
                outcomes.push((network.id, outcome));
            }
        }
        Ok(outcomes)
    }

    /// Make sure the network's deny-all backstop exists
    async fn ensure_deny_all(&self, network_id: Uuid) -> Result<()> {
        let rules = self.store().rules_for_network(network_id).await?;
        let exists = rules
            .iter()
            .any(|r| r.peer_id.is_none() && r.priority == DENY_ALL_PRIORITY);
        if exists {
            return Ok(());
        }

        self.store()
            .put_rule(&FirewallRule {
                id: Uuid::new_v4(),
                network_id,
                peer_id: None,
                name: "deny all".to_string(),
                action: RuleAction::Deny,
                protocol: Protocol::Any,
                source: String::new(),
                destination: String::new(),
                priority: DENY_ALL_PRIORITY,
                enabled: true,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
