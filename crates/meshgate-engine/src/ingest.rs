//! Stats ingestion
//!
//! Folds the daemon's dump telemetry into peer records. Counters are
//! cumulative totals and stored verbatim; "online" is always derived
//! from the last handshake and never stored. Session start
//! (`connected_at`) is set on the offline-to-online transition and
//! cleared on the way back down.
//!
//! Only the all-sites sweep may mark peers offline by absence from the
//! dump; a single-interface pass leaves unmatched stored peers
//! untouched.

use crate::error::{EngineError, Result};
use crate::{Engine, SyncOutcome};
use chrono::{DateTime, Utc};
use meshgate_overlay::stats::{is_online, parse_dump, PeerStats};
use meshgate_store::{PeerStatus, TrafficSample};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Engine {
    /// Ingest one site's dump into its peer records
    pub async fn ingest_site(&self, site_id: Uuid) -> Result<SyncOutcome> {
        let site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or(EngineError::not_found("site", site_id))?;

        if !site.active {
            return Ok(SyncOutcome::deferred("site is inactive"));
        }

        let dump = match self.runner().query_dump(&site.interface).await {
            Ok(dump) => dump,
            Err(e) => {
                warn!(site = %site.name, interface = %site.interface, error = %e, "dump query failed");
                return Ok(SyncOutcome::deferred(e.to_string()));
            }
        };

        let stats = parse_dump(&dump);
        let updated = self.fold_stats(&stats, Utc::now()).await?;
        debug!(site = %site.name, updated, "ingested site stats");
        Ok(SyncOutcome::Applied)
    }

    /// Ingest every active site's dump, then mark peers that were
    /// absent from a successfully swept interface as disconnected
    pub async fn ingest_all(&self) -> Result<SyncOutcome> {
        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut swept_sites: Vec<Uuid> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for site in self.store().list_sites().await? {
            if !site.active {
                continue;
            }
            match self.runner().query_dump(&site.interface).await {
                Ok(dump) => {
                    let stats = parse_dump(&dump);
                    for stat in &stats {
                        seen.insert(stat.public_key.clone());
                    }
                    self.fold_stats(&stats, now).await?;
                    swept_sites.push(site.id);
                }
                Err(e) => {
                    warn!(site = %site.name, interface = %site.interface, error = %e, "dump query failed, skipping sweep for site");
                    failures.push(format!("{}: {e}", site.name));
                }
            }
        }

        // All interfaces of these sites were swept; a stored peer
        // missing from the output is gone from the daemon
        for site_id in swept_sites {
            for mut peer in self.store().peers_for_site(site_id).await? {
                if seen.contains(&peer.public_key) {
                    continue;
                }
                if peer.connected_at.is_some() || peer.endpoint.is_some() {
                    peer.connected_at = None;
                    peer.endpoint = None;
                    peer.touch();
                    self.store().put_peer(&peer).await?;
                    debug!(peer = %peer.name, "peer absent from sweep, marked disconnected");
                }
            }
        }

        if failures.is_empty() {
            Ok(SyncOutcome::Applied)
        } else {
            Ok(SyncOutcome::deferred(failures.join("; ")))
        }
    }

    /// Append a traffic sample for every active peer
    ///
    /// Runs at a lower cadence than ingestion; the samples feed history
    /// views while the raw sync only mutates the peer rows.
    pub async fn snapshot_samples(&self) -> Result<usize> {
        let now = Utc::now();
        let mut count = 0;

        for peer in self.store().list_peers().await? {
            if peer.status != PeerStatus::Active {
                continue;
            }
            self.store()
                .add_sample(&TrafficSample::of(&peer, now))
                .await?;
            count += 1;
        }

        info!(count, "snapshotted traffic samples");
        Ok(count)
    }

    /// Fold dump stats into matching peer records
    ///
    /// Unmatched public keys are orphaned daemon state and ignored.
    async fn fold_stats(&self, stats: &[PeerStats], now: DateTime<Utc>) -> Result<usize> {
        let mut updated = 0;

        for stat in stats {
            let Some(mut peer) = self.store().peer_by_public_key(&stat.public_key).await? else {
                debug!(public_key = %stat.public_key, "dump line for unknown peer, ignoring");
                continue;
            };

            let was_online = is_online(peer.last_handshake, now);

            if let Some(handshake) = stat.last_handshake {
                if !was_online && is_online(Some(handshake), now) {
                    peer.connected_at = Some(handshake);
                }
                peer.last_handshake = Some(handshake);
            }

            peer.bytes_received = stat.bytes_received;
            peer.bytes_sent = stat.bytes_sent;
            peer.endpoint = stat.endpoint.clone();

            if !is_online(peer.last_handshake, now) {
                peer.connected_at = None;
            }

            peer.touch();
            self.store().put_peer(&peer).await?;
            updated += 1;
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use crate::provision::tests::{engine_with_mocks, new_peer, new_site};
    use chrono::Utc;
    use meshgate_overlay::stats::ONLINE_WINDOW;

    fn dump_line(public_key: &str, handshake_epoch: i64, rx: u64, tx: u64) -> String {
        format!("{public_key}\t-\t1.2.3.4:51820\t10.13.13.2/32\t{handshake_epoch}\t{rx}\t{tx}\t25")
    }

    #[tokio::test]
    async fn test_ingest_updates_counters_and_session() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let recent = Utc::now().timestamp() - 5;
        runner.set_dump("wg0", &dump_line(&peer.public_key, recent, 500, 900));

        let outcome = engine.ingest_site(site.id).await.unwrap();
        assert!(outcome.is_applied());

        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        assert_eq!(updated.bytes_received, 500);
        assert_eq!(updated.bytes_sent, 900);
        assert_eq!(updated.endpoint, Some("1.2.3.4:51820".to_string()));
        // Fresh reconnect: session starts at the new handshake
        assert_eq!(
            updated.connected_at.map(|t| t.timestamp()),
            Some(recent)
        );
        assert_eq!(
            updated.last_handshake.map(|t| t.timestamp()),
            Some(recent)
        );
    }

    #[tokio::test]
    async fn test_ingest_keeps_session_start_while_online() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let first = Utc::now().timestamp() - 60;
        runner.set_dump("wg0", &dump_line(&peer.public_key, first, 100, 100));
        engine.ingest_site(site.id).await.unwrap();

        let second = Utc::now().timestamp() - 5;
        runner.set_dump("wg0", &dump_line(&peer.public_key, second, 200, 200));
        engine.ingest_site(site.id).await.unwrap();

        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        // Session start pinned to the first handshake of the session
        assert_eq!(updated.connected_at.map(|t| t.timestamp()), Some(first));
        assert_eq!(updated.last_handshake.map(|t| t.timestamp()), Some(second));
    }

    #[tokio::test]
    async fn test_stale_handshake_clears_session() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let stale = Utc::now().timestamp() - ONLINE_WINDOW.as_secs() as i64 - 30;
        runner.set_dump("wg0", &dump_line(&peer.public_key, stale, 100, 100));
        engine.ingest_site(site.id).await.unwrap();

        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        assert!(updated.connected_at.is_none());
        // The handshake itself is still recorded
        assert_eq!(updated.last_handshake.map(|t| t.timestamp()), Some(stale));
    }

    #[tokio::test]
    async fn test_unknown_public_key_is_ignored() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();

        runner.set_dump("wg0", &dump_line("ORPHANKEY", Utc::now().timestamp(), 1, 1));
        let outcome = engine.ingest_site(site.id).await.unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn test_single_site_ingest_never_marks_absent_peers_offline() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let recent = Utc::now().timestamp() - 5;
        runner.set_dump("wg0", &dump_line(&peer.public_key, recent, 1, 1));
        engine.ingest_site(site.id).await.unwrap();

        // Peer vanishes from the dump output
        runner.set_dump("wg0", "");
        engine.ingest_site(site.id).await.unwrap();

        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        assert!(updated.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_full_sweep_marks_absent_peers_offline() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let recent = Utc::now().timestamp() - 5;
        runner.set_dump("wg0", &dump_line(&peer.public_key, recent, 1, 1));
        engine.ingest_all().await.unwrap();
        assert!(engine
            .store()
            .get_peer(peer.id)
            .await
            .unwrap()
            .unwrap()
            .connected_at
            .is_some());

        runner.set_dump("wg0", "");
        let outcome = engine.ingest_all().await.unwrap();
        assert!(outcome.is_applied());

        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        assert!(updated.connected_at.is_none());
        assert!(updated.endpoint.is_none());
    }

    #[tokio::test]
    async fn test_failed_dump_defers_and_skips_sweep() {
        let (engine, runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (peer, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();

        let recent = Utc::now().timestamp() - 5;
        runner.set_dump("wg0", &dump_line(&peer.public_key, recent, 1, 1));
        engine.ingest_all().await.unwrap();

        runner.fail_all(true);
        let outcome = engine.ingest_all().await.unwrap();
        assert!(!outcome.is_applied());

        // No sweep happened, the session survives the failed query
        let updated = engine.store().get_peer(peer.id).await.unwrap().unwrap();
        assert!(updated.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_samples_active_peers_only() {
        let (engine, _runner, _filter, _dir) = engine_with_mocks();
        let (site, _) = engine.create_site(new_site("fra1")).await.unwrap();
        let (active, _) = engine
            .create_peer(new_peer(site.id, "alice", "laptop"))
            .await
            .unwrap();
        let (blocked, _) = engine
            .create_peer(new_peer(site.id, "alice", "phone"))
            .await
            .unwrap();
        engine
            .set_peer_status(blocked.id, meshgate_store::PeerStatus::Blocked)
            .await
            .unwrap();

        let count = engine.snapshot_samples().await.unwrap();
        assert_eq!(count, 1);

        assert_eq!(
            engine
                .store()
                .samples_for_peer(active.id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(engine
            .store()
            .samples_for_peer(blocked.id)
            .await
            .unwrap()
            .is_empty());
    }
}
