//! Daemon synchronization
//!
//! Two strategies drive the daemon toward declared state: full sync
//! rewrites an interface's whole config file and signals the supervisor
//! to restart it; live patch pushes a single peer into the running
//! interface without disturbing anyone else's session.
//!
//! The config file is written to a temp path and renamed into place, so
//! a failed render or write never bricks the interface with a partial
//! file. Restart signaling is a touch-file the daemon supervisor
//! watches; touching twice is harmless.

use crate::error::{EngineError, Result};
use crate::{Engine, SyncOutcome};
use meshgate_overlay::render::render_server_config;
use meshgate_store::{Peer, Site};
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Engine {
    /// Regenerate and reapply one site's entire daemon configuration
    ///
    /// Render failures are hard errors (bad declared state); filesystem
    /// failures are deferred, the previous config file stays intact
    /// either way.
    pub async fn full_sync_site(&self, site_id: Uuid) -> Result<SyncOutcome> {
        let site = self
            .store()
            .get_site(site_id)
            .await?
            .ok_or(EngineError::not_found("site", site_id))?;

        if !site.active {
            debug!(site = %site.name, "skipping full sync of inactive site");
            return Ok(SyncOutcome::deferred("site is inactive"));
        }

        let peers = self.store().peers_for_site(site_id).await?;
        let rendered = render_server_config(&site, &peers)?;

        let lock = self.iface_lock(&site.interface);
        let _guard = lock.write().await;

        if let Err(e) = self.write_config_and_signal(&site.interface, &rendered).await {
            warn!(
                site = %site.name,
                interface = %site.interface,
                error = %e,
                "full sync failed, previous config left intact"
            );
            return Ok(SyncOutcome::deferred(e.to_string()));
        }

        info!(
            site = %site.name,
            interface = %site.interface,
            peer_count = peers.len(),
            "full sync applied"
        );
        Ok(SyncOutcome::Applied)
    }

    /// Full-sync every active site
    pub async fn full_sync_all(&self) -> Result<Vec<(String, SyncOutcome)>> {
        let mut outcomes = Vec::new();
        for site in self.store().list_sites().await? {
            if !site.active {
                continue;
            }
            let outcome = self.full_sync_site(site.id).await?;
            outcomes.push((site.name, outcome));
        }
        Ok(outcomes)
    }

    /// Add or update one peer on its site's running interface
    ///
    /// A failure is logged with enough context to diagnose and reported
    /// as deferred; the peer record is already committed and the next
    /// full sync converges it.
    pub async fn live_patch_peer(&self, peer: &Peer) -> Result<SyncOutcome> {
        let site = self
            .store()
            .get_site(peer.site_id)
            .await?
            .ok_or(EngineError::not_found("site", peer.site_id))?;

        if !site.active {
            return Ok(SyncOutcome::deferred("site is inactive"));
        }

        let lock = self.iface_lock(&site.interface);
        let _guard = lock.read().await;

        match self
            .runner()
            .set_live_peer(&site.interface, &peer.public_key, &peer.allowed_ip())
            .await
        {
            Ok(()) => {
                debug!(
                    peer = %peer.name,
                    interface = %site.interface,
                    "live-patched peer into running interface"
                );
                Ok(SyncOutcome::Applied)
            }
            Err(e) => {
                warn!(
                    peer_id = %peer.id,
                    public_key = %peer.public_key,
                    interface = %site.interface,
                    error = %e,
                    "live patch failed, peer will reconcile on next full sync"
                );
                Ok(SyncOutcome::deferred(e.to_string()))
            }
        }
    }

    /// Remove one peer from its site's running interface
    ///
    /// Fail-open on cleanup: a failure never blocks the caller from
    /// removing the declared record.
    pub async fn remove_live_peer(&self, peer: &Peer) -> Result<SyncOutcome> {
        let Some(site) = self.store().get_site(peer.site_id).await? else {
            return Ok(SyncOutcome::deferred("owning site already gone"));
        };

        let lock = self.iface_lock(&site.interface);
        let _guard = lock.read().await;

        match self
            .runner()
            .remove_live_peer(&site.interface, &peer.public_key)
            .await
        {
            Ok(()) => Ok(SyncOutcome::Applied),
            Err(e) => {
                warn!(
                    peer_id = %peer.id,
                    public_key = %peer.public_key,
                    interface = %site.interface,
                    error = %e,
                    "failed to remove live peer"
                );
                Ok(SyncOutcome::deferred(e.to_string()))
            }
        }
    }

    /// Tear down a site's interface and drop its config file
    ///
    /// Best effort on every step; used when a site is deactivated or
    /// deleted.
    pub(crate) async fn teardown_site(&self, site: &Site) -> SyncOutcome {
        let lock = self.iface_lock(&site.interface);
        let _guard = lock.write().await;

        let mut outcome = SyncOutcome::Applied;

        if let Err(e) = self.runner().interface_down(&site.interface).await {
            warn!(interface = %site.interface, error = %e, "interface teardown failed");
            outcome = SyncOutcome::deferred(e.to_string());
        }

        let config_path = self.config().interface_config_path(&site.interface);
        if let Err(e) = tokio::fs::remove_file(&config_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %config_path.display(), error = %e, "failed to remove config file");
            }
        }

        outcome
    }

    /// Write the interface config atomically, then touch the restart
    /// signal the daemon supervisor watches
    async fn write_config_and_signal(
        &self,
        interface: &str,
        contents: &str,
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config().wg_config_dir).await?;

        let path = self.config().interface_config_path(interface);
        let tmp_path = path.with_extension("conf.tmp");

        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tokio::fs::write(self.config().restart_signal_path(interface), b"").await?;

        debug!(path = %path.display(), "wrote interface config and restart signal");
        Ok(())
    }
}
