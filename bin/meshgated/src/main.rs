//! Meshgate daemon CLI
//!
//! The entry point for the meshgate control plane. `serve` runs the
//! periodic reconciliation loops (stats at high frequency, firewall and
//! full sync at low frequency, traffic snapshots in between); the other
//! commands are one-shot administrative actions against the same
//! engine.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cli::{Cli, Commands, LogFormatArg, PeerCommands, PeerStatusArg, SiteCommands};
use meshgate_core::config::{EngineConfig, LogFormat, LogLevel, LoggingConfig};
use meshgate_core::logging::init_logging;
use meshgate_engine::{Engine, NewPeer, NewSite, UpdateSite};
use meshgate_overlay::firewall::IptablesFilter;
use meshgate_overlay::runner::WgTools;
use meshgate_overlay::stats::is_online;
use meshgate_store::{Peer, PeerStatus, RedbStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: match cli.verbose {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        },
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        },
        ..Default::default()
    };
    let _log_guard = init_logging(&logging);

    let config = EngineConfig {
        data_dir: cli.data_dir.clone(),
        wg_config_dir: cli.wg_config_dir.clone(),
        export_dir: cli.export_dir.clone(),
        filter_chain: cli.chain.clone(),
        command_timeout_secs: cli.command_timeout,
    };

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let store = RedbStore::open(config.data_dir.join("meshgate.redb"))
        .context("opening declared-state database")?;

    let timeout = config.command_timeout();
    let engine = Engine::new(
        Arc::new(store),
        Arc::new(WgTools::new(timeout)),
        Arc::new(IptablesFilter::new(timeout)),
        config,
    );

    match cli.command {
        Commands::Serve {
            stats_interval,
            reconcile_interval,
            snapshot_interval,
        } => {
            serve(
                engine,
                Duration::from_secs(stats_interval.max(1)),
                Duration::from_secs(reconcile_interval.max(1)),
                Duration::from_secs(snapshot_interval.max(1)),
            )
            .await
        }
        Commands::Sync { site } => sync(engine, site).await,
        Commands::Stats => {
            let outcome = engine.ingest_all().await?;
            println!("stats ingestion: {outcome}");
            Ok(())
        }
        Commands::Firewall => {
            for (network_id, outcome) in engine.reconcile_firewalls().await? {
                println!("network {network_id}: {outcome}");
            }
            Ok(())
        }
        Commands::Site(command) => site_command(engine, command).await,
        Commands::Peer(command) => peer_command(engine, command).await,
    }
}

/// Run the periodic reconciliation loops until interrupted
async fn serve(
    engine: Engine,
    stats_period: Duration,
    reconcile_period: Duration,
    snapshot_period: Duration,
) -> Result<()> {
    info!(
        stats_secs = stats_period.as_secs(),
        reconcile_secs = reconcile_period.as_secs(),
        snapshot_secs = snapshot_period.as_secs(),
        "starting reconciliation loops"
    );

    let mut stats_timer = tokio::time::interval(stats_period);
    let mut reconcile_timer = tokio::time::interval(reconcile_period);
    let mut snapshot_timer = tokio::time::interval(snapshot_period);
    stats_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    reconcile_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    snapshot_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }

            _ = stats_timer.tick() => {
                if let Err(e) = engine.ingest_all().await {
                    warn!(error = %e, "stats ingestion pass failed");
                }
            }

            _ = reconcile_timer.tick() => {
                if let Err(e) = engine.full_sync_all().await {
                    warn!(error = %e, "full sync pass failed");
                }
                if let Err(e) = engine.reconcile_firewalls().await {
                    warn!(error = %e, "firewall reconciliation pass failed");
                }
            }

            _ = snapshot_timer.tick() => {
                if let Err(e) = engine.snapshot_samples().await {
                    warn!(error = %e, "traffic snapshot pass failed");
                }
            }
        }
    }
}

async fn sync(engine: Engine, site: Option<String>) -> Result<()> {
    match site {
        Some(name) => {
            let site = find_site(&engine, &name).await?;
            let outcome = engine.full_sync_site(site.id).await?;
            println!("{name}: {outcome}");
        }
        None => {
            for (name, outcome) in engine.full_sync_all().await? {
                println!("{name}: {outcome}");
            }
        }
    }
    Ok(())
}

async fn site_command(engine: Engine, command: SiteCommands) -> Result<()> {
    match command {
        SiteCommands::Add {
            name,
            endpoint,
            subnet,
            port,
            interface,
            dns,
            allowed,
        } => {
            let (site, outcome) = engine
                .create_site(NewSite {
                    name,
                    endpoint,
                    listen_port: port,
                    subnet,
                    interface,
                    dns_servers: dns,
                    allowed_ranges: allowed,
                    keypair: None,
                })
                .await?;
            println!(
                "created site '{}' on {} ({}), sync {outcome}",
                site.name, site.interface, site.subnet
            );
        }
        SiteCommands::List => {
            for site in engine.store().list_sites().await? {
                let (total, active) = engine.peer_counts(site.id).await?;
                println!(
                    "{}\t{}\t{}\t{}\tpeers {active}/{total}\t{}",
                    site.name,
                    site.interface,
                    site.subnet,
                    site.endpoint,
                    if site.active { "active" } else { "inactive" },
                );
            }
        }
        SiteCommands::Update {
            name,
            endpoint,
            port,
            dns,
            allowed,
        } => {
            let site = find_site(&engine, &name).await?;
            let (_, outcome) = engine
                .update_site(
                    site.id,
                    UpdateSite {
                        endpoint,
                        listen_port: port,
                        dns_servers: dns,
                        allowed_ranges: allowed,
                    },
                )
                .await?;
            println!("{name}: {outcome}");
        }
        SiteCommands::SetActive { name, active } => {
            let site = find_site(&engine, &name).await?;
            let outcome = engine.set_site_active(site.id, active).await?;
            println!("{name}: {outcome}");
        }
        SiteCommands::Remove { name } => {
            let site = find_site(&engine, &name).await?;
            engine.delete_site(site.id).await?;
            println!("removed site '{name}'");
        }
    }
    Ok(())
}

async fn peer_command(engine: Engine, command: PeerCommands) -> Result<()> {
    match command {
        PeerCommands::Add {
            user,
            name,
            site,
            allowed,
        } => {
            let site = find_site(&engine, &site).await?;
            let (peer, outcome) = engine
                .create_peer(NewPeer {
                    user,
                    name,
                    site_id: site.id,
                    address: None,
                    allowed_ranges: allowed,
                    keypair: None,
                })
                .await?;
            let exported = engine.export_peer_config(peer.id).await?;
            println!(
                "created peer '{}' at {} (sync {outcome}), config: {}",
                peer.name,
                peer.address,
                exported.display()
            );
        }
        PeerCommands::List { site } => {
            let peers = match site {
                Some(name) => {
                    let site = find_site(&engine, &name).await?;
                    engine.store().peers_for_site(site.id).await?
                }
                None => engine.store().list_peers().await?,
            };
            let now = chrono::Utc::now();
            for peer in peers {
                println!(
                    "{}/{}\t{}\t{}\t{}\trx {} tx {}",
                    peer.user,
                    peer.name,
                    peer.address,
                    peer.status,
                    if is_online(peer.last_handshake, now) {
                        "online"
                    } else {
                        "offline"
                    },
                    peer.bytes_received,
                    peer.bytes_sent,
                );
            }
        }
        PeerCommands::SetStatus { user, name, status } => {
            let peer = find_peer(&engine, &user, &name).await?;
            let status = match status {
                PeerStatusArg::Active => PeerStatus::Active,
                PeerStatusArg::Inactive => PeerStatus::Inactive,
                PeerStatusArg::Blocked => PeerStatus::Blocked,
            };
            let outcome = engine.set_peer_status(peer.id, status).await?;
            println!("{user}/{name}: {outcome}");
        }
        PeerCommands::Export { user, name } => {
            let peer = find_peer(&engine, &user, &name).await?;
            let path = engine.export_peer_config(peer.id).await?;
            println!("{}", path.display());
        }
        PeerCommands::Remove { user, name } => {
            let peer = find_peer(&engine, &user, &name).await?;
            let outcome = engine.delete_peer(peer.id).await?;
            println!("removed peer '{user}/{name}' (daemon cleanup {outcome})");
        }
    }
    Ok(())
}

async fn find_site(engine: &Engine, name: &str) -> Result<meshgate_store::Site> {
    match engine.store().site_by_name(name).await? {
        Some(site) => Ok(site),
        None => bail!("site '{name}' not found"),
    }
}

async fn find_peer(engine: &Engine, user: &str, name: &str) -> Result<Peer> {
    let peer = engine
        .store()
        .list_peers()
        .await?
        .into_iter()
        .find(|p| p.user == user && p.name == name);
    match peer {
        Some(peer) => Ok(peer),
        None => bail!("peer '{user}/{name}' not found"),
    }
}
