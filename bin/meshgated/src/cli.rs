use clap::{Parser, Subcommand, ValueEnum};
use meshgate_core::config::DEFAULT_LISTEN_PORT;
use std::path::PathBuf;

/// Meshgate control plane for WireGuard overlay networks
#[derive(Parser)]
#[command(name = "meshgated")]
#[command(version, about = "Meshgate control plane for WireGuard overlay networks")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// State directory for the declared-state database
    #[arg(long, default_value = "/var/lib/meshgate", env = "MESHGATE_DATA_DIR")]
    pub(crate) data_dir: PathBuf,

    /// Directory the daemon supervisor watches for interface configs
    #[arg(long, default_value = "/etc/wireguard", env = "MESHGATE_WG_DIR")]
    pub(crate) wg_config_dir: PathBuf,

    /// Directory client configs are exported to
    #[arg(long, default_value = "/var/lib/meshgate/exports")]
    pub(crate) export_dir: PathBuf,

    /// Packet-filter chain owned by the firewall reconciler
    #[arg(long, default_value = "FORWARD")]
    pub(crate) chain: String,

    /// Bound on external command runtime, in seconds
    #[arg(long, default_value = "10")]
    pub(crate) command_timeout: u64,

    /// Log output format
    #[arg(long, default_value = "compact", value_enum)]
    pub(crate) log_format: LogFormatArg,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Log format selection
#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

/// CLI subcommands
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the reconciliation loops
    Serve {
        /// Stats ingestion period in seconds
        #[arg(long, default_value = "1")]
        stats_interval: u64,

        /// Firewall/full-sync reconciliation period in seconds
        #[arg(long, default_value = "300")]
        reconcile_interval: u64,

        /// Traffic snapshot period in seconds
        #[arg(long, default_value = "300")]
        snapshot_interval: u64,
    },

    /// Regenerate and reapply daemon configuration
    Sync {
        /// Limit to one site by name
        #[arg(long)]
        site: Option<String>,
    },

    /// Run one stats ingestion pass across all sites
    Stats,

    /// Rebuild and apply firewall rules for all networks
    Firewall,

    /// Manage sites
    #[command(subcommand)]
    Site(SiteCommands),

    /// Manage peers
    #[command(subcommand)]
    Peer(PeerCommands),
}

/// Site management subcommands
#[derive(Subcommand)]
pub(crate) enum SiteCommands {
    /// Create a site with its default network
    Add {
        /// Unique site name
        name: String,

        /// Public endpoint clients connect to
        #[arg(long)]
        endpoint: String,

        /// Private subnet in CIDR notation
        #[arg(long)]
        subnet: String,

        /// WireGuard listen port
        #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
        port: u16,

        /// Interface name (auto-assigned when omitted)
        #[arg(long)]
        interface: Option<String>,

        /// DNS servers pushed to clients
        #[arg(long, default_value = "1.1.1.1,8.8.8.8", value_delimiter = ',')]
        dns: Vec<String>,

        /// Default allowed ranges for new peers
        #[arg(long, default_value = "0.0.0.0/0", value_delimiter = ',')]
        allowed: Vec<String>,
    },

    /// List sites with peer counts
    List,

    /// Edit a site's client-facing settings and re-sync
    Update {
        /// Site name
        name: String,

        /// New public endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// New listen port
        #[arg(long)]
        port: Option<u16>,

        /// New DNS servers
        #[arg(long, value_delimiter = ',')]
        dns: Option<Vec<String>>,

        /// New default allowed ranges
        #[arg(long, value_delimiter = ',')]
        allowed: Option<Vec<String>>,
    },

    /// Deactivate or reactivate a site
    SetActive {
        /// Site name
        name: String,

        /// New state
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },

    /// Delete a site and everything in it
    Remove {
        /// Site name
        name: String,
    },
}

/// Peer management subcommands
#[derive(Subcommand)]
pub(crate) enum PeerCommands {
    /// Create a peer in a site's default network
    Add {
        /// Owning user identity
        user: String,

        /// Peer name, unique per user
        name: String,

        /// Site to attach the peer to
        #[arg(long)]
        site: String,

        /// Allowed ranges (site default when omitted)
        #[arg(long, value_delimiter = ',')]
        allowed: Option<Vec<String>>,
    },

    /// List peers
    List {
        /// Limit to one site by name
        #[arg(long)]
        site: Option<String>,
    },

    /// Change a peer's lifecycle status
    SetStatus {
        /// Owning user identity
        user: String,

        /// Peer name
        name: String,

        /// New status
        #[arg(long, value_enum)]
        status: PeerStatusArg,
    },

    /// Export a peer's client config file
    Export {
        /// Owning user identity
        user: String,

        /// Peer name
        name: String,
    },

    /// Delete a peer
    Remove {
        /// Owning user identity
        user: String,

        /// Peer name
        name: String,
    },
}

/// Peer status selection
#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum PeerStatusArg {
    Active,
    Inactive,
    Blocked,
}
