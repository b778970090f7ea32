//! Meshgate Overlay - daemon-facing leaf logic
//!
//! Everything that touches WireGuard concepts directly but carries no
//! orchestration: address allocation, key material, config rendering,
//! dump parsing, and the narrow process boundaries to `wg`/`wg-quick`
//! and the packet filter. All process boundaries are traits so the
//! engine can be driven against mocks.
//!
//! # Modules
//!
//! - [`allocator`] - First-free host address allocation
//! - [`firewall`] - Packet-filter boundary and rule argument mapping
//! - [`keys`] - X25519 keypair generation in WireGuard's base64 format
//! - [`render`] - Pure server/client config rendering
//! - [`runner`] - `wg`/`wg-quick` process boundary
//! - [`stats`] - `wg show dump` parsing and the online predicate

pub mod allocator;
pub mod firewall;
pub mod keys;
pub mod render;
pub mod runner;
pub mod stats;

pub use allocator::{gateway, next_available};
pub use firewall::{FilterOp, IptablesFilter, MockFilter, PacketFilter};
pub use keys::{derive_public_key, generate_keypair, validate_key, Keypair};
pub use render::{render_peer_config, render_server_config};
pub use runner::{CommandRunner, MockRunner, WgTools};
pub use stats::{is_online, parse_dump, PeerStats, ONLINE_WINDOW};
