//! Error types shared across the meshgate workspace
//!
//! Three families map onto three very different handling policies:
//! [`ValidationError`] and [`AllocError`] are surfaced synchronously to
//! the caller with nothing committed, while [`CommandError`] is logged
//! and absorbed by the reconciliation passes -- the declared records
//! stay authoritative and a later pass retries convergence.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Rejected input or a violated record invariant
///
/// Nothing is persisted when one of these is returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Subnet or range is not valid CIDR notation
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),

    /// Address is not a valid IPv4 address
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// Site name already taken
    #[error("site '{0}' already exists")]
    DuplicateSiteName(String),

    /// Peer name already taken for this owner
    #[error("peer '{name}' already exists for user '{user}'")]
    DuplicatePeerName { user: String, name: String },

    /// Address already assigned within the network
    #[error("address {0} is already assigned in this network")]
    DuplicateAddress(Ipv4Addr),

    /// Public key already registered to another peer
    #[error("public key '{0}' is already registered")]
    DuplicatePublicKey(String),

    /// Key is not 32 bytes of standard base64
    #[error("malformed key material: {0}")]
    MalformedKey(String),

    /// Interface name does not match the wgN convention
    #[error("invalid interface name '{0}', expected wg<N>")]
    InvalidInterfaceName(String),

    /// Interface already claimed by another site
    #[error("interface '{0}' is already in use")]
    DuplicateInterface(String),

    /// No interface slot left to auto-assign
    #[error("no free wg<N> interface name available")]
    NoFreeInterface,

    /// Site has no network to place the peer in
    #[error("site '{0}' has no default network")]
    NoDefaultNetwork(String),

    /// Address lies outside the network's subnet
    #[error("address {addr} is not within subnet {subnet}")]
    AddressNotInSubnet { addr: Ipv4Addr, subnet: String },
}

/// Address pool allocation failures
#[derive(Debug, Error)]
pub enum AllocError {
    /// Every host address in the subnet is taken
    #[error("no available IP addresses in subnet {0}")]
    PoolExhausted(String),

    /// Subnet too small to hold a gateway at all
    #[error("subnet {0} has no usable host addresses")]
    EmptySubnet(String),
}

/// External command execution failures
///
/// Covers the `wg`/`wg-quick` process boundary and the packet-filter
/// boundary. Routine sync passes log these and report a deferred
/// outcome instead of propagating them to the interactive caller.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Process could not be spawned
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited non-zero
    #[error("'{program}' failed: {stderr}")]
    NonZero { program: String, stderr: String },

    /// Process exceeded the configured timeout
    #[error("'{program}' timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::DuplicatePeerName {
            user: "alice".to_string(),
            name: "laptop".to_string(),
        };
        assert!(err.to_string().contains("alice"));
        assert!(err.to_string().contains("laptop"));
    }

    #[test]
    fn test_alloc_error_display() {
        let err = AllocError::PoolExhausted("10.13.13.0/24".to_string());
        assert!(err.to_string().contains("10.13.13.0/24"));
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::Timeout {
            program: "wg".to_string(),
            seconds: 10,
        };
        assert_eq!(err.to_string(), "'wg' timed out after 10s");
    }
}
