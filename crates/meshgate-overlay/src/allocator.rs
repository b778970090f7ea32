//! IP address allocation for site subnets
//!
//! Enumerates host addresses in ascending order and hands out the
//! first one that is neither the gateway nor already in use. The caller
//! supplies the used set; serialization of concurrent allocations is
//! the engine's job.

use ipnet::Ipv4Net;
use meshgate_core::error::AllocError;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Gateway address of a subnet: its first host, reserved for the server
pub fn gateway(subnet: Ipv4Net) -> Result<Ipv4Addr, AllocError> {
    subnet
        .hosts()
        .next()
        .ok_or_else(|| AllocError::EmptySubnet(subnet.to_string()))
}

/// Allocate the next free host address in the subnet
///
/// Skips the gateway, the network/broadcast addresses, and everything
/// in `used`. Exhaustion is a distinct error; an address is never
/// silently reused.
pub fn next_available(
    subnet: Ipv4Net,
    used: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr, AllocError> {
    let gateway = gateway(subnet)?;

    for ip in subnet.hosts() {
        if ip == gateway || used.contains(&ip) {
            continue;
        }
        return Ok(ip);
    }

    Err(AllocError::PoolExhausted(subnet.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_allocation_skips_gateway() {
        let subnet: Ipv4Net = "10.13.13.0/24".parse().unwrap();
        let ip = next_available(subnet, &HashSet::new()).unwrap();
        assert_eq!(ip, addr("10.13.13.2"));
    }

    #[test]
    fn test_allocation_skips_used() {
        let subnet: Ipv4Net = "10.13.13.0/24".parse().unwrap();
        let used = HashSet::from([addr("10.13.13.2"), addr("10.13.13.3")]);
        assert_eq!(next_available(subnet, &used).unwrap(), addr("10.13.13.4"));
    }

    #[test]
    fn test_released_address_is_reused() {
        let subnet: Ipv4Net = "10.13.13.0/24".parse().unwrap();
        let mut used = HashSet::from([addr("10.13.13.2")]);
        used.remove(&addr("10.13.13.2"));
        assert_eq!(next_available(subnet, &used).unwrap(), addr("10.13.13.2"));
    }

    #[test]
    fn test_pool_exhausted() {
        // /30 has two hosts; the first is the gateway
        let subnet: Ipv4Net = "10.13.13.0/30".parse().unwrap();
        let used = HashSet::from([addr("10.13.13.2")]);
        assert!(matches!(
            next_available(subnet, &used),
            Err(AllocError::PoolExhausted(_))
        ));
    }

    #[test]
    fn test_gateway_only_subnet_is_exhausted() {
        let subnet: Ipv4Net = "10.13.13.1/32".parse().unwrap();
        assert!(matches!(
            next_available(subnet, &HashSet::new()),
            Err(AllocError::PoolExhausted(_))
        ));
    }

    #[test]
    fn test_gateway_is_first_host() {
        let subnet: Ipv4Net = "192.168.40.0/24".parse().unwrap();
        assert_eq!(gateway(subnet).unwrap(), addr("192.168.40.1"));
    }
}
