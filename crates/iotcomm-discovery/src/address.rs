//! Host name resolution and local interface enumeration.

use crate::error::{DiscoveryError, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

/// Resolves host names to a single address, preferring IPv4.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressResolver;

impl AddressResolver {
    /// Resolves `host` to an address. Literal IPs are returned without a lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::AddressResolution`] if the lookup fails or yields nothing.
    pub async fn resolve_host(host: &str, port: u16) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let lookup = host.trim_end_matches('.');
        let addresses: Vec<IpAddr> = tokio::net::lookup_host((lookup, port))
            .await
            .map_err(|e| DiscoveryError::AddressResolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .map(|addr| addr.ip())
            .collect();

        let ip = prefer_ipv4(&addresses).ok_or_else(|| DiscoveryError::AddressResolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })?;

        debug!(host = %host, ip = %ip, "Resolved host");
        Ok(ip)
    }
}

/// Picks the first IPv4 address, falling back to the first address of any family.
pub fn prefer_ipv4(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}

/// Orders addresses IPv4 first, keeping the relative order within each family.
pub fn ipv4_first(addresses: &[IpAddr]) -> Vec<IpAddr> {
    let mut ordered = addresses.to_vec();
    ordered.sort_by_key(|ip| !ip.is_ipv4());
    ordered
}

/// Source of the addresses bound to this host's interfaces.
pub trait InterfaceSource: Send + Sync {
    fn local_addresses(&self) -> Result<HashSet<IpAddr>>;
}

/// Reads the host's interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn local_addresses(&self) -> Result<HashSet<IpAddr>> {
        let interfaces = if_addrs::get_if_addrs()?;
        Ok(interfaces.iter().map(|iface| iface.ip()).collect())
    }
}

/// A fixed address set, for tests and hosts with a known layout.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    addresses: HashSet<IpAddr>,
}

impl StaticInterfaces {
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl InterfaceSource for StaticInterfaces {
    fn local_addresses(&self) -> Result<HashSet<IpAddr>> {
        Ok(self.addresses.clone())
    }
}

/// Snapshot of the local address set, taken once per advertise/discover cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAddresses {
    addresses: HashSet<IpAddr>,
}

impl LocalAddresses {
    pub fn enumerate(source: &dyn InterfaceSource) -> Result<Self> {
        let addresses = source.local_addresses()?;
        debug!(count = addresses.len(), "Enumerated local addresses");
        Ok(Self { addresses })
    }

    pub fn is_local(&self, ip: &IpAddr) -> bool {
        self.addresses.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addresses.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_literal_addresses_skip_lookup() {
        assert_eq!(
            AddressResolver::resolve_host("10.1.2.3", 80).await.unwrap(),
            ip("10.1.2.3")
        );
        assert_eq!(
            AddressResolver::resolve_host("fe80::1", 80).await.unwrap(),
            ip("fe80::1")
        );
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let resolved = AddressResolver::resolve_host("localhost", 80).await.unwrap();
        assert!(resolved.is_loopback());
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let err = AddressResolver::resolve_host("no-such-host.invalid", 80)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::AddressResolution { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_ipv4_preferred() {
        let addrs = [ip("fe80::1"), ip("192.168.1.2"), ip("10.0.0.1")];
        assert_eq!(prefer_ipv4(&addrs), Some(ip("192.168.1.2")));
        assert_eq!(
            ipv4_first(&addrs),
            vec![ip("192.168.1.2"), ip("10.0.0.1"), ip("fe80::1")]
        );
        assert_eq!(prefer_ipv4(&[ip("::1")]), Some(ip("::1")));
        assert_eq!(prefer_ipv4(&[]), None);
    }

    #[test]
    fn test_local_addresses() {
        let source = StaticInterfaces::new([ip("127.0.0.1"), ip("192.168.1.2")]);
        let local = LocalAddresses::enumerate(&source).unwrap();
        assert!(local.is_local(&ip("192.168.1.2")));
        assert!(!local.is_local(&ip("192.168.1.3")));
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn test_system_interfaces_include_loopback() {
        let local = LocalAddresses::enumerate(&SystemInterfaces).unwrap();
        assert!(local.iter().any(|ip| ip.is_loopback()));
    }
}
