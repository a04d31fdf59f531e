//! Service cache - deduplicates discovery notifications by (service name, address).

use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Classification of a notification against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The exact (name, address) pair was seen before; drop the notification
    Duplicate,
    /// The name is known under another address; recorded, but not delivered
    SeenOnNewAddress,
    /// Neither the name nor the pair is known; recorded and delivered
    New,
}

/// A recorded (name, address) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub service_name: String,
    pub address: IpAddr,
    pub first_seen: DateTime<Utc>,
}

/// Append-only record of every (name, address) pair seen by an engine.
///
/// Entries are never pruned: a service is assumed to stay reachable for the lifetime
/// of the engine, and only the first address a name was seen on is ever delivered.
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: Vec<CacheEntry>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the pair if it is new and classifies it.
    pub fn accept(&mut self, service_name: &str, address: IpAddr) -> CacheOutcome {
        let mut name_known = false;
        for entry in &self.entries {
            if entry.service_name == service_name {
                if entry.address == address {
                    return CacheOutcome::Duplicate;
                }
                name_known = true;
            }
        }

        self.entries.push(CacheEntry {
            service_name: service_name.to_string(),
            address,
            first_seen: Utc::now(),
        });

        if name_known {
            CacheOutcome::SeenOnNewAddress
        } else {
            CacheOutcome::New
        }
    }

    /// All addresses recorded for a name, in the order they were seen.
    pub fn addresses_of(&self, service_name: &str) -> Vec<IpAddr> {
        self.entries
            .iter()
            .filter(|entry| entry.service_name == service_name)
            .map(|entry| entry.address)
            .collect()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_then_duplicate() {
        let mut cache = ServiceCache::new();
        assert_eq!(cache.accept("therm", ip("10.0.0.5")), CacheOutcome::New);
        assert_eq!(cache.accept("therm", ip("10.0.0.5")), CacheOutcome::Duplicate);
        assert_eq!(cache.accept("therm", ip("10.0.0.5")), CacheOutcome::Duplicate);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_seen_on_new_address() {
        let mut cache = ServiceCache::new();
        assert_eq!(cache.accept("therm", ip("10.0.0.5")), CacheOutcome::New);
        assert_eq!(
            cache.accept("therm", ip("192.168.1.5")),
            CacheOutcome::SeenOnNewAddress
        );
        assert_eq!(
            cache.accept("therm", ip("192.168.1.5")),
            CacheOutcome::Duplicate
        );
        assert_eq!(
            cache.addresses_of("therm"),
            vec![ip("10.0.0.5"), ip("192.168.1.5")]
        );
    }

    #[test]
    fn test_names_are_independent() {
        let mut cache = ServiceCache::new();
        assert_eq!(cache.accept("therm", ip("10.0.0.5")), CacheOutcome::New);
        assert_eq!(cache.accept("light", ip("10.0.0.5")), CacheOutcome::New);
        assert!(cache.entries().iter().all(|e| e.first_seen <= Utc::now()));
    }
}
