//! Wildcard fallback records.
//!
//! When a fallback target is configured, every forward zone gets a
//! `*.<zone>` record so names the controller does not know still resolve.

use std::net::Ipv4Addr;
use tracing::{debug, warn};

use crate::records::{RecordMap, REVERSE_ZONE};

/// Where unmatched names in a zone should point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackTarget {
    /// A literal address.
    Address(Ipv4Addr),
    /// A fully qualified name looked up among the forward records.
    Fqdn(String),
    /// A short hostname, qualified with the zone being processed.
    Hostname(String),
}

impl FallbackTarget {
    /// Interpret a configured fallback string. Empty means no fallback.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(address) = value.parse::<Ipv4Addr>() {
            return Some(Self::Address(address));
        }
        let lower = value.to_ascii_lowercase();
        if lower.contains('.') {
            let fqdn = if lower.ends_with('.') {
                lower
            } else {
                format!("{}.", lower)
            };
            Some(Self::Fqdn(fqdn))
        } else {
            Some(Self::Hostname(lower))
        }
    }

    /// Resolve the target for `zone` against the candidate forward records.
    ///
    /// Only forward records of the cycle being built are consulted. Returns
    /// `None` (after logging a warning) when a name target has no match.
    pub fn resolve(&self, zone: &str, records: &RecordMap) -> Option<Ipv4Addr> {
        let target = match self {
            Self::Address(address) => return Some(*address),
            Self::Fqdn(fqdn) => fqdn.clone(),
            Self::Hostname(host) => format!("{}.{}", host, zone),
        };

        debug!(zone, target = %target, "looking up fallback target");
        let found = records
            .iter()
            .filter(|(name, _)| name.as_str() != REVERSE_ZONE)
            .find_map(|(_, set)| set.forward.get(&target).map(|entry| entry.address));

        if found.is_none() {
            warn!(
                zone,
                target = %target,
                "fallback target not found in any zone, skipping fallback record"
            );
        }
        found
    }
}
