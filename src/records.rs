//! Record derivation from controller inventory.
//!
//! Every refresh cycle turns the inventory of each client-facing network into
//! forward (`A`) and reverse (`PTR`) record entries. Entries are keyed by
//! name, so within one cycle the entry processed last wins: clients, then
//! devices, then DHCP reservations. Each entry carries the timestamp of the
//! cycle that last observed it, which drives stale-record eviction.

use hickory_proto::rr::Name;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::inventory::{ClientEntry, DeviceEntry, Ipv4Subnet, NetworkInterface, ReservationEntry};

/// The single zone holding every reverse record.
pub const REVERSE_ZONE: &str = "in-addr.arpa.";

/// Hostname the controller reports when a client did not send one.
const UNKNOWN_HOSTNAME: &str = "--";

/// A name -> address mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRecordEntry {
    /// Fully qualified record name.
    pub name: Name,
    /// Address the name resolves to.
    pub address: Ipv4Addr,
    /// Cycle that last observed this entry.
    pub created_at: Instant,
}

/// An address -> name mapping in [`REVERSE_ZONE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRecordEntry {
    /// `d.c.b.a.in-addr.arpa.` name derived from the address.
    pub reverse_name: Name,
    /// Fully qualified name the address points back to.
    pub target: Name,
    /// Cycle that last observed this entry.
    pub created_at: Instant,
}

/// Records of one domain, keyed by lower-case FQDN.
#[derive(Debug, Clone, Default)]
pub struct DomainRecordSet {
    /// Forward records by name.
    pub forward: HashMap<String, ForwardRecordEntry>,
    /// Reverse records by reverse name.
    pub reverse: HashMap<String, ReverseRecordEntry>,
}

impl DomainRecordSet {
    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.forward.len() + self.reverse.len()
    }

    /// True when the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    /// Drop every entry last observed more than `max_age` before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_stale(&mut self, max_age: Duration, now: Instant) -> usize {
        let before = self.len();
        let expired = |created_at: Instant| now.saturating_duration_since(created_at) > max_age;

        self.forward.retain(|name, entry| {
            let keep = !expired(entry.created_at);
            if !keep {
                debug!(record = %name, "purging stale record");
            }
            keep
        });
        self.reverse.retain(|name, entry| {
            let keep = !expired(entry.created_at);
            if !keep {
                debug!(record = %name, "purging stale record");
            }
            keep
        });

        before - self.len()
    }
}

/// Record sets by zone name (lower-case FQDN with trailing dot).
pub type RecordMap = BTreeMap<String, DomainRecordSet>;

/// Inventory gathered from every configured site for one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    /// Client-facing networks.
    pub networks: Vec<NetworkInterface>,
    /// Connected clients.
    pub clients: Vec<ClientEntry>,
    /// Managed devices.
    pub devices: Vec<DeviceEntry>,
    /// Static DHCP reservations.
    pub reservations: Vec<ReservationEntry>,
}

/// Replace characters that are not legal in a host label.
///
/// The result is lower case and contains only `a-z`, `0-9` and inner hyphens.
/// Whitespace, underscores and dots become hyphens; anything else is dropped.
pub fn sanitize_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let mapped = match c {
            'a'..='z' | '0'..='9' => Some(c),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            '-' | '_' | '.' => Some('-'),
            c if c.is_whitespace() => Some('-'),
            _ => None,
        };
        if let Some(c) = mapped {
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }
    }
    out.trim_matches('-').to_string()
}

/// Like [`sanitize_label`], but keeps `*` and dot-separated labels so a
/// reservation named `*.kubernetes` delegates a whole subdomain.
pub fn sanitize_label_allow_wildcard(name: &str) -> String {
    name.split('.')
        .map(|label| {
            if label.trim() == "*" {
                "*".to_string()
            } else {
                sanitize_label(label)
            }
        })
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// The `in-addr.arpa.` name for an address.
pub fn reverse_name(address: Ipv4Addr) -> String {
    let [a, b, c, d] = address.octets();
    format!("{}.{}.{}.{}.{}", d, c, b, a, REVERSE_ZONE)
}

/// Normalize a network's search domain into a zone name.
fn zone_name(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return None;
    }
    let zone = format!("{}.", domain);
    Name::from_ascii(&zone).ok().map(|_| zone)
}

/// Pick the published name for a client-like entry: the configured name,
/// unless it is just the MAC address and a better alternative exists.
fn display_name<'a>(name: &'a str, mac: &str, alternative: &'a str) -> &'a str {
    if name == mac && !alternative.is_empty() && alternative != UNKNOWN_HOSTNAME {
        alternative
    } else {
        name
    }
}

/// Builds record entries for one cycle into a candidate [`RecordMap`].
pub struct RecordSynthesizer<'a> {
    records: &'a mut RecordMap,
    timestamp: Instant,
}

impl<'a> RecordSynthesizer<'a> {
    /// Write entries into `records`, stamping them with `timestamp`.
    pub fn new(records: &'a mut RecordMap, timestamp: Instant) -> Self {
        Self { records, timestamp }
    }

    /// Add records for every eligible inventory entry.
    ///
    /// Returns the zones backed by a live network this cycle. Networks that
    /// are not client-facing, have no domain or have a malformed subnet are
    /// skipped; so are entries with unusable addresses or names.
    pub fn synthesize(&mut self, inventory: &InventorySnapshot) -> BTreeSet<String> {
        let mut live = BTreeSet::new();
        self.records.entry(REVERSE_ZONE.to_string()).or_default();

        for network in inventory.networks.iter().filter(|n| n.is_interface()) {
            debug!(network = %network.name, "processing network");

            let Some(zone) = zone_name(&network.domain) else {
                debug!(network = %network.name, "skipping network without DNS search domain");
                continue;
            };

            let subnet: Ipv4Subnet = match network.subnet.parse() {
                Ok(subnet) => subnet,
                Err(e) => {
                    debug!(network = %network.name, error = %e, "skipping network with unparseable subnet");
                    continue;
                }
            };

            self.records.entry(zone.clone()).or_default();
            live.insert(zone.clone());

            for client in &inventory.clients {
                let Some(address) = member_address(&client.ip, &subnet) else {
                    continue;
                };
                let name = display_name(&client.name, &client.mac, &client.host_name);
                self.add(&zone, &sanitize_label(name), address);
            }

            for device in &inventory.devices {
                let Some(address) = member_address(&device.ip, &subnet) else {
                    continue;
                };
                self.add(&zone, &sanitize_label(&device.dns_name), address);
            }

            for reservation in &inventory.reservations {
                if !reservation.enabled {
                    debug!(mac = %reservation.mac, "skipping disabled DHCP reservation");
                    continue;
                }
                let Some(address) = member_address(&reservation.ip, &subnet) else {
                    continue;
                };
                let name = display_name(
                    &reservation.client_name,
                    &reservation.mac,
                    &reservation.description,
                );
                self.add(&zone, &sanitize_label_allow_wildcard(name), address);
            }
        }

        live
    }

    /// Insert the forward and reverse entry for `label.zone`.
    fn add(&mut self, zone: &str, label: &str, address: Ipv4Addr) {
        if label.is_empty() {
            debug!(zone, %address, "skipping entry with empty name");
            return;
        }

        let fqdn = format!("{}.{}", label, zone);
        let ptr = reverse_name(address);
        let (name, reverse) = match (Name::from_ascii(&fqdn), Name::from_ascii(&ptr)) {
            (Ok(name), Ok(reverse)) => (name, reverse),
            (Err(e), _) | (_, Err(e)) => {
                debug!(name = %fqdn, error = %e, "skipping entry with invalid name");
                return;
            }
        };

        self.records.entry(zone.to_string()).or_default().forward.insert(
            fqdn,
            ForwardRecordEntry {
                name: name.clone(),
                address,
                created_at: self.timestamp,
            },
        );
        self.records
            .entry(REVERSE_ZONE.to_string())
            .or_default()
            .reverse
            .insert(
                ptr,
                ReverseRecordEntry {
                    reverse_name: reverse,
                    target: name,
                    created_at: self.timestamp,
                },
            );
    }
}

/// Parse `ip` and return it when it lies inside `subnet`.
fn member_address(ip: &str, subnet: &Ipv4Subnet) -> Option<Ipv4Addr> {
    let address: Ipv4Addr = ip.trim().parse().ok()?;
    subnet.contains(address).then_some(address)
}
