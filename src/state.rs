//! Published DNS state.
//!
//! Readers take a cheap reference to the current [`ZoneSnapshot`]; the
//! refresh cycle builds a complete replacement off to the side and swaps it
//! in under the write lock. A snapshot is never modified once published.

use hickory_proto::rr::{LowerName, RecordSet, RecordType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::records::RecordMap;
use crate::zone::Zone;

/// The complete set of zones visible to queries at one instant.
#[derive(Debug, Default)]
pub struct ZoneSnapshot {
    /// Zone origins, most specific first.
    zone_names: Vec<LowerName>,
    zones: HashMap<LowerName, Zone>,
    /// Record entries the zones were built from, carried into the next cycle.
    records: RecordMap,
    serial: u32,
    ready: bool,
}

impl ZoneSnapshot {
    /// Assemble a snapshot from finished zones and their source records.
    pub fn new(zones: Vec<Zone>, records: RecordMap, serial: u32) -> Self {
        let mut zone_names: Vec<LowerName> = zones.iter().map(|z| z.origin().clone()).collect();
        zone_names.sort_by(|a, b| b.num_labels().cmp(&a.num_labels()).then_with(|| a.cmp(b)));
        let zones = zones.into_iter().map(|z| (z.origin().clone(), z)).collect();

        Self {
            zone_names,
            zones,
            records,
            serial,
            ready: true,
        }
    }

    /// Zone origins, most specific first.
    pub fn zone_names(&self) -> &[LowerName] {
        &self.zone_names
    }

    /// The zone with exactly this origin.
    pub fn zone(&self, origin: &LowerName) -> Option<&Zone> {
        self.zones.get(origin)
    }

    /// The zone with the longest origin containing `name`.
    pub fn find_zone(&self, name: &LowerName) -> Option<&Zone> {
        self.zone_names
            .iter()
            .find(|origin| origin.zone_of(name))
            .and_then(|origin| self.zones.get(origin))
    }

    /// Records of `rtype` at `name`, if this snapshot can answer.
    pub fn lookup(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        self.find_zone(name)?.lookup(name, rtype)
    }

    /// Source record entries.
    pub fn records(&self) -> &RecordMap {
        &self.records
    }

    /// Serial of the cycle that produced this snapshot.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// False only for the empty snapshot present before the first publish.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Total records across all zones.
    pub fn record_count(&self) -> usize {
        self.zones.values().map(Zone::len).sum()
    }
}

/// Thread-safe handle to the published snapshot.
#[derive(Debug, Clone, Default)]
pub struct DnsState {
    inner: Arc<RwLock<Arc<ZoneSnapshot>>>,
}

impl DnsState {
    /// Create a state holding the empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Holding it does not block publication.
    pub fn snapshot(&self) -> Arc<ZoneSnapshot> {
        self.inner.read().clone()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, snapshot: ZoneSnapshot) {
        let snapshot = Arc::new(snapshot);
        debug!(
            serial = snapshot.serial(),
            zones = snapshot.zone_names().len(),
            records = snapshot.record_count(),
            "publishing zone snapshot"
        );
        *self.inner.write() = snapshot;
    }

    /// Lookup against the current snapshot.
    pub fn lookup(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        self.snapshot().lookup(name, rtype)
    }

    /// True once a snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.inner.read().is_ready()
    }

    /// Serial of the current snapshot.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial()
    }

    /// Number of published zones.
    pub fn zone_count(&self) -> usize {
        self.inner.read().zone_names().len()
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let snapshot = self.snapshot();
        let (forward, reverse) = snapshot
            .records()
            .values()
            .fold((0, 0), |(f, r), set| (f + set.forward.len(), r + set.reverse.len()));

        metrics::record_state_counts(snapshot.zone_names().len(), forward, reverse);
        metrics::record_ready_state(snapshot.is_ready());
        metrics::record_serial(snapshot.serial());
    }
}
