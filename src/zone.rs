//! Finalized, queryable zones.
//!
//! A [`Zone`] is built once per refresh cycle from a [`DomainRecordSet`] and
//! never mutated after it is published.

use hickory_proto::rr::rdata::{A, NS, PTR, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType, RrKey};
use hickory_proto::ProtoError;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::{DnsConfig, SoaConfig};
use crate::records::DomainRecordSet;

/// TTL of the per-zone `*.<origin>` fallback record.
pub const FALLBACK_TTL: u32 = 300;

/// Per-record settings shared by every zone.
#[derive(Debug, Clone)]
pub struct ZoneDefaults {
    /// TTL of every published record.
    pub ttl: u32,
    /// SOA parameters.
    pub soa: SoaConfig,
}

impl From<&DnsConfig> for ZoneDefaults {
    fn from(config: &DnsConfig) -> Self {
        Self {
            ttl: config.ttl,
            soa: config.soa.clone(),
        }
    }
}

/// An immutable set of resource records under one origin.
#[derive(Debug, Clone)]
pub struct Zone {
    origin: LowerName,
    serial: u32,
    rrsets: HashMap<RrKey, Arc<RecordSet>>,
    names: HashSet<LowerName>,
    record_count: usize,
}

impl Zone {
    /// Create a zone holding only its SOA and NS records.
    pub fn new(origin: Name, defaults: &ZoneDefaults, serial: u32) -> Result<Self, ProtoError> {
        let mut zone = Self {
            origin: LowerName::new(&origin),
            serial,
            rrsets: HashMap::new(),
            names: HashSet::new(),
            record_count: 0,
        };

        let soa = &defaults.soa;
        let mname = Name::from_ascii(&soa.mname)?;
        let rname = Name::from_ascii(&soa.rname)?;
        let record = SOA::new(
            mname.clone(),
            rname,
            serial,
            i32::try_from(soa.refresh).unwrap_or(i32::MAX),
            i32::try_from(soa.retry).unwrap_or(i32::MAX),
            i32::try_from(soa.expire).unwrap_or(i32::MAX),
            soa.minimum,
        );
        zone.insert(Record::from_rdata(origin.clone(), defaults.ttl, RData::SOA(record)));
        zone.insert(Record::from_rdata(origin, defaults.ttl, RData::NS(NS(mname))));
        Ok(zone)
    }

    /// Build a zone from one domain's record set.
    ///
    /// `fallback` adds a `*.<origin>` A record when present.
    pub fn from_record_set(
        origin: &str,
        records: &DomainRecordSet,
        fallback: Option<Ipv4Addr>,
        defaults: &ZoneDefaults,
        serial: u32,
    ) -> Result<Self, ProtoError> {
        let origin = Name::from_ascii(origin)?;
        let mut zone = Self::new(origin.clone(), defaults, serial)?;

        for entry in records.forward.values() {
            zone.insert(Record::from_rdata(
                entry.name.clone(),
                defaults.ttl,
                RData::A(A::from(entry.address)),
            ));
        }
        for entry in records.reverse.values() {
            zone.insert(Record::from_rdata(
                entry.reverse_name.clone(),
                defaults.ttl,
                RData::PTR(PTR(entry.target.clone())),
            ));
        }
        if let Some(address) = fallback {
            let wildcard = origin.prepend_label("*")?;
            zone.insert(Record::from_rdata(
                wildcard,
                FALLBACK_TTL,
                RData::A(A::from(address)),
            ));
        }

        Ok(zone)
    }

    /// Add a record. Records outside the origin are ignored.
    pub fn insert(&mut self, mut record: Record) {
        let name = LowerName::new(record.name());
        if !self.origin.zone_of(&name) {
            return;
        }
        record.set_dns_class(DNSClass::IN);

        let serial = self.serial;
        let rtype = record.record_type();
        let rrset = self
            .rrsets
            .entry(RrKey::new(name.clone(), rtype))
            .or_insert_with(|| Arc::new(RecordSet::new(record.name().clone(), rtype, serial)));
        if Arc::make_mut(rrset).insert(record, serial) {
            self.record_count += 1;
        }
        self.names.insert(name);
    }

    /// Zone origin.
    pub fn origin(&self) -> &LowerName {
        &self.origin
    }

    /// SOA serial of this zone.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Number of records, SOA and NS included.
    pub fn len(&self) -> usize {
        self.record_count
    }

    /// True when the zone holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Find records of `rtype` at `name`.
    ///
    /// Exact matches win. A name that owns no records at all is answered
    /// from the wildcard at its closest existing ancestor, with the
    /// answer rewritten to the queried name. A name that exists with other
    /// types yields `None`.
    pub fn lookup(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        if !self.origin.zone_of(name) {
            return None;
        }
        if let Some(rrset) = self.rrsets.get(&RrKey::new(name.clone(), rtype)) {
            return Some(rrset.clone());
        }
        if self.names.contains(name) {
            return None;
        }
        self.lookup_wildcard(name, rtype)
    }

    fn lookup_wildcard(&self, name: &LowerName, rtype: RecordType) -> Option<Arc<RecordSet>> {
        let query = Name::from(name.clone());
        let mut parent = query.base_name();
        loop {
            let ancestor = LowerName::new(&parent);
            if !self.origin.zone_of(&ancestor) {
                return None;
            }

            let wildcard = LowerName::new(&parent.prepend_label("*").ok()?);
            if let Some(rrset) = self.rrsets.get(&RrKey::new(wildcard, rtype)) {
                return Some(Arc::new(self.synthesize(query, rrset)));
            }

            // The closest existing ancestor ends the search.
            if ancestor == self.origin || self.names.contains(&ancestor) {
                return None;
            }
            parent = parent.base_name();
        }
    }

    /// Copy a wildcard record set under the queried name.
    fn synthesize(&self, name: Name, wildcard: &RecordSet) -> RecordSet {
        let mut answer = RecordSet::new(name.clone(), wildcard.record_type(), self.serial);
        for record in wildcard.records_without_rrsigs() {
            let mut synthesized = Record::from_rdata(name.clone(), record.ttl(), record.data().clone());
            synthesized.set_dns_class(DNSClass::IN);
            answer.insert(synthesized, self.serial);
        }
        answer
    }
}
