//! Hickory DNS authority answering from the published zone snapshot.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{LowerName, Name, RecordSet, RecordType};
use std::sync::Arc;
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use tracing::{debug, trace};

use crate::metrics::{self, QueryResult, Timer};
use crate::state::{DnsState, ZoneSnapshot};

/// Authority serving every zone of the current snapshot.
///
/// Registered at the root so one instance covers all zones; each query is
/// routed to the zone with the longest matching origin. Queries the snapshot
/// cannot answer are skipped when further authorities are chained after this
/// one, and fail with SERVFAIL otherwise.
pub struct OmadaAuthority {
    origin: LowerName,
    state: DnsState,
    chained: bool,
}

impl OmadaAuthority {
    /// Create an authority reading from `state`.
    pub fn new(state: DnsState) -> Self {
        Self {
            origin: LowerName::from(Name::root()),
            state,
            chained: false,
        }
    }

    /// Defer unanswerable queries to the authorities registered after this one.
    pub fn chained(mut self, chained: bool) -> Self {
        self.chained = chained;
        self
    }

    /// Whether unanswerable queries are deferred.
    pub fn is_chained(&self) -> bool {
        self.chained
    }

    /// Answer `name`/`rtype` from one snapshot, recording the query metric on a hit.
    pub fn answer_from(
        &self,
        snapshot: &ZoneSnapshot,
        name: &LowerName,
        rtype: RecordType,
    ) -> Option<Arc<RecordSet>> {
        let timer = Timer::start();
        let record_set = snapshot.lookup(name, rtype)?;
        debug!(name = %name, rtype = ?rtype, serial = snapshot.serial(), "answering from snapshot");
        metrics::record_query(&rtype.to_string(), QueryResult::Success, timer.elapsed());
        Some(record_set)
    }
}

#[async_trait]
impl Authority for OmadaAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();

        trace!(name = %name, rtype = ?rtype, "DNS lookup");

        let snapshot = self.state.snapshot();
        match self.answer_from(&snapshot, name, rtype) {
            Some(record_set) => {
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            None if self.chained => {
                trace!(name = %name, rtype = ?rtype, "not in snapshot, deferring to next authority");
                metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
                LookupControlFlow::Skip
            }
            None => {
                debug!(name = %name, rtype = ?rtype, "not in snapshot, returning SERVFAIL");
                metrics::record_query(&rtype_str, QueryResult::ServFail, timer.elapsed());
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::ServFail)))
            }
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Zones are rebuilt from the controller, never updated in place
        Err(ResponseCode::NotImp)
    }
}
