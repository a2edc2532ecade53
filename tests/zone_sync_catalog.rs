//! End-to-end tests: fake controller -> refresh cycle -> query handler.

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, AuthorityObject, LookupControlFlow, LookupError, LookupOptions, LookupRecords,
    MessageRequest, UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;

use common::*;
use omada_dns::handler::QueryHandler;
use omada_dns::records::InventorySnapshot;
use omada_dns::state::ZoneSnapshot;
use omada_dns::zone::FALLBACK_TTL;
use omada_dns::DnsState;

async fn synced(fallback: &str) -> (Arc<FakeInventory>, QueryHandler, DnsState) {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), fallback);
    sync.update_zones().await.expect("initial refresh failed");
    let state = sync.state().clone();
    (inventory, QueryHandler::new(state.clone()), state)
}

fn zone_len(state: &DnsState, origin: &str) -> usize {
    let origin = LowerName::new(&Name::from_ascii(origin).unwrap());
    state.snapshot().zone(&origin).map(|z| z.len()).unwrap_or(0)
}

#[tokio::test]
async fn zones_published_per_network() {
    let (_, _, state) = synced("").await;

    let names: Vec<String> = state
        .snapshot()
        .zone_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"omada.home.".to_string()));
    assert!(names.contains(&"iot.home.".to_string()));
    assert!(names.contains(&"in-addr.arpa.".to_string()));

    // Six names plus SOA and NS.
    assert_eq!(zone_len(&state, "omada.home."), 8);
}

#[tokio::test]
async fn client_forward_lookup() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "client-001.omada.home.", RecordType::A, 1).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);
    assert_eq!(msg.answers()[0].ttl(), 60);
}

#[tokio::test]
async fn lookup_ignores_case() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "CLIENT-001.Omada.Home.", RecordType::A, 2).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);
}

#[tokio::test]
async fn reservation_and_device_forward_lookup() {
    let (_, handler, _) = synced("").await;

    let msg = execute_query(&handler, "client-01.omada.home.", RecordType::A, 3).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);

    let msg = execute_query(&handler, "switch-01.omada.home.", RecordType::A, 4).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 2)]);
}

#[tokio::test]
async fn sanitized_client_name_in_second_zone() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "smart-plug.iot.home.", RecordType::A, 5).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 1, 0, 10)]);
}

#[tokio::test]
async fn disabled_reservation_is_servfail() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "disabled-dhcp-01.omada.home.", RecordType::A, 6).await;
    assert_response_code(&msg, ResponseCode::ServFail);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn unknown_client_is_servfail() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "client-002.omada.home.", RecordType::A, 7).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn name_outside_every_zone_is_servfail() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "example.com.", RecordType::A, 8).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn ptr_uses_hostname_when_name_is_mac() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "102.0.0.10.in-addr.arpa.", RecordType::PTR, 9).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_ptr_targets(&msg), vec!["win10-vm.omada.home."]);
}

#[tokio::test]
async fn ptr_prefers_reservation_over_client() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "101.0.0.10.in-addr.arpa.", RecordType::PTR, 10).await;
    assert_eq!(extract_ptr_targets(&msg), vec!["client-01.omada.home."]);
}

#[tokio::test]
async fn wildcard_reservation_answers_subdomain() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "test.kubernetes.omada.home.", RecordType::A, 11).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 150)]);
    assert_eq!(msg.answers()[0].name().to_string(), "test.kubernetes.omada.home.");
}

#[tokio::test]
async fn soa_at_zone_apex() {
    let (_, handler, _) = synced("").await;
    let msg = execute_query(&handler, "omada.home.", RecordType::SOA, 12).await;
    assert_response_code(&msg, ResponseCode::NoError);
    let serial = msg.answers().iter().find_map(|r| match r.data() {
        RData::SOA(soa) => Some(soa.serial()),
        _ => None,
    });
    assert_eq!(serial, Some(1));
}

#[tokio::test]
async fn not_ready_is_servfail() {
    let handler = QueryHandler::new(DnsState::new());
    let msg = execute_query(&handler, "client-001.omada.home.", RecordType::A, 13).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

// --- Fallback ---

#[tokio::test]
async fn fallback_address_answers_unknown_names() {
    let (_, handler, state) = synced("10.0.0.200").await;
    assert_eq!(zone_len(&state, "omada.home."), 9);

    let msg = execute_query(&handler, "client-001.omada.home.", RecordType::A, 20).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);

    let msg = execute_query(&handler, "nonexistent.omada.home.", RecordType::A, 21).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 200)]);
    assert_eq!(msg.answers()[0].name().to_string(), "nonexistent.omada.home.");
    assert_eq!(msg.answers()[0].ttl(), FALLBACK_TTL);

    let msg = execute_query(&handler, "app.iot.home.", RecordType::A, 22).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 200)]);

    // A deeper wildcard still wins.
    let msg = execute_query(&handler, "test.kubernetes.omada.home.", RecordType::A, 23).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 150)]);
}

#[tokio::test]
async fn fallback_never_applies_to_reverse_zone() {
    let (_, handler, _) = synced("10.0.0.200").await;
    let msg = execute_query(&handler, "99.0.0.10.in-addr.arpa.", RecordType::PTR, 24).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn hostname_fallback_resolves_within_each_zone() {
    let (_, handler, state) = synced("client-001").await;
    assert_eq!(zone_len(&state, "omada.home."), 9);

    let msg = execute_query(&handler, "nonexistent.omada.home.", RecordType::A, 30).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);

    // client-001.iot.home does not exist, so iot.home gets no wildcard.
    let msg = execute_query(&handler, "nonexistent.iot.home.", RecordType::A, 31).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn fqdn_fallback_resolves_across_zones() {
    let (_, handler, _) = synced("client-001.omada.home").await;

    let msg = execute_query(&handler, "nonexistent.iot.home.", RecordType::A, 32).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);
}

#[tokio::test]
async fn unresolvable_fallback_adds_nothing() {
    let (_, handler, state) = synced("no-such-host").await;
    assert_eq!(zone_len(&state, "omada.home."), 8);

    let msg = execute_query(&handler, "nonexistent.omada.home.", RecordType::A, 33).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

// --- Refresh behaviour ---

#[tokio::test]
async fn failed_refresh_keeps_published_answers() {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), "");
    sync.update_zones().await.unwrap();
    let handler = QueryHandler::new(sync.state().clone());

    inventory.set_failing(true);
    assert!(sync.update_zones().await.is_err());
    assert_eq!(sync.state().serial(), 1);

    let msg = execute_query(&handler, "client-001.omada.home.", RecordType::A, 40).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);
}

#[tokio::test]
async fn vanished_client_resolves_until_stale() {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), "");
    let handler = QueryHandler::new(sync.state().clone());
    let start = Instant::now();
    sync.update_zones_at(start).await.unwrap();

    let mut without_switch = home_inventory();
    without_switch.devices.retain(|d| d.dns_name != "switch-01");
    inventory.set(without_switch);

    sync.update_zones_at(start + Duration::from_secs(240)).await.unwrap();
    let msg = execute_query(&handler, "switch-01.omada.home.", RecordType::A, 41).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 2)]);

    sync.update_zones_at(start + STALE_AFTER + Duration::from_secs(1))
        .await
        .unwrap();
    let msg = execute_query(&handler, "switch-01.omada.home.", RecordType::A, 42).await;
    assert_response_code(&msg, ResponseCode::ServFail);
    let msg = execute_query(&handler, "2.0.0.10.in-addr.arpa.", RecordType::PTR, 43).await;
    assert_response_code(&msg, ResponseCode::ServFail);

    // Everything still reported keeps resolving.
    let msg = execute_query(&handler, "ap-01.omada.home.", RecordType::A, 44).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 3)]);
}

#[tokio::test]
async fn moved_client_answers_new_address() {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), "");
    let handler = QueryHandler::new(sync.state().clone());
    sync.update_zones().await.unwrap();

    let mut moved = home_inventory();
    moved.devices[1].ip = "10.0.0.33".to_string();
    inventory.set(moved);
    sync.update_zones().await.unwrap();

    let msg = execute_query(&handler, "ap-01.omada.home.", RecordType::A, 45).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 33)]);
}

#[tokio::test]
async fn removed_network_zone_disappears_once_empty() {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), "");
    let start = Instant::now();
    sync.update_zones_at(start).await.unwrap();

    let mut lan_only = home_inventory();
    lan_only.networks.retain(|n| n.domain != "iot.home");
    inventory.set(lan_only);

    // Records of the old network linger until stale.
    sync.update_zones_at(start + Duration::from_secs(60)).await.unwrap();
    assert_eq!(sync.state().zone_count(), 3);

    sync.update_zones_at(start + STALE_AFTER + Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(sync.state().zone_count(), 2);
}

#[tokio::test]
async fn empty_inventory_publishes_reverse_zone_only() {
    let inventory = FakeInventory::new(InventorySnapshot::default());
    let sync = build_sync(inventory, "");
    sync.update_zones().await.unwrap();

    let snapshot = sync.state().snapshot();
    assert!(snapshot.is_ready());
    assert_eq!(snapshot.zone_names().len(), 1);
    assert_eq!(snapshot.zone_names()[0].to_string(), "in-addr.arpa.");
}

// --- Chained authorities ---

/// How a [`StaticAuthority`] responds.
#[derive(Clone, Copy)]
enum Reply {
    Address(Ipv4Addr),
    Code(ResponseCode),
    Skip,
}

/// Answers every query the same way, optionally publishing a snapshot first.
struct StaticAuthority {
    origin: LowerName,
    reply: Reply,
    publish_into: Option<(DnsState, Arc<ZoneSnapshot>)>,
}

impl StaticAuthority {
    fn root(reply: Reply) -> Arc<dyn AuthorityObject> {
        Arc::new(Self {
            origin: LowerName::from(Name::root()),
            reply,
            publish_into: None,
        })
    }
}

#[async_trait]
impl Authority for StaticAuthority {
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
        if let Some((state, snapshot)) = &self.publish_into {
            let snapshot = ZoneSnapshot::new(
                snapshot.zone_names().iter().filter_map(|o| snapshot.zone(o).cloned()).collect(),
                snapshot.records().clone(),
                snapshot.serial() + 1,
            );
            state.publish(snapshot);
        }
        match self.reply {
            Reply::Address(address) if rtype == RecordType::A => {
                let name = Name::from(name.clone());
                let mut record_set = RecordSet::new(name.clone(), RecordType::A, 0);
                record_set.insert(Record::from_rdata(name, 30, RData::A(A::from(address))), 0);
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, Arc::new(record_set))))
            }
            Reply::Address(_) => {
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
            }
            Reply::Code(code) => LookupControlFlow::Break(Err(LookupError::ResponseCode(code))),
            Reply::Skip => LookupControlFlow::Skip,
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        Authority::lookup(
            self,
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
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        Err(ResponseCode::NotImp)
    }
}

async fn chained(next: Vec<Arc<dyn AuthorityObject>>) -> (QueryHandler, DnsState) {
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory, "");
    sync.update_zones().await.unwrap();
    let state = sync.state().clone();
    (QueryHandler::with_next_authorities(state.clone(), next), state)
}

#[tokio::test]
async fn unanswerable_queries_go_to_next_authority() {
    let next = StaticAuthority::root(Reply::Address(Ipv4Addr::new(192, 0, 2, 1)));
    let (handler, _) = chained(vec![next]).await;

    // Snapshot names are still answered locally.
    let msg = execute_query(&handler, "client-001.omada.home.", RecordType::A, 50).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);

    let msg = execute_query(&handler, "example.com.", RecordType::A, 51).await;
    assert_a_response(&msg, &[Ipv4Addr::new(192, 0, 2, 1)]);

    let msg = execute_query(&handler, "client-002.omada.home.", RecordType::A, 52).await;
    assert_a_response(&msg, &[Ipv4Addr::new(192, 0, 2, 1)]);
}

#[tokio::test]
async fn next_authority_servfail_is_servfail() {
    let (handler, _) = chained(vec![StaticAuthority::root(Reply::Code(ResponseCode::ServFail))]).await;

    let msg = execute_query(&handler, "missing.omada.home.", RecordType::A, 53).await;
    assert_response_code(&msg, ResponseCode::ServFail);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn skipping_next_authority_is_servfail() {
    let (handler, _) = chained(vec![StaticAuthority::root(Reply::Skip)]).await;

    let msg = execute_query(&handler, "missing.omada.home.", RecordType::A, 54).await;
    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn chain_falls_through_to_first_answer() {
    let (handler, _) = chained(vec![
        StaticAuthority::root(Reply::Skip),
        StaticAuthority::root(Reply::Code(ResponseCode::ServFail)),
        StaticAuthority::root(Reply::Address(Ipv4Addr::new(192, 0, 2, 7))),
    ])
    .await;

    let msg = execute_query(&handler, "missing.omada.home.", RecordType::A, 55).await;
    assert_a_response(&msg, &[Ipv4Addr::new(192, 0, 2, 7)]);
}

#[tokio::test]
async fn next_authority_nxdomain_is_passed_through() {
    let (handler, _) = chained(vec![StaticAuthority::root(Reply::Code(ResponseCode::NXDomain))]).await;

    let msg = execute_query(&handler, "missing.example.", RecordType::A, 56).await;
    assert_response_code(&msg, ResponseCode::NXDomain);
}

#[tokio::test]
async fn request_reads_one_snapshot() {
    // The next authority publishes a snapshot that does hold the name, then
    // skips. The request already read the older snapshot and must not see it.
    let inventory = FakeInventory::new(home_inventory());
    let sync = build_sync(inventory.clone(), "");
    sync.update_zones().await.unwrap();
    let state = sync.state().clone();

    let mut moved = home_inventory();
    moved.clients[0].name = "late-arrival".to_string();
    inventory.set(moved);
    let staging = build_sync(inventory, "");
    staging.update_zones().await.unwrap();
    let newer = staging.state().snapshot();

    let next: Arc<dyn AuthorityObject> = Arc::new(StaticAuthority {
        origin: LowerName::from(Name::root()),
        reply: Reply::Skip,
        publish_into: Some((state.clone(), newer)),
    });
    let handler = QueryHandler::with_next_authorities(state.clone(), vec![next]);

    let msg = execute_query(&handler, "late-arrival.omada.home.", RecordType::A, 57).await;
    assert_response_code(&msg, ResponseCode::ServFail);

    // The next request reads the snapshot published in between.
    let msg = execute_query(&handler, "late-arrival.omada.home.", RecordType::A, 58).await;
    assert_a_response(&msg, &[Ipv4Addr::new(10, 0, 0, 101)]);
}
