//! Shared test infrastructure for zone sync integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use omada_dns::config::SoaConfig;
use omada_dns::error::InventoryError;
use omada_dns::fallback::FallbackTarget;
use omada_dns::handler::QueryHandler;
use omada_dns::inventory::{
    ClientEntry, DeviceEntry, Inventory, NetworkInterface, ReservationEntry,
};
use omada_dns::records::InventorySnapshot;
use omada_dns::zone::ZoneDefaults;
use omada_dns::{DnsState, SyncSettings, ZoneSync};

// --- Constants ---

pub const SITE: &str = "Default";
pub const STALE_AFTER: Duration = Duration::from_secs(300);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, which are parsed back with
/// `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Fake controller ---

/// In-memory controller with swappable inventory and failure injection.
#[derive(Default)]
pub struct FakeInventory {
    data: parking_lot::Mutex<InventorySnapshot>,
    fail: AtomicBool,
    pub logins: AtomicUsize,
}

impl FakeInventory {
    pub fn new(data: InventorySnapshot) -> Arc<Self> {
        Arc::new(Self {
            data: parking_lot::Mutex::new(data),
            ..Default::default()
        })
    }

    /// Replace what the controller reports from now on.
    pub fn set(&self, data: InventorySnapshot) {
        *self.data.lock() = data;
    }

    /// Make every call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), InventoryError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(InventoryError::Api {
                code: -1200,
                message: "controller unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn login(&self) -> Result<(), InventoryError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn select_site(&self, site: &str) -> Result<(), InventoryError> {
        self.check()?;
        if site == SITE {
            Ok(())
        } else {
            Err(InventoryError::SiteNotFound(site.to_string()))
        }
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInterface>, InventoryError> {
        self.check()?;
        Ok(self.data.lock().networks.clone())
    }

    async fn list_clients(&self) -> Result<Vec<ClientEntry>, InventoryError> {
        self.check()?;
        Ok(self.data.lock().clients.clone())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, InventoryError> {
        self.check()?;
        Ok(self.data.lock().devices.clone())
    }

    async fn list_reservations(&self) -> Result<Vec<ReservationEntry>, InventoryError> {
        self.check()?;
        Ok(self.data.lock().reservations.clone())
    }
}

// --- Fixture ---

pub fn network(name: &str, domain: &str, subnet: &str, purpose: &str) -> NetworkInterface {
    NetworkInterface {
        name: name.to_string(),
        domain: domain.to_string(),
        subnet: subnet.to_string(),
        purpose: purpose.to_string(),
    }
}

pub fn client(name: &str, host_name: &str, mac: &str, ip: &str) -> ClientEntry {
    ClientEntry {
        name: name.to_string(),
        host_name: host_name.to_string(),
        mac: mac.to_string(),
        ip: ip.to_string(),
    }
}

pub fn device(name: &str, mac: &str, ip: &str) -> DeviceEntry {
    DeviceEntry {
        dns_name: name.to_string(),
        mac: mac.to_string(),
        ip: ip.to_string(),
    }
}

pub fn reservation(name: &str, mac: &str, ip: &str, enabled: bool) -> ReservationEntry {
    ReservationEntry {
        client_name: name.to_string(),
        description: String::new(),
        mac: mac.to_string(),
        ip: ip.to_string(),
        enabled,
    }
}

/// A small home network: one LAN, one IoT VLAN and a WAN port.
///
/// `omada.home.` ends up with six names (plus SOA and NS).
pub fn home_inventory() -> InventorySnapshot {
    InventorySnapshot {
        networks: vec![
            network("LAN", "omada.home", "10.0.0.1/24", "interface"),
            network("IoT", "iot.home", "10.1.0.1/24", "interface"),
            network("WAN", "", "203.0.113.0/24", "wan"),
        ],
        clients: vec![
            client("client-001", "client-001", "AA-BB-CC-00-00-01", "10.0.0.101"),
            client("AA-BB-CC-00-00-02", "win10-vm", "AA-BB-CC-00-00-02", "10.0.0.102"),
            client("Smart Plug", "--", "AA-BB-CC-00-01-01", "10.1.0.10"),
        ],
        devices: vec![
            device("switch-01", "AA-BB-CC-00-10-01", "10.0.0.2"),
            device("ap-01", "AA-BB-CC-00-10-02", "10.0.0.3"),
        ],
        reservations: vec![
            reservation("client-01", "AA-BB-CC-00-00-01", "10.0.0.101", true),
            reservation("disabled-dhcp-01", "AA-BB-CC-00-00-09", "10.0.0.90", false),
            reservation("*.kubernetes", "AA-BB-CC-00-00-15", "10.0.0.150", true),
        ],
    }
}

pub fn test_settings(fallback: &str) -> SyncSettings {
    SyncSettings {
        sites: vec![SITE.to_string()],
        resolve_clients: true,
        resolve_devices: true,
        resolve_reservations: true,
        stale_record_duration: STALE_AFTER,
        fallback: FallbackTarget::parse(fallback),
        refresh_interval: Duration::from_secs(60),
        login_interval: Duration::from_secs(24 * 3600),
        zone_defaults: ZoneDefaults {
            ttl: 60,
            soa: SoaConfig::default(),
        },
    }
}

/// Synchronizer over `inventory` with a fresh state.
pub fn build_sync(inventory: Arc<FakeInventory>, fallback: &str) -> ZoneSync {
    ZoneSync::new(inventory, DnsState::new(), test_settings(fallback))
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a LAN client.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "10.0.0.55:40000".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &QueryHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let response = TestResponseHandler::new();
    handler.handle_request(&request, response.clone()).await;
    response.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        })
        .collect()
}

/// Extract PTR targets from a response.
pub fn extract_ptr_targets(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::PTR(ptr) => Some(ptr.0.to_string()),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected addresses.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
