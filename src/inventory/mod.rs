//! Controller inventory: the entities DNS records are derived from.
//!
//! The [`Inventory`] trait is the narrow surface the refresh cycle needs from
//! the controller. [`omada::OmadaClient`] implements it over the Omada HTTP
//! API; tests use in-memory fakes.

pub mod omada;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::InventoryError;

/// Read access to a controller's inventory.
///
/// Every call may fail with a transport or authentication error; callers
/// abandon the current refresh cycle when that happens.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Authenticate and obtain a fresh session.
    async fn login(&self) -> Result<(), InventoryError>;

    /// Scope subsequent list calls to the named site.
    async fn select_site(&self, site: &str) -> Result<(), InventoryError>;

    /// Networks configured on the selected site.
    async fn list_networks(&self) -> Result<Vec<NetworkInterface>, InventoryError>;

    /// Clients currently known to the selected site.
    async fn list_clients(&self) -> Result<Vec<ClientEntry>, InventoryError>;

    /// Managed devices (gateways, switches, access points) of the selected site.
    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, InventoryError>;

    /// Static DHCP reservations of the selected site.
    async fn list_reservations(&self) -> Result<Vec<ReservationEntry>, InventoryError>;
}

/// A LAN network as reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// DNS search domain handed out by DHCP; empty when unset.
    #[serde(default)]
    pub domain: String,
    /// Gateway address with prefix length, e.g. `10.0.0.1/24`.
    #[serde(default, rename = "gatewaySubnet")]
    pub subnet: String,
    /// Network purpose, e.g. `interface` or `vlan`.
    #[serde(default)]
    pub purpose: String,
}

impl NetworkInterface {
    /// Whether this network is a routed client-facing interface.
    pub fn is_interface(&self) -> bool {
        self.purpose.contains("interface")
    }
}

/// A connected client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    /// Configured name; the controller reports the MAC when none is set.
    #[serde(default)]
    pub name: String,
    /// Hostname reported by the client, `--` when unknown.
    #[serde(default)]
    pub host_name: String,
    /// MAC address.
    #[serde(default)]
    pub mac: String,
    /// Current IP address.
    #[serde(default)]
    pub ip: String,
}

/// A controller-managed device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    /// Name the device is published under.
    #[serde(default, rename = "name")]
    pub dns_name: String,
    /// MAC address.
    #[serde(default)]
    pub mac: String,
    /// Management IP address.
    #[serde(default)]
    pub ip: String,
}

/// A static DHCP reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEntry {
    /// Client name; the controller reports the MAC when none is set.
    #[serde(default)]
    pub client_name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// MAC address.
    #[serde(default)]
    pub mac: String,
    /// Reserved IP address.
    #[serde(default)]
    pub ip: String,
    /// Whether the reservation is active.
    #[serde(default, rename = "status")]
    pub enabled: bool,
}

/// An IPv4 CIDR block.
///
/// Parsing accepts host bits (`10.0.0.1/24`) and masks them off, which is how
/// the controller reports gateway subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    fn mask(prefix_len: u8) -> u32 {
        match prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    /// Network address with host bits cleared.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` lies inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = Self::mask(self.prefix_len);
        u32::from(addr) & mask == u32::from(self.network)
    }
}

/// Error returned for a malformed CIDR string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetParseError(String);

impl fmt::Display for SubnetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid CIDR address: {}", self.0)
    }
}

impl std::error::Error for SubnetParseError {}

impl FromStr for Ipv4Subnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SubnetParseError(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(err)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| err())?;
        let prefix_len: u8 = prefix.parse().map_err(|_| err())?;
        if prefix_len > 32 {
            return Err(err());
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}
