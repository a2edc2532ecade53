//! Omada DNS - An authoritative DNS server backed by a TP-Link Omada controller.
//!
//! This crate serves forward (`A`) and reverse (`PTR`) records for the clients,
//! managed devices and DHCP reservations an Omada controller knows about. Every
//! client-facing network with a DNS search domain becomes a zone; all reverse
//! records live in `in-addr.arpa.`.
//!
//! ## Features
//!
//! - Periodic zone refresh from the controller, with a separate session refresh
//! - Stale-record grace period so briefly disconnected clients keep resolving
//! - Optional per-zone fallback wildcard (`*.<zone>`)
//! - Atomic snapshot publication: queries never see a half-built zone set
//! - SERVFAIL for anything neither the zones nor a chained authority can answer
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          omada-dns                               │
//! │                                                                  │
//! │  ┌──────────────────┐   ┌──────────────────┐                     │
//! │  │ Omada controller │──▶│    ZoneSync      │ refresh + session   │
//! │  │  (HTTP API)      │   │  (two loops)     │ loops               │
//! │  └──────────────────┘   └────────┬─────────┘                     │
//! │                                  │ publish                       │
//! │                                  ▼                               │
//! │                         ┌──────────────────┐                     │
//! │                         │ DnsState         │                     │
//! │                         │ (Arc snapshot)   │                     │
//! │                         └────────┬─────────┘                     │
//! │                                  │ lookup                        │
//! │                                  ▼                               │
//! │                         ┌──────────────────┐                     │
//! │                         │ QueryHandler +   │◀── UDP/TCP :53      │
//! │                         │ OmadaAuthority   │                     │
//! │                         └──────────────────┘                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! laptop.omada.home        → A    10.0.0.20      (client "laptop" on 10.0.0.0/24)
//! 20.0.0.10.in-addr.arpa   → PTR  laptop.omada.home.
//! anything.omada.home      → A    <fallback>     (when a fallback is configured)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use omada_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = config::Config::builder()
//!         .add_source(config::File::with_name("omada-dns.toml"))
//!         .build()
//!         .unwrap()
//!         .try_deserialize()
//!         .unwrap();
//!
//!     let token = CancellationToken::new();
//!     let server = DnsServer::new(config).unwrap();
//!     server.run(token).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod fallback;
pub mod handler;
pub mod inventory;
pub mod metrics;
pub mod records;
pub mod server;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod zone;

// Re-export main types
pub use config::{Config, ControllerConfig, DnsConfig, SoaConfig, SyncConfig, TelemetryConfig};
pub use error::{DnsError, InventoryError};
pub use inventory::Inventory;
pub use server::DnsServer;
pub use state::DnsState;
pub use sync::{SyncSettings, ZoneSync};
