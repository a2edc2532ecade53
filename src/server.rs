//! DNS server setup and lifecycle management.

use hickory_server::authority::AuthorityObject;
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::DnsError;
use crate::handler::QueryHandler;
use crate::inventory::omada::OmadaClient;
use crate::inventory::Inventory;
use crate::state::DnsState;
use crate::sync::{SyncSettings, ZoneSync};

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit state metrics.
async fn metrics_loop(state: DnsState, token: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.emit_metrics();
                debug!(
                    serial = state.serial(),
                    zones = state.zone_count(),
                    "emitted state metrics"
                );
            }
            _ = token.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// DNS server backed by an Omada controller.
pub struct DnsServer {
    config: Config,
    state: DnsState,
    inventory: Arc<dyn Inventory>,
    next: Vec<Arc<dyn AuthorityObject>>,
}

impl DnsServer {
    /// Create a server talking to the controller named in `config`.
    pub fn new(config: Config) -> Result<Self, DnsError> {
        let client = OmadaClient::new(&config.controller)
            .map_err(|e| DnsError::inventory("error creating controller client", e))?;
        Ok(Self::with_inventory(config, Arc::new(client)))
    }

    /// Create a server reading from an arbitrary inventory source.
    pub fn with_inventory(config: Config, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            config,
            state: DnsState::new(),
            inventory,
            next: Vec::new(),
        }
    }

    /// Authorities consulted, in order, for queries the zones cannot answer.
    pub fn with_next_authorities(mut self, next: Vec<Arc<dyn AuthorityObject>>) -> Self {
        self.next = next;
        self
    }

    /// Get a reference to the DNS state.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// Log in, publish the first snapshot and serve until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.config.dns.listen_addr,
            controller = %self.config.controller.url,
            site = %self.config.controller.site,
            "Starting omada-dns server"
        );

        let ignore_errors = self.config.sync.ignore_startup_errors;
        let sync = Arc::new(ZoneSync::new(
            self.inventory.clone(),
            self.state.clone(),
            SyncSettings::from_config(&self.config),
        ));

        if let Err(e) = sync.login().await {
            if !ignore_errors {
                return Err(e);
            }
            warn!("Ignoring startup login failure: {}", e);
        }

        if token.is_cancelled() {
            info!("Shutdown requested before initial zone update");
            return Ok(());
        }

        match sync.update_zones().await {
            Ok(()) => info!(
                zones = self.state.zone_count(),
                serial = self.state.serial(),
                "Initial zone update complete"
            ),
            Err(e) if ignore_errors => warn!("Ignoring startup zone update failure: {}", e),
            Err(e) => return Err(e),
        }

        let handler = QueryHandler::with_next_authorities(self.state.clone(), self.next);
        let mut server = ServerFuture::new(handler);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.dns.listen_addr).await?;
        info!(addr = %self.config.dns.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.dns.listen_addr).await?;
        info!(addr = %self.config.dns.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!("DNS server ready to serve queries");

        let sync_handle = tokio::spawn(sync.run(token.clone()));

        let metrics_state = self.state.clone();
        let metrics_token = token.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_state, metrics_token).await;
        });

        self.state.emit_metrics();

        // Run server until cancelled
        tokio::select! {
            _ = token.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                token.cancel();
            }
        }

        if let Err(e) = server.shutdown_gracefully().await {
            debug!("DNS server shutdown: {}", e);
        }

        let _ = metrics_handle.await;

        info!("Waiting for refresh loops to stop...");
        let _ = sync_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
