//! Zone refresh cycle and its schedulers.
//!
//! A refresh cycle fetches the inventory of every configured site, merges
//! the derived records with those carried over from the published snapshot,
//! evicts stale entries, adds fallback wildcards and publishes the result as
//! a new snapshot. Any fetch failure abandons the cycle and leaves the
//! published snapshot untouched.
//!
//! Two independent loops drive the controller: one refreshes the zones,
//! the other renews the login session. Both stop when the shared
//! cancellation token fires.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::DnsError;
use crate::fallback::FallbackTarget;
use crate::inventory::Inventory;
use crate::metrics::{self, RefreshResult, Timer};
use crate::records::{InventorySnapshot, RecordSynthesizer, REVERSE_ZONE};
use crate::state::{DnsState, ZoneSnapshot};
use crate::zone::{Zone, ZoneDefaults};

/// Settings that drive the refresh cycle.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Sites whose inventory is merged into the zones.
    pub sites: Vec<String>,
    /// Fetch and publish clients.
    pub resolve_clients: bool,
    /// Fetch and publish devices.
    pub resolve_devices: bool,
    /// Fetch and publish DHCP reservations.
    pub resolve_reservations: bool,
    /// Age after which unobserved records are evicted.
    pub stale_record_duration: Duration,
    /// Per-zone wildcard target.
    pub fallback: Option<FallbackTarget>,
    /// Delay between zone refreshes.
    pub refresh_interval: Duration,
    /// Delay between logins.
    pub login_interval: Duration,
    /// TTL and SOA of published zones.
    pub zone_defaults: ZoneDefaults,
}

impl SyncSettings {
    /// Derive settings from a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sites: vec![config.controller.site.clone()],
            resolve_clients: config.sync.resolve_clients,
            resolve_devices: config.sync.resolve_devices,
            resolve_reservations: config.sync.resolve_dhcp_reservations,
            stale_record_duration: config.sync.stale_record_duration.as_duration(),
            fallback: FallbackTarget::parse(&config.sync.fallback),
            refresh_interval: config.sync.refresh_interval(),
            login_interval: config.sync.login_interval(),
            zone_defaults: ZoneDefaults::from(&config.dns),
        }
    }
}

/// Keeps the published zones in step with the controller.
pub struct ZoneSync {
    inventory: Arc<dyn Inventory>,
    state: DnsState,
    settings: SyncSettings,
    /// Serializes refresh cycles.
    cycle: Mutex<()>,
}

impl ZoneSync {
    /// Create a synchronizer publishing into `state`.
    pub fn new(inventory: Arc<dyn Inventory>, state: DnsState, settings: SyncSettings) -> Self {
        Self {
            inventory,
            state,
            settings,
            cycle: Mutex::new(()),
        }
    }

    /// The state this synchronizer publishes into.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// Log in to the controller.
    pub async fn login(&self) -> Result<(), DnsError> {
        match self.inventory.login().await {
            Ok(()) => {
                metrics::record_login(RefreshResult::Success);
                Ok(())
            }
            Err(e) => {
                metrics::record_login(RefreshResult::Error);
                Err(DnsError::inventory("error logging in to controller", e))
            }
        }
    }

    /// Run one refresh cycle now.
    pub async fn update_zones(&self) -> Result<(), DnsError> {
        self.update_zones_at(Instant::now()).await
    }

    /// Run one refresh cycle, stamping observed records with `now`.
    pub async fn update_zones_at(&self, now: Instant) -> Result<(), DnsError> {
        let _cycle = self.cycle.lock().await;
        let timer = Timer::start();
        info!("updating zones");

        let result = self.refresh(now).await;

        let outcome = match result {
            Ok(()) => RefreshResult::Success,
            Err(_) => RefreshResult::Error,
        };
        metrics::record_refresh(outcome, timer.elapsed());
        if result.is_ok() {
            self.state.emit_metrics();
        }
        result
    }

    async fn refresh(&self, now: Instant) -> Result<(), DnsError> {
        let inventory = self.fetch_inventory().await?;
        let snapshot = self.build_snapshot(&inventory, now)?;
        self.state.publish(snapshot);
        Ok(())
    }

    /// Collect the inventory of every configured site.
    async fn fetch_inventory(&self) -> Result<InventorySnapshot, DnsError> {
        let mut inventory = InventorySnapshot::default();

        for site in &self.settings.sites {
            debug!(site = %site, "getting networks");
            self.inventory
                .select_site(site)
                .await
                .map_err(|e| DnsError::inventory("error selecting site on controller", e))?;
            let networks = self
                .inventory
                .list_networks()
                .await
                .map_err(|e| DnsError::inventory("error getting networks from controller", e))?;
            inventory
                .networks
                .extend(networks.into_iter().filter(|n| n.is_interface()));

            if self.settings.resolve_clients {
                debug!(site = %site, "getting clients");
                let clients = self
                    .inventory
                    .list_clients()
                    .await
                    .map_err(|e| DnsError::inventory("error getting clients from controller", e))?;
                inventory.clients.extend(clients);
            }

            if self.settings.resolve_devices {
                debug!(site = %site, "getting devices");
                let devices = self
                    .inventory
                    .list_devices()
                    .await
                    .map_err(|e| DnsError::inventory("error getting devices from controller", e))?;
                inventory.devices.extend(devices);
            }

            if self.settings.resolve_reservations {
                debug!(site = %site, "getting dhcp reservations");
                let reservations = self.inventory.list_reservations().await.map_err(|e| {
                    DnsError::inventory("error getting dhcp reservations from controller", e)
                })?;
                inventory.reservations.extend(reservations);
            }
        }

        debug!(
            networks = inventory.networks.len(),
            clients = inventory.clients.len(),
            devices = inventory.devices.len(),
            reservations = inventory.reservations.len(),
            "fetched inventory"
        );
        Ok(inventory)
    }

    /// Build the next snapshot from `inventory` and the published records.
    fn build_snapshot(
        &self,
        inventory: &InventorySnapshot,
        now: Instant,
    ) -> Result<ZoneSnapshot, DnsError> {
        let previous = self.state.snapshot();
        let mut records = previous.records().clone();

        let live = RecordSynthesizer::new(&mut records, now).synthesize(inventory);

        let mut purged = 0;
        for set in records.values_mut() {
            purged += set.purge_stale(self.settings.stale_record_duration, now);
        }
        metrics::record_stale_purged(purged);
        records.retain(|zone, set| zone == REVERSE_ZONE || live.contains(zone) || !set.is_empty());

        let serial = previous.serial().wrapping_add(1);
        let mut zones = Vec::with_capacity(records.len());
        for (name, set) in &records {
            let fallback = match &self.settings.fallback {
                Some(target) if name != REVERSE_ZONE => {
                    let address = target.resolve(name, &records);
                    metrics::record_fallback(address.is_some());
                    address
                }
                _ => None,
            };
            let zone = Zone::from_record_set(
                name,
                set,
                fallback,
                &self.settings.zone_defaults,
                serial,
            )?;
            debug!(zone = %name, records = zone.len(), "built zone");
            zones.push(zone);
        }

        info!(
            serial,
            zones = zones.len(),
            purged,
            "zones updated"
        );
        Ok(ZoneSnapshot::new(zones, records, serial))
    }

    /// Run both loops until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let refresh_handle = tokio::spawn({
            let sync = self.clone();
            let token = token.clone();
            async move { sync.refresh_loop(token).await }
        });

        let session_handle = tokio::spawn({
            let sync = self.clone();
            let token = token.clone();
            async move { sync.session_loop(token).await }
        });

        let (refresh_result, session_result) = tokio::join!(refresh_handle, session_handle);

        if let Err(e) = refresh_result {
            error!("Zone refresh task panicked: {}", e);
        }
        if let Err(e) = session_result {
            error!("Session refresh task panicked: {}", e);
        }
    }

    /// Refresh the zones every `refresh_interval` until cancelled.
    pub async fn refresh_loop(&self, token: CancellationToken) {
        let delay = self.settings.refresh_interval;
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("zone refresh loop shutting down");
                    return;
                }

                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("zone refresh cancelled mid-cycle");
                    return;
                }

                result = self.update_zones() => {
                    if let Err(e) = result {
                        error!("Failed to update zones: {}", e);
                    }
                }
            }
        }
    }

    /// Log in again every `login_interval` until cancelled.
    pub async fn session_loop(&self, token: CancellationToken) {
        let delay = self.settings.login_interval;
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("session refresh loop shutting down");
                    return;
                }

                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("session refresh cancelled mid-login");
                    return;
                }

                result = self.login() => {
                    match result {
                        Ok(()) => debug!("renewed controller session"),
                        Err(e) => error!("Failed to login to controller: {}", e),
                    }
                }
            }
        }
    }
}
