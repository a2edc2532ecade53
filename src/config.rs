//! Configuration types for omada-dns.

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DnsError;

/// Maximum length of a fallback target (the DNS limit for a presentation-format name).
pub const MAX_FALLBACK_LEN: usize = 253;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Controller connection settings.
    pub controller: ControllerConfig,

    /// Record synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check every section; the first problem found is returned.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.dns.soa.validate()?;
        self.controller.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// TTL for DNS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

/// Omada controller connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the controller (e.g., "https://10.0.0.1" or "https://host/omada").
    pub url: String,

    /// Name of the site whose networks are served.
    pub site: String,

    /// Controller user name.
    pub username: String,

    /// Controller password.
    pub password: String,

    /// Verify the controller's TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("url", &self.url)
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

impl ControllerConfig {
    fn validate(&self) -> Result<(), DnsError> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| DnsError::Config(format!("controller.url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DnsError::Config(format!(
                "controller.url must be http or https: {:?}",
                self.url
            )));
        }
        for (field, value) in [
            ("controller.site", &self.site),
            ("controller.username", &self.username),
            ("controller.password", &self.password),
        ] {
            if value.is_empty() {
                return Err(DnsError::Config(format!("{} is required", field)));
            }
        }
        Ok(())
    }
}

/// Record synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Rebuild the zones every N minutes.
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u64,

    /// Log in again every N hours to renew the session token.
    #[serde(default = "default_refresh_login_hours")]
    pub refresh_login_hours: u64,

    /// Publish records for connected clients.
    #[serde(default = "default_true")]
    pub resolve_clients: bool,

    /// Publish records for controller-managed devices.
    #[serde(default = "default_true")]
    pub resolve_devices: bool,

    /// Publish records for static DHCP reservations.
    #[serde(default = "default_true")]
    pub resolve_dhcp_reservations: bool,

    /// How long records keep being served after their source disappears.
    #[serde(default = "default_stale_record_duration")]
    pub stale_record_duration: GoDuration,

    /// Keep starting when the first refresh fails.
    #[serde(default)]
    pub ignore_startup_errors: bool,

    /// Target of the per-zone wildcard record: IPv4 address, FQDN or short hostname.
    #[serde(default)]
    pub fallback: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_minutes: default_refresh_minutes(),
            refresh_login_hours: default_refresh_login_hours(),
            resolve_clients: true,
            resolve_devices: true,
            resolve_dhcp_reservations: true,
            stale_record_duration: default_stale_record_duration(),
            ignore_startup_errors: false,
            fallback: String::new(),
        }
    }
}

impl SyncConfig {
    /// Interval between record refresh cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes.saturating_mul(60))
    }

    /// Interval between session renewals.
    pub fn login_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_login_hours.saturating_mul(3600))
    }

    fn validate(&self) -> Result<(), DnsError> {
        if self.refresh_minutes == 0 {
            return Err(DnsError::Config("sync.refresh_minutes must be at least 1".into()));
        }
        if self.refresh_minutes.checked_mul(60).is_none() {
            return Err(DnsError::Config(format!(
                "sync.refresh_minutes is too large: {}",
                self.refresh_minutes
            )));
        }
        if self.refresh_login_hours == 0 {
            return Err(DnsError::Config(
                "sync.refresh_login_hours must be at least 1".into(),
            ));
        }
        if self.refresh_login_hours.checked_mul(3600).is_none() {
            return Err(DnsError::Config(format!(
                "sync.refresh_login_hours is too large: {}",
                self.refresh_login_hours
            )));
        }
        validate_fallback(&self.fallback)
    }
}

/// Validate the syntax of a fallback target.
///
/// Empty means "no fallback". Otherwise the value must look like an IPv4
/// address or a host name: letters, digits, dots and hyphens only, no empty
/// labels, and no label starting or ending with a hyphen.
pub fn validate_fallback(value: &str) -> Result<(), DnsError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_FALLBACK_LEN {
        return Err(DnsError::Config(format!(
            "fallback too long (max {} characters): {:?}",
            MAX_FALLBACK_LEN, value
        )));
    }

    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    // A single trailing dot marks an absolute name and is allowed.
    let body = value.strip_suffix('.').unwrap_or(value);
    let labels_ok = !body.is_empty()
        && body
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'));

    if !valid_chars || !labels_ok {
        return Err(DnsError::Config(format!(
            "fallback contains invalid characters: {:?}",
            value
        )));
    }
    Ok(())
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "omada_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "omada-dns".to_string()
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.omada.home").
    pub mname: String,

    /// Admin email in DNS format (e.g., "hostmaster.omada.home").
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

fn default_ttl() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_refresh_minutes() -> u64 {
    1
}

fn default_refresh_login_hours() -> u64 {
    24
}

fn default_stale_record_duration() -> GoDuration {
    GoDuration(Duration::from_secs(600))
}

fn default_refresh() -> u32 {
    7200
}

fn default_retry() -> u32 {
    1800
}

fn default_expire() -> u32 {
    86400
}

fn default_minimum() -> u32 {
    60
}

impl SoaConfig {
    fn validate(&self) -> Result<(), DnsError> {
        for (key, value) in [("dns.soa.mname", &self.mname), ("dns.soa.rname", &self.rname)] {
            Name::from_ascii(value)
                .map_err(|e| DnsError::Config(format!("{} is not a valid name: {}", key, e)))?;
        }
        for (key, value) in [
            ("dns.soa.refresh", self.refresh),
            ("dns.soa.retry", self.retry),
            ("dns.soa.expire", self.expire),
        ] {
            if i32::try_from(value).is_err() {
                return Err(DnsError::Config(format!(
                    "{} must be at most {}: {}",
                    key,
                    i32::MAX,
                    value
                )));
            }
        }
        Ok(())
    }
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.omada.home".to_string(),
            rname: "hostmaster.omada.home".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

/// A duration written the way Go's `time.ParseDuration` accepts it: a
/// sequence of `<number><unit>` pairs such as `90s`, `10m` or `1h30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GoDuration(pub Duration);

impl GoDuration {
    /// The wrapped duration.
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl FromStr for GoDuration {
    type Err = DnsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DnsError::Config("duration cannot be empty".into()));
        }
        if input == "0" {
            return Ok(GoDuration(Duration::ZERO));
        }

        let invalid = || DnsError::Config(format!("invalid duration: {:?}", input));
        let mut total = Duration::ZERO;
        let mut rest = input;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(invalid)?;
            if digits == 0 {
                return Err(invalid());
            }
            let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
            rest = &rest[digits..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let seconds_per_unit = match &rest[..unit_len] {
                "ns" => 1e-9,
                "us" | "µs" => 1e-6,
                "ms" => 1e-3,
                "s" => 1.0,
                "m" => 60.0,
                "h" => 3600.0,
                _ => return Err(invalid()),
            };
            rest = &rest[unit_len..];
            let part = Duration::try_from_secs_f64(value * seconds_per_unit).map_err(|_| invalid())?;
            total = total.checked_add(part).ok_or_else(invalid)?;
        }
        Ok(GoDuration(total))
    }
}

impl TryFrom<String> for GoDuration {
    type Error = DnsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GoDuration> for String {
    fn from(value: GoDuration) -> Self {
        value.to_string()
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if self.0.subsec_nanos() != 0 || secs == 0 {
            return write!(f, "{}s", self.0.as_secs_f64());
        }
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            write!(f, "{}h", h)?;
        }
        if m > 0 {
            write!(f, "{}m", m)?;
        }
        if s > 0 {
            write!(f, "{}s", s)?;
        }
        Ok(())
    }
}
