//! Omada SDN controller client.
//!
//! Speaks the controller's v2 web API: discover the controller id, log in to
//! obtain a CSRF token plus session cookie, then read per-site settings and
//! live client lists.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{ClientEntry, DeviceEntry, Inventory, NetworkInterface, ReservationEntry};
use crate::config::ControllerConfig;
use crate::error::InventoryError;

/// Rows requested per page from paged endpoints.
const PAGE_SIZE: usize = 1000;

/// Upper bound on pages fetched from a single endpoint.
const MAX_PAGES: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard controller response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    error_code: i64,
    #[serde(default)]
    msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, InventoryError> {
        if self.error_code != 0 {
            return Err(InventoryError::Api {
                code: self.error_code,
                message: self.msg,
            });
        }
        self.result.ok_or(InventoryError::Api {
            code: self.error_code,
            message: "response has no result".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControllerInfo {
    omadac_id: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    privilege: Privilege,
}

#[derive(Debug, Deserialize)]
struct Privilege {
    #[serde(default)]
    sites: Vec<SiteRef>,
}

#[derive(Debug, Deserialize)]
struct SiteRef {
    name: String,
    key: String,
}

/// One page of a paged listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default)]
    total_rows: usize,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Default)]
struct Session {
    controller_id: Option<String>,
    token: Option<String>,
    /// site name -> site key
    sites: HashMap<String, String>,
    site_key: Option<String>,
}

/// Inventory backed by an Omada controller.
pub struct OmadaClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    session: RwLock<Session>,
}

impl OmadaClient {
    /// Build a client for the configured controller. No request is made.
    pub fn new(config: &ControllerConfig) -> Result<Self, InventoryError> {
        let mut base_url = Url::parse(&config.url)
            .map_err(|e| InventoryError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        // API paths are joined onto any prefix the controller is served under.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            session: RwLock::new(Session::default()),
        })
    }

    fn url(&self, path: &str) -> Result<Url, InventoryError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| InventoryError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn controller_id(&self) -> Result<String, InventoryError> {
        let cached = self.session.read().controller_id.clone();
        if let Some(id) = cached {
            return Ok(id);
        }
        let info: ControllerInfo = self
            .http
            .get(self.url("/api/info")?)
            .send()
            .await?
            .error_for_status()?
            .json::<Envelope<ControllerInfo>>()
            .await?
            .into_result()?;
        debug!(controller_id = %info.omadac_id, "discovered controller id");
        self.session.write().controller_id = Some(info.omadac_id.clone());
        Ok(info.omadac_id)
    }

    /// GET `/{controller_id}/api/v2/{path}` with the session token attached.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, InventoryError> {
        let (controller_id, token) = {
            let session = self.session.read();
            match (&session.controller_id, &session.token) {
                (Some(id), Some(token)) => (id.clone(), token.clone()),
                _ => return Err(InventoryError::NotLoggedIn),
            }
        };

        let url = self.url(&format!("/{}/api/v2/{}", controller_id, path))?;
        self.http
            .get(url)
            .header("Csrf-Token", token)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<Envelope<T>>()
            .await?
            .into_result()
    }

    /// Fetch every page of a paged listing.
    async fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, InventoryError> {
        let mut rows = Vec::new();
        for page in 1..=MAX_PAGES {
            let chunk: Page<T> = self
                .get(
                    path,
                    &[
                        ("currentPage", page.to_string()),
                        ("currentPageSize", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let fetched = chunk.data.len();
            rows.extend(chunk.data);
            if fetched == 0 || rows.len() >= chunk.total_rows {
                break;
            }
        }
        Ok(rows)
    }

    fn site_path(&self, suffix: &str) -> Result<String, InventoryError> {
        let session = self.session.read();
        let key = session
            .site_key
            .as_deref()
            .ok_or_else(|| InventoryError::SiteNotFound("no site selected".to_string()))?;
        Ok(format!("sites/{}/{}", key, suffix))
    }
}

#[async_trait]
impl Inventory for OmadaClient {
    async fn login(&self) -> Result<(), InventoryError> {
        let controller_id = self.controller_id().await?;
        let url = self.url(&format!("/{}/api/v2/login", controller_id))?;
        let login: LoginResult = self
            .http
            .post(url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<Envelope<LoginResult>>()
            .await?
            .into_result()?;
        self.session.write().token = Some(login.token);

        let user: CurrentUser = self.get("users/current", &[]).await?;
        let sites: HashMap<String, String> = user
            .privilege
            .sites
            .into_iter()
            .map(|site| (site.name, site.key))
            .collect();
        info!(sites = sites.len(), "logged in to controller");
        self.session.write().sites = sites;
        Ok(())
    }

    async fn select_site(&self, site: &str) -> Result<(), InventoryError> {
        let mut session = self.session.write();
        let key = session
            .sites
            .get(site)
            .cloned()
            .ok_or_else(|| InventoryError::SiteNotFound(site.to_string()))?;
        session.site_key = Some(key);
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInterface>, InventoryError> {
        let path = self.site_path("setting/lan/networks")?;
        self.get_paged(&path).await
    }

    async fn list_clients(&self) -> Result<Vec<ClientEntry>, InventoryError> {
        let path = self.site_path("clients")?;
        self.get_paged(&path).await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, InventoryError> {
        let path = self.site_path("devices")?;
        self.get(&path, &[]).await
    }

    async fn list_reservations(&self) -> Result<Vec<ReservationEntry>, InventoryError> {
        let path = self.site_path("setting/service/dhcp")?;
        self.get_paged(&path).await
    }
}
