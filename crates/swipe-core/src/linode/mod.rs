//! Linode API client for the singleton proxy instance.
//!
//! The label is the authoritative singleton key: `create_instance` returns
//! an existing non-destroyed instance with the same label instead of making
//! a second one, so two racing creators converge on one VM.

pub mod boot;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const API_BASE: &str = "https://api.linode.com/v4";
const IMAGE: &str = "linode/debian12";

#[derive(Debug, thiserror::Error)]
pub enum LinodeError {
    #[error("linode transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("linode api [{status}]: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudInstance {
    pub id: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ipv4: Vec<String>,
}

impl CloudInstance {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn public_ipv4(&self) -> Option<&str> {
        self.ipv4.first().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    data: Vec<CloudInstance>,
}

/// The IaaS operations the proxy lifecycle depends on.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create (or adopt) the instance with this label. The bootstrap payload
    /// installs the SOCKS5 daemon with the given credentials.
    async fn create_instance(
        &self,
        label: &str,
        proxy_port: u16,
        proxy_username: &str,
        proxy_password: &str,
    ) -> Result<CloudInstance, LinodeError>;

    async fn get_instance(&self, id: i64) -> Result<CloudInstance, LinodeError>;

    async fn get_instance_by_label(&self, label: &str)
        -> Result<Option<CloudInstance>, LinodeError>;

    async fn list_instances(
        &self,
        label_prefix: Option<&str>,
    ) -> Result<Vec<CloudInstance>, LinodeError>;

    /// Returns whether the provider acknowledged the deletion.
    async fn delete_instance(&self, id: i64) -> Result<bool, LinodeError>;

    /// Poll until `running` with a public IPv4; `None` on timeout.
    async fn wait_for_running(
        &self,
        id: i64,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<String>, LinodeError>;

    /// Delete every instance whose label starts with `label_prefix`
    /// (the emergency escape hatch). Returns how many were deleted.
    async fn delete_all_instances(&self, label_prefix: &str) -> Result<u32, LinodeError>;
}

pub struct LinodeClient {
    region: String,
    instance_type: String,
    http: reqwest::Client,
}

impl LinodeClient {
    pub fn new(token: &str, region: &str, instance_type: &str) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .expect("linode token is not header-safe");
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");

        Self {
            region: region.to_string(),
            instance_type: instance_type.to_string(),
            http,
        }
    }
}

/// Surface non-2xx responses as `LinodeError::Api` with the first reported
/// reason when one is present.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, LinodeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("errors")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("reason"))
            .and_then(|r| r.as_str())
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => "unreadable error body".to_string(),
    };
    Err(LinodeError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CloudProvider for LinodeClient {
    async fn create_instance(
        &self,
        label: &str,
        proxy_port: u16,
        proxy_username: &str,
        proxy_password: &str,
    ) -> Result<CloudInstance, LinodeError> {
        // Label idempotency: reuse the live instance if one exists.
        if let Some(existing) = self.get_instance_by_label(label).await? {
            tracing::info!(
                "reusing existing instance {} with label {}",
                existing.id,
                label
            );
            return Ok(existing);
        }

        let user_data = boot::user_data(proxy_port, proxy_username, proxy_password);
        let root_pass: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();

        let payload = json!({
            "type": self.instance_type,
            "region": self.region,
            "image": IMAGE,
            "root_pass": root_pass,
            "label": label,
            "metadata": { "user_data": base64::encode(user_data) },
        });

        let resp = self
            .http
            .post(format!("{API_BASE}/linode/instances"))
            .json(&payload)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_instance(&self, id: i64) -> Result<CloudInstance, LinodeError> {
        let resp = self
            .http
            .get(format!("{API_BASE}/linode/instances/{id}"))
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_instance_by_label(
        &self,
        label: &str,
    ) -> Result<Option<CloudInstance>, LinodeError> {
        let instances = self.list_instances(None).await?;
        Ok(instances.into_iter().find(|i| i.label == label))
    }

    async fn list_instances(
        &self,
        label_prefix: Option<&str>,
    ) -> Result<Vec<CloudInstance>, LinodeError> {
        let resp = self
            .http
            .get(format!("{API_BASE}/linode/instances"))
            .send()
            .await?;
        let resp = check(resp).await?;
        let list: InstanceList = resp.json().await?;
        let mut instances = list.data;
        if let Some(prefix) = label_prefix {
            instances.retain(|i| i.label.starts_with(prefix));
        }
        Ok(instances)
    }

    async fn delete_instance(&self, id: i64) -> Result<bool, LinodeError> {
        let resp = self
            .http
            .delete(format!("{API_BASE}/linode/instances/{id}"))
            .send()
            .await?;
        Ok(resp.status() == reqwest::StatusCode::OK)
    }

    async fn wait_for_running(
        &self,
        id: i64,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<String>, LinodeError> {
        let started = Instant::now();
        loop {
            if started.elapsed() > timeout {
                return Ok(None);
            }

            let instance = self.get_instance(id).await?;
            if instance.is_running() {
                if let Some(ip) = instance.public_ipv4() {
                    return Ok(Some(ip.to_string()));
                }
            }

            tokio::time::sleep(poll).await;
        }
    }

    async fn delete_all_instances(&self, label_prefix: &str) -> Result<u32, LinodeError> {
        let instances = self.list_instances(Some(label_prefix)).await?;
        let mut deleted = 0u32;
        for instance in instances {
            if self.delete_instance(instance.id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
