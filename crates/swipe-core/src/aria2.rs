//! aria2 JSON-RPC client.
//!
//! The download daemon runs next to the media library; the engine only ever
//! adds URIs, polls per-GID status, and flips the global `all-proxy` option
//! when the proxy instance comes and goes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Error from the daemon RPC boundary.
///
/// Transport failures and daemon-level `{code, message}` errors are kept
/// apart: the monitor pass treats both as "still in progress", but operators
/// want to see which one they are looking at.
#[derive(Debug, thiserror::Error)]
pub enum Aria2Error {
    #[error("aria2 rpc transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("aria2 rpc [{code}]: {message}")]
    Rpc { code: i64, message: String },

    #[error("aria2 rpc: malformed response (no result)")]
    Malformed,
}

/// Per-download options for `add_uri`. Client-wide split/connection defaults
/// are merged in by the client.
#[derive(Debug, Clone)]
pub struct AddUriOptions {
    /// Absolute output directory.
    pub dir: String,
    /// Output filename.
    pub out: String,
}

/// Global transfer statistics (dashboard display; aria2 reports numbers as
/// decimal strings and we pass them through as-is).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalStat {
    #[serde(default, rename = "downloadSpeed")]
    pub download_speed: String,
    #[serde(default, rename = "uploadSpeed")]
    pub upload_speed: String,
    #[serde(default, rename = "numActive")]
    pub num_active: String,
    #[serde(default, rename = "numWaiting")]
    pub num_waiting: String,
    #[serde(default, rename = "numStopped")]
    pub num_stopped: String,
}

/// The download-daemon operations the engine depends on.
#[async_trait]
pub trait DownloadDaemon: Send + Sync {
    /// Enqueue one resource; returns the daemon's GID for it.
    async fn add_uri(&self, uris: &[String], options: &AddUriOptions)
        -> Result<String, Aria2Error>;

    /// Per-GID status probe. The returned map contains at least `status`.
    async fn tell_status(
        &self,
        gid: &str,
        keys: &[&str],
    ) -> Result<Map<String, Value>, Aria2Error>;

    /// Set or clear (`None`) the daemon-wide `all-proxy` option.
    async fn set_proxy(&self, proxy_url: Option<&str>) -> Result<(), Aria2Error>;

    /// Daemon-wide speed/queue counters.
    async fn global_stat(&self) -> Result<GlobalStat, Aria2Error>;
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFailure>,
}

pub struct Aria2Client {
    rpc_url: String,
    rpc_secret: Option<String>,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Aria2Client {
    pub fn new(rpc_url: &str, rpc_secret: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            rpc_url: rpc_url.to_string(),
            rpc_secret: rpc_secret.map(str::to_string),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, Aria2Error> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            "method": method,
            "params": with_token(self.rpc_secret.as_deref(), params),
        });

        let resp = self.http.post(&self.rpc_url).json(&payload).send().await?;
        let body: RpcResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(Aria2Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        body.result.ok_or(Aria2Error::Malformed)
    }
}

/// Prepend the `token:<secret>` parameter when a secret is configured.
fn with_token(secret: Option<&str>, params: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(params.len() + 1);
    if let Some(secret) = secret {
        out.push(Value::String(format!("token:{secret}")));
    }
    out.extend(params);
    out
}

/// Merge per-download options over the client-wide defaults.
fn build_options(options: &AddUriOptions) -> Value {
    json!({
        "split": "16",
        "max-connection-per-server": "16",
        "dir": options.dir,
        "out": options.out,
    })
}

#[async_trait]
impl DownloadDaemon for Aria2Client {
    async fn add_uri(
        &self,
        uris: &[String],
        options: &AddUriOptions,
    ) -> Result<String, Aria2Error> {
        let params = vec![json!(uris), build_options(options)];
        let result = self.call("aria2.addUri", params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or(Aria2Error::Malformed)
    }

    async fn tell_status(
        &self,
        gid: &str,
        keys: &[&str],
    ) -> Result<Map<String, Value>, Aria2Error> {
        let mut params = vec![json!(gid)];
        if !keys.is_empty() {
            params.push(json!(keys));
        }
        let result = self.call("aria2.tellStatus", params).await?;
        match result {
            Value::Object(map) => Ok(map),
            _ => Err(Aria2Error::Malformed),
        }
    }

    async fn set_proxy(&self, proxy_url: Option<&str>) -> Result<(), Aria2Error> {
        // An empty string clears the option daemon-side.
        let options = json!({ "all-proxy": proxy_url.unwrap_or("") });
        self.call("aria2.changeGlobalOption", vec![options]).await?;
        Ok(())
    }

    async fn global_stat(&self) -> Result<GlobalStat, Aria2Error> {
        let result = self.call("aria2.getGlobalStat", Vec::new()).await?;
        serde_json::from_value(result).map_err(|_| Aria2Error::Malformed)
    }
}
