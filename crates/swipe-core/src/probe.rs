//! Exit-IP probe for the live proxy instance.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::proxy::proxy_url;

const IP_ECHO_URL: &str = "https://api.ipify.org";

/// Route one request through the instance's HTTP proxy and return the exit
/// address the wider internet sees. Confirms the cloud-init bootstrap
/// actually produced a working proxy.
pub async fn check_exit_ip(ip: &str, port: u16, username: &str, password: &str) -> Result<String> {
    let proxy = reqwest::Proxy::all(proxy_url(ip, port, username, password))
        .context("build proxy from instance address")?;
    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(Duration::from_secs(15))
        .build()
        .context("build probe client")?;

    let exit_ip = client
        .get(IP_ECHO_URL)
        .send()
        .await
        .context("proxy unreachable")?
        .error_for_status()
        .context("ip echo service rejected the request")?
        .text()
        .await?;

    Ok(exit_ip.trim().to_string())
}
