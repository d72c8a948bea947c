use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/swipe/config.toml`.
///
/// Credentials for the drive and cloud accounts have no sane defaults and
/// stay `None` until the operator fills them in; the engine refuses to start
/// without them, while ingest/browse commands keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwipeConfig {
    /// SQLite database path. `None` means the XDG state dir default.
    pub database_path: Option<String>,

    /// PikPak account used for offline downloads and share restores.
    pub pikpak_username: Option<String>,
    pub pikpak_password: Option<String>,

    /// Linode API token and instance placement.
    pub linode_token: Option<String>,
    pub linode_region: String,
    pub linode_type: String,

    /// SOCKS5 credentials baked into every proxy instance via cloud-init.
    /// Fixed literals so a restarted process can re-derive the daemon proxy
    /// URL for an instance created by a previous process.
    pub socks5_port: u16,
    pub socks5_username: String,
    pub socks5_password: String,

    /// aria2 JSON-RPC endpoint on the download box.
    pub aria2_rpc_url: String,
    pub aria2_rpc_secret: Option<String>,

    /// Reserved tuning knobs for batch aggregation.
    pub aggregation_window_minutes: u32,
    pub batch_task_threshold: u32,
    /// Reserved; the cleanup pass currently uses its own fixed 5-minute
    /// post-completion and 30-minute stale-instance windows.
    pub idle_destroy_minutes: u32,

    /// Output directory handed to aria2 for every download.
    pub download_base_path: String,
    /// Where collector preview images live. `None` means the XDG data dir.
    pub previews_path: Option<String>,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pikpak_username: None,
            pikpak_password: None,
            linode_token: None,
            linode_region: "ap-northeast".to_string(),
            linode_type: "g6-nanode-1".to_string(),
            socks5_port: 1080,
            socks5_username: "proxy".to_string(),
            socks5_password: "swipe2024".to_string(),
            aria2_rpc_url: "http://localhost:6800/jsonrpc".to_string(),
            aria2_rpc_secret: None,
            aggregation_window_minutes: 5,
            batch_task_threshold: 10,
            idle_destroy_minutes: 15,
            download_base_path: "/downloads".to_string(),
            previews_path: None,
        }
    }
}

impl SwipeConfig {
    /// Check that the credentials the engine cannot run without are present.
    ///
    /// Ingesting and browsing tasks works on a bare config; driving the
    /// remote services does not, and silently degrading would strand
    /// confirmed tasks, so startup fails loudly instead.
    pub fn require_engine_credentials(&self) -> Result<()> {
        if self.linode_token.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("linode_token is not configured; the engine cannot manage proxy instances");
        }
        if self.pikpak_username.as_deref().unwrap_or("").is_empty()
            || self.pikpak_password.as_deref().unwrap_or("").is_empty()
        {
            anyhow::bail!("pikpak_username/pikpak_password are not configured; the engine cannot transfer resources");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("swipe")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SwipeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SwipeConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: SwipeConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = SwipeConfig::default();
        assert_eq!(cfg.socks5_port, 1080);
        assert_eq!(cfg.socks5_username, "proxy");
        assert_eq!(cfg.linode_region, "ap-northeast");
        assert_eq!(cfg.aria2_rpc_url, "http://localhost:6800/jsonrpc");
        assert_eq!(cfg.download_base_path, "/downloads");
        assert_eq!(cfg.idle_destroy_minutes, 15);
        assert!(cfg.linode_token.is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = SwipeConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SwipeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.socks5_port, cfg.socks5_port);
        assert_eq!(parsed.download_base_path, cfg.download_base_path);
        assert_eq!(parsed.linode_type, cfg.linode_type);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml = r#"
            linode_token = "tok-123"
            pikpak_username = "user"
            pikpak_password = "pass"
            socks5_password = "hunter2"
        "#;
        let cfg: SwipeConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.linode_token.as_deref(), Some("tok-123"));
        assert_eq!(cfg.socks5_password, "hunter2");
        assert_eq!(cfg.socks5_port, 1080);
        assert!(cfg.require_engine_credentials().is_ok());
    }

    #[test]
    fn engine_refuses_without_credentials() {
        let cfg = SwipeConfig::default();
        assert!(cfg.require_engine_credentials().is_err());

        let cfg = SwipeConfig {
            linode_token: Some("tok".into()),
            ..SwipeConfig::default()
        };
        let err = cfg.require_engine_credentials().unwrap_err();
        assert!(err.to_string().contains("pikpak"));
    }
}
