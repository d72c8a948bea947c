//! Orchestration engine: per-task state machine plus the four periodic
//! drivers that advance it.
//!
//! Control flow is polling, not callbacks: every pass re-reads persisted
//! status and does whatever is due, so a crash at any point resumes cleanly
//! from the store. The passes:
//!
//! 1. confirm-and-transfer (30 s): `CONFIRMED` tasks onto the drive,
//!    requesting the proxy instance on demand.
//! 2. push-to-daemon (30 s): ready drive artifacts into aria2.
//! 3. monitor (30 s): settle `DOWNLOADING` tasks against daemon status.
//! 4. cleanup (60 s): destroy the proxy instance once idle.

mod monitor;
mod push;
mod transfer;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::aria2::{Aria2Client, DownloadDaemon};
use crate::config::SwipeConfig;
use crate::linode::{CloudProvider, LinodeClient};
use crate::pikpak::{DriveApi, PikPakClient};
use crate::proxy::{ProvisionTiming, ProxyCredentials, ProxyInstance};
use crate::store::Store;

const TRANSFER_PERIOD: Duration = Duration::from_secs(30);
const PUSH_PERIOD: Duration = Duration::from_secs(30);
const MONITOR_PERIOD: Duration = Duration::from_secs(30);
const CLEANUP_PERIOD: Duration = Duration::from_secs(60);

/// The per-task state machine over the store and the three external
/// services. Holds no task state of its own.
pub struct TaskEngine {
    store: Store,
    drive: Arc<dyn DriveApi>,
    daemon: Arc<dyn DownloadDaemon>,
    proxy: Arc<ProxyInstance>,
    download_dir: String,
}

impl TaskEngine {
    pub fn new(
        store: Store,
        drive: Arc<dyn DriveApi>,
        daemon: Arc<dyn DownloadDaemon>,
        proxy: Arc<ProxyInstance>,
        download_dir: &str,
    ) -> Self {
        Self {
            store,
            drive,
            daemon,
            proxy,
            download_dir: download_dir.to_string(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn proxy(&self) -> &Arc<ProxyInstance> {
        &self.proxy
    }
}

/// The running engine: a `TaskEngine` plus its four drivers.
pub struct Engine {
    tasks: Arc<TaskEngine>,
    shutdown: Option<watch::Sender<bool>>,
    drivers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wire up real clients from config. Fails fast when the credentials
    /// the engine cannot run without are missing.
    pub fn from_config(cfg: &SwipeConfig, store: Store) -> Result<Self> {
        cfg.require_engine_credentials()?;

        let daemon: Arc<dyn DownloadDaemon> = Arc::new(Aria2Client::new(
            &cfg.aria2_rpc_url,
            cfg.aria2_rpc_secret.as_deref(),
        ));
        let drive: Arc<dyn DriveApi> = Arc::new(PikPakClient::new(
            cfg.pikpak_username.as_deref().unwrap_or_default(),
            cfg.pikpak_password.as_deref().unwrap_or_default(),
        ));
        let cloud: Arc<dyn CloudProvider> = Arc::new(LinodeClient::new(
            cfg.linode_token.as_deref().unwrap_or_default(),
            &cfg.linode_region,
            &cfg.linode_type,
        ));
        let proxy = Arc::new(ProxyInstance::new(
            store.clone(),
            cloud,
            Arc::clone(&daemon),
            ProxyCredentials::from_config(cfg),
            ProvisionTiming::default(),
        ));

        Ok(Self::new(TaskEngine::new(
            store,
            drive,
            daemon,
            proxy,
            &cfg.download_base_path,
        )))
    }

    pub fn new(tasks: TaskEngine) -> Self {
        Self {
            tasks: Arc::new(tasks),
            shutdown: None,
            drivers: Vec::new(),
        }
    }

    pub fn task_engine(&self) -> &Arc<TaskEngine> {
        &self.tasks
    }

    /// Reconcile instance state, then launch the four drivers.
    pub async fn start(&mut self) {
        if self.shutdown.is_some() {
            tracing::warn!("engine already running");
            return;
        }

        if let Err(e) = self.tasks.proxy().reconcile_on_startup().await {
            tracing::error!("instance reconcile failed: {e:#}");
        }

        let (tx, rx) = watch::channel(false);

        self.drivers.push(spawn_driver(
            "confirm-and-transfer",
            TRANSFER_PERIOD,
            rx.clone(),
            Arc::clone(&self.tasks),
            |e| async move { e.scan_confirmed().await },
        ));
        self.drivers.push(spawn_driver(
            "push-to-daemon",
            PUSH_PERIOD,
            rx.clone(),
            Arc::clone(&self.tasks),
            |e| async move { e.push_ready().await },
        ));
        self.drivers.push(spawn_driver(
            "monitor",
            MONITOR_PERIOD,
            rx.clone(),
            Arc::clone(&self.tasks),
            |e| async move { e.monitor_downloads().await },
        ));
        self.drivers.push(spawn_driver(
            "cleanup",
            CLEANUP_PERIOD,
            rx,
            Arc::clone(&self.tasks),
            |e| async move { e.proxy().reap_idle().await },
        ));

        self.shutdown = Some(tx);
        tracing::info!("engine started with 4 drivers");
    }

    /// Signal every driver and wait for each to exit.
    pub async fn stop(&mut self) {
        let Some(tx) = self.shutdown.take() else {
            return;
        };
        let _ = tx.send(true);
        for handle in self.drivers.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("engine stopped");
    }
}

/// Periodic driver: run the pass, log-and-swallow its error, sleep until
/// the next round or shutdown.
fn spawn_driver<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    engine: Arc<TaskEngine>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<TaskEngine>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Err(e) = tick(Arc::clone(&engine)).await {
                tracing::error!("{name} pass failed: {e:#}");
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("{name} driver exited");
    })
}
