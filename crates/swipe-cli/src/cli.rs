use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use swipe_core::aria2::{Aria2Client, DownloadDaemon};
use swipe_core::config::{self, SwipeConfig};
use swipe_core::engine::Engine;
use swipe_core::linode::{CloudProvider, LinodeClient};
use swipe_core::probe;
use swipe_core::proxy::{
    ProvisionTiming, ProxyCredentials, ProxyInstance, INSTANCE_LABEL,
};
use swipe_core::store::{NewTask, Store, TaskRow, TaskStatus};

/// Top-level CLI for the swipe acquisition orchestrator.
#[derive(Debug, Parser)]
#[command(name = "swipe")]
#[command(about = "swipe: batch media acquisition orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the orchestration engine until interrupted.
    Run,

    /// Ingest a discovered resource (collector entry point).
    Add {
        /// Originating chat id.
        #[arg(long)]
        chat_id: i64,

        /// Originating message id.
        #[arg(long)]
        msg_id: i64,

        /// Magnet URI or drive share link.
        #[arg(long)]
        url: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Advertised size in bytes, if the post mentions one.
        #[arg(long)]
        file_size: Option<i64>,

        /// Preview image path/URL; repeat for multiple.
        #[arg(long = "preview")]
        previews: Vec<String>,
    },

    /// Show tasks waiting for a swipe decision.
    Pending {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// List tasks, optionally filtered by status.
    List {
        /// One of PENDING, CONFIRMED, TRANSFERRING, DOWNLOADING, COMPLETE,
        /// IGNORED, ERROR.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Approve a pending task for download.
    Confirm {
        /// Task identifier.
        id: i64,
    },

    /// Dismiss a pending task.
    Ignore {
        /// Task identifier.
        id: i64,
    },

    /// Show task counts, instance state, and daemon statistics.
    Status,

    /// Delete every proxy instance at the provider and clear the daemon
    /// proxy. Irreversible; in-flight downloads keep running.
    EmergencyDestroy,

    /// Check the exit IP seen through the live proxy instance.
    ProxyCheck,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config from {:?}", config::config_path()?);

        match cli.command {
            CliCommand::Run => run_engine(&cfg).await,
            CliCommand::Add {
                chat_id,
                msg_id,
                url,
                title,
                description,
                file_size,
                previews,
            } => {
                let store = open_store(&cfg).await?;
                let new = NewTask {
                    chat_id,
                    msg_id,
                    source_url: url,
                    title,
                    description,
                    file_size: file_size.unwrap_or(0),
                    preview_images: previews,
                };
                match store.insert_task(&new).await? {
                    Some(id) => println!("task {id} created"),
                    None => println!("already tracked, skipped"),
                }
                Ok(())
            }
            CliCommand::Pending { limit, offset } => {
                let store = open_store(&cfg).await?;
                let tasks = store
                    .list_tasks(Some(TaskStatus::Pending), limit, offset)
                    .await?;
                if tasks.is_empty() {
                    println!("nothing waiting for a decision");
                }
                for task in &tasks {
                    print_task(task);
                }
                Ok(())
            }
            CliCommand::List {
                status,
                limit,
                offset,
            } => {
                let status = status.as_deref().map(parse_status).transpose()?;
                let store = open_store(&cfg).await?;
                for task in &store.list_tasks(status, limit, offset).await? {
                    print_task(task);
                }
                Ok(())
            }
            CliCommand::Confirm { id } => {
                let store = open_store(&cfg).await?;
                if store.mark_confirmed(id).await? {
                    println!("task {id} confirmed");
                    Ok(())
                } else {
                    not_pending(&store, id).await
                }
            }
            CliCommand::Ignore { id } => {
                let store = open_store(&cfg).await?;
                if store.mark_ignored(id).await? {
                    println!("task {id} ignored");
                    Ok(())
                } else {
                    not_pending(&store, id).await
                }
            }
            CliCommand::Status => show_status(&cfg).await,
            CliCommand::EmergencyDestroy => {
                let proxy = build_proxy(&cfg).await?;
                let destroyed = proxy.emergency_destroy_all().await?;
                println!("destroyed {destroyed} instance(s), daemon proxy cleared");
                Ok(())
            }
            CliCommand::ProxyCheck => {
                let store = open_store(&cfg).await?;
                let Some(row) = store.running_instance(INSTANCE_LABEL).await? else {
                    anyhow::bail!("no running proxy instance");
                };
                let Some(ip) = row.ip_address.as_deref() else {
                    anyhow::bail!("running instance has no address recorded");
                };
                let exit_ip = probe::check_exit_ip(
                    ip,
                    row.proxy_port,
                    &row.proxy_username,
                    &row.proxy_password,
                )
                .await?;
                println!("proxy exit ip: {exit_ip}");
                Ok(())
            }
        }
    }
}

async fn open_store(cfg: &SwipeConfig) -> Result<Store> {
    match &cfg.database_path {
        Some(path) => Store::open_at(path).await,
        None => Store::open_default().await,
    }
}

async fn run_engine(cfg: &SwipeConfig) -> Result<()> {
    let store = open_store(cfg).await?;
    let mut engine = Engine::from_config(cfg, store)?;
    engine.start().await;
    println!("engine running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    println!("stopping...");
    engine.stop().await;
    Ok(())
}

/// Instance manager without the rest of the engine, for the operator
/// commands that only need the cloud and daemon sides.
async fn build_proxy(cfg: &SwipeConfig) -> Result<Arc<ProxyInstance>> {
    let token = cfg
        .linode_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow::anyhow!("linode_token is not configured"))?;

    let store = open_store(cfg).await?;
    let daemon: Arc<dyn DownloadDaemon> = Arc::new(Aria2Client::new(
        &cfg.aria2_rpc_url,
        cfg.aria2_rpc_secret.as_deref(),
    ));
    let cloud: Arc<dyn CloudProvider> =
        Arc::new(LinodeClient::new(token, &cfg.linode_region, &cfg.linode_type));

    Ok(Arc::new(ProxyInstance::new(
        store,
        cloud,
        daemon,
        ProxyCredentials::from_config(cfg),
        ProvisionTiming::default(),
    )))
}

async fn show_status(cfg: &SwipeConfig) -> Result<()> {
    let store = open_store(cfg).await?;

    println!("tasks:");
    for (status, count) in store.status_counts().await? {
        println!("  {:<13} {}", status.as_str(), count);
    }

    match store.running_instance(INSTANCE_LABEL).await? {
        Some(row) => {
            let uptime_minutes = row
                .ready_at
                .map(|ready| (now_unix() - ready).max(0) / 60)
                .unwrap_or(0);
            println!(
                "instance: {} at {} (up {} min, ~${:.4})",
                row.provider_id,
                row.ip_address.as_deref().unwrap_or("?"),
                uptime_minutes,
                row.hourly_cost * uptime_minutes as f64 / 60.0
            );
        }
        None => println!("instance: none"),
    }

    let zombies = store.zombie_instances().await?;
    for zombie in &zombies {
        println!(
            "ZOMBIE instance {} ({}): needs manual cleanup, see emergency-destroy",
            zombie.provider_id,
            zombie.ip_address.as_deref().unwrap_or("?")
        );
    }

    let daemon = Aria2Client::new(&cfg.aria2_rpc_url, cfg.aria2_rpc_secret.as_deref());
    match daemon.global_stat().await {
        Ok(stat) => println!(
            "aria2: {} active, {} waiting, {} stopped, {} B/s down",
            or_zero(&stat.num_active),
            or_zero(&stat.num_waiting),
            or_zero(&stat.num_stopped),
            or_zero(&stat.download_speed),
        ),
        Err(e) => println!("aria2: unreachable ({e})"),
    }

    Ok(())
}

async fn not_pending(store: &Store, id: i64) -> Result<()> {
    match store.get_task(id).await? {
        Some(task) => anyhow::bail!(
            "task {id} is {}, only pending tasks can be decided",
            task.status.as_str()
        ),
        None => anyhow::bail!("task {id} does not exist"),
    }
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    let upper = s.to_ascii_uppercase();
    TaskStatus::ALL
        .iter()
        .copied()
        .find(|status| status.as_str() == upper)
        .ok_or_else(|| anyhow::anyhow!("unknown status: {s}"))
}

fn print_task(task: &TaskRow) {
    println!(
        "#{:<5} {:<13} {}",
        task.id,
        task.status.as_str(),
        task.title.as_deref().unwrap_or(&task.source_url)
    );
    if let Some(err) = &task.error_message {
        println!("       error: {err}");
    }
}

fn or_zero(s: &str) -> &str {
    if s.is_empty() {
        "0"
    } else {
        s
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_case_insensitive_and_strict() {
        assert_eq!(parse_status("pending").unwrap(), TaskStatus::Pending);
        assert_eq!(parse_status("COMPLETE").unwrap(), TaskStatus::Complete);
        assert!(parse_status("finished").is_err());
    }
}
