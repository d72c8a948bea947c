//! Monitor pass: settle `DOWNLOADING` tasks against daemon status.

use anyhow::Result;

use super::TaskEngine;
use crate::store::TaskStatus;

impl TaskEngine {
    /// Probe every handle of every `DOWNLOADING` task. A task completes
    /// only when all of its handles report `complete`; a probe failure
    /// (daemon down, handle unknown) counts as still-in-progress so a
    /// flaky daemon can't produce optimistic completions.
    pub async fn monitor_downloads(&self) -> Result<()> {
        let tasks = self.store.tasks_with_status(TaskStatus::Downloading).await?;
        if tasks.is_empty() {
            return Ok(());
        }

        for task in tasks {
            if task.download_gids.is_empty() {
                tracing::warn!("task {} is downloading with no gids, failing", task.id);
                self.store
                    .fail_task(task.id, TaskStatus::Downloading, "no download gids recorded")
                    .await?;
                continue;
            }

            let mut all_complete = true;
            let mut failed = false;
            for gid in &task.download_gids {
                match self.daemon.tell_status(gid, &["status"]).await {
                    Ok(status) => match status.get("status").and_then(|v| v.as_str()) {
                        Some("error") => {
                            failed = true;
                            break;
                        }
                        Some("complete") => {}
                        _ => all_complete = false,
                    },
                    Err(e) => {
                        tracing::warn!("status probe for gid {gid} failed: {e}");
                        all_complete = false;
                    }
                }
            }

            if failed {
                tracing::warn!("task {} failed in the daemon", task.id);
                self.store
                    .fail_task(task.id, TaskStatus::Downloading, "aria2 download failed")
                    .await?;
            } else if all_complete {
                self.store.mark_complete(task.id).await?;
                tracing::info!("task {} complete", task.id);
            }
        }

        Ok(())
    }
}
