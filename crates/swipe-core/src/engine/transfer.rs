//! Confirm-and-transfer pass: move approved resources onto the drive.

use anyhow::Result;
use std::sync::Arc;

use super::TaskEngine;
use crate::pikpak::{is_magnet, PikPakError};
use crate::store::{TaskRow, TaskStatus};

impl TaskEngine {
    /// Process every `CONFIRMED` task. Needs a live proxy instance; when
    /// none exists yet this returns immediately and the next round retries
    /// (provisioning runs in the background).
    pub async fn scan_confirmed(&self) -> Result<()> {
        let tasks = self.store.tasks_with_status(TaskStatus::Confirmed).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        tracing::info!("{} confirmed task(s) waiting", tasks.len());

        let Some(instance) = Arc::clone(&self.proxy).ensure_available().await? else {
            tracing::info!("waiting for proxy instance");
            return Ok(());
        };

        // Last writer wins on the daemon's all-proxy option; re-applying on
        // every scan heals drift from daemon restarts.
        self.proxy.ensure_daemon_proxy(&instance).await;

        for task in tasks {
            if let Err(e) = self.transfer_one(&task).await {
                tracing::error!("task {} transfer failed: {e:#}", task.id);
                self.store
                    .fail_task(task.id, TaskStatus::Confirmed, &format!("{e:#}"))
                    .await?;
            }
        }

        Ok(())
    }

    async fn transfer_one(&self, task: &TaskRow) -> Result<()> {
        if is_magnet(&task.source_url) {
            tracing::info!("task {}: queueing offline download", task.id);
            let file_id = self.drive.offline_download(&task.source_url, "").await?;
            self.store
                .mark_transferring(task.id, &file_id, None)
                .await?;
            tracing::info!("task {} transferring, file_id={file_id}", task.id);
        } else {
            tracing::info!("task {}: restoring share {}", task.id, task.source_url);
            let members = self.drive.transfer_share(&task.source_url).await?;
            let Some(first) = members.first() else {
                return Err(PikPakError::ShareEmpty.into());
            };
            self.store
                .mark_transferring(task.id, &first.file_id, Some(&first.file_name))
                .await?;
            tracing::info!(
                "task {} transferring, file_id={}, file_name={}",
                task.id,
                first.file_id,
                first.file_name
            );
        }
        Ok(())
    }
}
