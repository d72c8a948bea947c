//! Push pass: enqueue ready drive artifacts into the download daemon.

use anyhow::Result;

use super::TaskEngine;
use crate::aria2::AddUriOptions;
use crate::store::{TaskRow, TaskStatus};

impl TaskEngine {
    /// Check every `TRANSFERRING` task for drive readiness and hand the
    /// ready ones to aria2, one handle per video file.
    pub async fn push_ready(&self) -> Result<()> {
        let tasks = self.store.tasks_with_status(TaskStatus::Transferring).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        tracing::debug!("checking {} transferring task(s)", tasks.len());

        for task in tasks {
            let Some(file_id) = task.drive_file_id.clone() else {
                tracing::warn!("task {} has no drive file id, skipping", task.id);
                continue;
            };
            if let Err(e) = self.push_one(&task, &file_id).await {
                tracing::error!("task {} push failed: {e:#}", task.id);
                self.store
                    .fail_task(task.id, TaskStatus::Transferring, &format!("{e:#}"))
                    .await?;
            }
        }

        Ok(())
    }

    async fn push_one(&self, task: &TaskRow, file_id: &str) -> Result<()> {
        let (ready, actual_id) = self
            .drive
            .is_ready(file_id, task.drive_file_name.as_deref())
            .await?;
        if !ready {
            tracing::debug!("task {} artifact not ready yet", task.id);
            return Ok(());
        }

        // Share restores change ids; adopt the one the artifact was actually
        // found under before walking it.
        let mut file_id = file_id.to_string();
        if let Some(actual) = actual_id {
            if actual != file_id {
                tracing::info!("task {}: drive file id {} -> {}", task.id, file_id, actual);
                self.store.update_drive_file_id(task.id, &actual).await?;
                file_id = actual;
            }
        }

        let videos = self.drive.list_videos_recursive(&file_id).await?;
        if videos.is_empty() {
            anyhow::bail!("no video files found");
        }
        tracing::info!("task {}: {} video file(s)", task.id, videos.len());

        let mut gids = Vec::with_capacity(videos.len());
        for video in &videos {
            let gid = self
                .daemon
                .add_uri(
                    std::slice::from_ref(&video.url),
                    &AddUriOptions {
                        dir: self.download_dir.clone(),
                        out: video.file_name.clone(),
                    },
                )
                .await?;
            tracing::info!("task {}: queued {} -> gid {}", task.id, video.file_name, gid);
            gids.push(gid);
        }

        self.store.mark_downloading(task.id, &gids).await?;
        tracing::info!("task {} downloading with {} handle(s)", task.id, gids.len());
        Ok(())
    }
}
