//! SQLite-backed store implementation.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{
    InstanceRow, InstanceStatus, NewInstance, NewTask, TaskId, TaskRow, TaskStatus,
};

/// Handle to the SQLite-backed store.
///
/// The default database file lives under the XDG state directory:
/// `~/.local/state/swipe/swipe.db` on Debian.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
}

impl Store {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("swipe")?;
        let state_dir = xdg_dirs.get_state_home();
        Self::open_at(state_dir.join("swipe.db")).await
    }

    /// Open (or create) a database at an explicit path.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store (tests).
    ///
    /// Single connection so the pool can't hand back a different empty DB.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // Three-table schema: the swipe queue, the proxy-instance ledger,
        // and a key/value config table.
        //
        // - `preview_images` and `download_gids` hold JSON string arrays.
        // - `(chat_id, msg_id)` is the collector dedup key.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                msg_id INTEGER NOT NULL,
                source_url TEXT NOT NULL,
                title TEXT,
                description TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                preview_images TEXT,
                status TEXT NOT NULL,
                drive_file_id TEXT,
                drive_file_name TEXT,
                download_gids TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                confirmed_at INTEGER,
                completed_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_source ON tasks (chat_id, msg_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_id INTEGER NOT NULL UNIQUE,
                label TEXT NOT NULL,
                region TEXT NOT NULL,
                ip_address TEXT,
                proxy_port INTEGER NOT NULL DEFAULT 1080,
                proxy_username TEXT NOT NULL DEFAULT '',
                proxy_password TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                hourly_cost REAL NOT NULL DEFAULT 0,
                total_minutes INTEGER NOT NULL DEFAULT 0,
                ready_at INTEGER,
                destroyed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_instances_status ON instances (status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Insert a collector-discovered task in `PENDING`.
    ///
    /// Returns `None` when `(chat_id, msg_id, source_url)` is already
    /// tracked, so repeated collector scans are harmless.
    pub async fn insert_task(&self, new: &NewTask) -> Result<Option<TaskId>> {
        let existing = sqlx::query(
            "SELECT id FROM tasks WHERE chat_id = ?1 AND msg_id = ?2 AND source_url = ?3",
        )
        .bind(new.chat_id)
        .bind(new.msg_id)
        .bind(&new.source_url)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let now = unix_timestamp();
        let previews = encode_string_list(&new.preview_images)?;
        let res = sqlx::query(
            r#"
            INSERT INTO tasks (
                chat_id, msg_id, source_url, title, description, file_size,
                preview_images, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(new.chat_id)
        .bind(new.msg_id)
        .bind(&new.source_url)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.file_size)
        .bind(previews)
        .bind(TaskStatus::Pending.as_str())
        .bind(now)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            // Another message already claimed (chat_id, msg_id).
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(task_from_row).transpose()
    }

    /// All tasks currently in `status`, oldest first (scan order for ticks).
    pub async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ?1 ORDER BY id ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(task_from_row).collect()
    }

    /// Paged task listing, newest first, optionally filtered by status.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskRow>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(
                    r#"
                    SELECT * FROM tasks WHERE status = ?1
                    ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3
                    "#,
                )
                .bind(s.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(task_from_row).collect()
    }

    /// Number of tasks the engine still has work for.
    pub async fn count_active_tasks(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks WHERE status IN ('CONFIRMED', 'TRANSFERRING', 'DOWNLOADING')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Most recent completion time across all `COMPLETE` tasks.
    pub async fn latest_completed_at(&self) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT completed_at FROM tasks
            WHERE status = 'COMPLETE' AND completed_at IS NOT NULL
            ORDER BY completed_at DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("completed_at")))
    }

    /// Per-status task counts (dashboard).
    pub async fn status_counts(&self) -> Result<Vec<(TaskStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts: Vec<(TaskStatus, i64)> =
            TaskStatus::ALL.iter().map(|s| (*s, 0i64)).collect();
        for row in rows {
            let status = TaskStatus::from_str(row.get::<String, _>("status").as_str());
            let n: i64 = row.get("n");
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == status) {
                slot.1 += n;
            }
        }
        Ok(counts)
    }

    /// Swipe-confirm: `PENDING → CONFIRMED`. Returns false if the task moved.
    pub async fn mark_confirmed(&self, id: TaskId) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks SET status = 'CONFIRMED', confirmed_at = ?1
            WHERE id = ?2 AND status = 'PENDING'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Swipe-ignore: `PENDING → IGNORED`.
    pub async fn mark_ignored(&self, id: TaskId) -> Result<bool> {
        let r = sqlx::query("UPDATE tasks SET status = 'IGNORED' WHERE id = ?1 AND status = 'PENDING'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// `CONFIRMED → TRANSFERRING`, recording the drive artifact handle.
    pub async fn mark_transferring(
        &self,
        id: TaskId,
        drive_file_id: &str,
        drive_file_name: Option<&str>,
    ) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'TRANSFERRING', drive_file_id = ?1, drive_file_name = ?2
            WHERE id = ?3 AND status = 'CONFIRMED'
            "#,
        )
        .bind(drive_file_id)
        .bind(drive_file_name)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Adopt the post-restore id discovered by name lookup.
    pub async fn update_drive_file_id(&self, id: TaskId, drive_file_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET drive_file_id = ?1 WHERE id = ?2")
            .bind(drive_file_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `TRANSFERRING → DOWNLOADING`, recording the daemon handles.
    pub async fn mark_downloading(&self, id: TaskId, gids: &[String]) -> Result<bool> {
        let gids_json = encode_string_list(gids)?;
        let r = sqlx::query(
            r#"
            UPDATE tasks SET status = 'DOWNLOADING', download_gids = ?1
            WHERE id = ?2 AND status = 'TRANSFERRING'
            "#,
        )
        .bind(gids_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// `DOWNLOADING → COMPLETE`, stamping the completion time.
    pub async fn mark_complete(&self, id: TaskId) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks SET status = 'COMPLETE', completed_at = ?1
            WHERE id = ?2 AND status = 'DOWNLOADING'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Move a task from an expected active state to `ERROR`.
    ///
    /// The message is truncated to 500 characters (operator display, not a
    /// log archive).
    pub async fn fail_task(&self, id: TaskId, from: TaskStatus, message: &str) -> Result<bool> {
        let message: String = message.chars().take(500).collect();
        let r = sqlx::query(
            "UPDATE tasks SET status = 'ERROR', error_message = ?1 WHERE id = ?2 AND status = ?3",
        )
        .bind(message)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    // =========================================================================
    // Instances
    // =========================================================================

    pub async fn get_instance_by_provider(&self, provider_id: i64) -> Result<Option<InstanceRow>> {
        let row = sqlx::query("SELECT * FROM instances WHERE provider_id = ?1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(instance_from_row).transpose()
    }

    /// Record an instance keyed by its provider id.
    ///
    /// A label-idempotent create can hand back an instance that already has
    /// a row (e.g. a zombie being retried), so this upserts: status and
    /// address follow the new observation, `ready_at`/cost history stay.
    pub async fn upsert_instance(&self, new: &NewInstance) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO instances (
                provider_id, label, region, ip_address,
                proxy_port, proxy_username, proxy_password,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(provider_id) DO UPDATE SET
                status = excluded.status,
                ip_address = COALESCE(excluded.ip_address, ip_address),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(new.provider_id)
        .bind(&new.label)
        .bind(&new.region)
        .bind(&new.ip_address)
        .bind(new.proxy_port as i64)
        .bind(&new.proxy_username)
        .bind(&new.proxy_password)
        .bind(new.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark an instance `RUNNING` with its public address.
    /// `ready_at` is set once and survives repeated reconciles.
    pub async fn mark_instance_running(&self, provider_id: i64, ip_address: &str) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE instances
            SET status = 'RUNNING', ip_address = ?1,
                ready_at = COALESCE(ready_at, ?2), updated_at = ?2
            WHERE provider_id = ?3
            "#,
        )
        .bind(ip_address)
        .bind(now)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_instance_status(
        &self,
        provider_id: i64,
        status: InstanceStatus,
    ) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query("UPDATE instances SET status = ?1, updated_at = ?2 WHERE provider_id = ?3")
            .bind(status.as_str())
            .bind(now)
            .bind(provider_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close out a destroyed instance with its accumulated runtime.
    pub async fn finish_instance(
        &self,
        provider_id: i64,
        destroyed_at: i64,
        total_minutes: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE instances
            SET status = 'DESTROYED', destroyed_at = ?1, total_minutes = ?2, updated_at = ?1
            WHERE provider_id = ?3
            "#,
        )
        .bind(destroyed_at)
        .bind(total_minutes)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The `RUNNING` row for a label, if any.
    pub async fn running_instance(&self, label: &str) -> Result<Option<InstanceRow>> {
        let row = sqlx::query(
            "SELECT * FROM instances WHERE label = ?1 AND status = 'RUNNING' ORDER BY id DESC LIMIT 1",
        )
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_row).transpose()
    }

    /// A `PROVISIONING` or `RUNNING` row for a label (stale-instance check).
    pub async fn live_instance(&self, label: &str) -> Result<Option<InstanceRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM instances
            WHERE label = ?1 AND status IN ('PROVISIONING', 'RUNNING')
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        row.map(instance_from_row).transpose()
    }

    /// Number of rows in a non-terminal lifecycle state.
    pub async fn count_live_instances(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM instances WHERE status IN ('PROVISIONING', 'RUNNING', 'DESTROYING')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Mark every non-destroyed row `DESTROYED` (reconcile residue cleanup
    /// and the emergency escape hatch). Returns the number of rows touched.
    pub async fn destroy_all_instances(&self) -> Result<u64> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE instances
            SET status = 'DESTROYED', destroyed_at = ?1, updated_at = ?1
            WHERE status != 'DESTROYED'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Zombie rows needing an operator (dashboard).
    pub async fn zombie_instances(&self) -> Result<Vec<InstanceRow>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE status = 'ZOMBIE' ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(instance_from_row).collect()
    }

    // =========================================================================
    // Config
    // =========================================================================

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }
}

fn task_from_row(row: sqlx::sqlite::SqliteRow) -> Result<TaskRow> {
    let status: String = row.get("status");
    Ok(TaskRow {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        msg_id: row.get("msg_id"),
        source_url: row.get("source_url"),
        title: row.get("title"),
        description: row.get("description"),
        file_size: row.get("file_size"),
        preview_images: decode_string_list(row.get("preview_images"))?,
        status: TaskStatus::from_str(&status),
        drive_file_id: row.get("drive_file_id"),
        drive_file_name: row.get("drive_file_name"),
        download_gids: decode_string_list(row.get("download_gids"))?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        confirmed_at: row.get("confirmed_at"),
        completed_at: row.get("completed_at"),
    })
}

fn instance_from_row(row: sqlx::sqlite::SqliteRow) -> Result<InstanceRow> {
    let status: String = row.get("status");
    Ok(InstanceRow {
        id: row.get("id"),
        provider_id: row.get("provider_id"),
        label: row.get("label"),
        region: row.get("region"),
        ip_address: row.get("ip_address"),
        proxy_port: row.get::<i64, _>("proxy_port") as u16,
        proxy_username: row.get("proxy_username"),
        proxy_password: row.get("proxy_password"),
        status: InstanceStatus::from_str(&status),
        hourly_cost: row.get("hourly_cost"),
        total_minutes: row.get("total_minutes"),
        ready_at: row.get("ready_at"),
        destroyed_at: row.get("destroyed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn encode_string_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(values)?))
}

fn decode_string_list(raw: Option<String>) -> Result<Vec<String>> {
    match raw.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Ok(serde_json::from_str(s)?),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magnet_task(chat_id: i64, msg_id: i64) -> NewTask {
        NewTask {
            chat_id,
            msg_id,
            source_url: "magnet:?xt=urn:btih:AAAABBBB".to_string(),
            title: Some("Some pack".to_string()),
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn ingest_skips_duplicates() {
        let store = Store::open_memory().await.unwrap();

        let id = store.insert_task(&magnet_task(7, 100)).await.unwrap();
        assert!(id.is_some());

        // Same (chat, msg, url) again: skipped.
        assert!(store.insert_task(&magnet_task(7, 100)).await.unwrap().is_none());

        // Same message, different url: the unique index still rejects it.
        let mut other = magnet_task(7, 100);
        other.source_url = "magnet:?xt=urn:btih:CCCCDDDD".to_string();
        assert!(store.insert_task(&other).await.unwrap().is_none());

        // Different message is a new task.
        assert!(store.insert_task(&magnet_task(7, 101)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn swipe_actions_only_from_pending() {
        let store = Store::open_memory().await.unwrap();
        let id = store.insert_task(&magnet_task(1, 1)).await.unwrap().unwrap();

        assert!(store.mark_confirmed(id).await.unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Confirmed);
        assert!(task.confirmed_at.is_some());

        // Already confirmed: both actions are rejected.
        assert!(!store.mark_confirmed(id).await.unwrap());
        assert!(!store.mark_ignored(id).await.unwrap());

        let id2 = store.insert_task(&magnet_task(1, 2)).await.unwrap().unwrap();
        assert!(store.mark_ignored(id2).await.unwrap());
        let task2 = store.get_task(id2).await.unwrap().unwrap();
        assert_eq!(task2.status, TaskStatus::Ignored);
    }

    #[tokio::test]
    async fn pipeline_transitions_are_compare_and_swap() {
        let store = Store::open_memory().await.unwrap();
        let id = store.insert_task(&magnet_task(1, 1)).await.unwrap().unwrap();

        // Skipping ahead is rejected while still pending.
        assert!(!store.mark_transferring(id, "f1", None).await.unwrap());
        assert!(!store.mark_downloading(id, &["g".into()]).await.unwrap());
        assert!(!store.mark_complete(id).await.unwrap());

        assert!(store.mark_confirmed(id).await.unwrap());
        assert!(store.mark_transferring(id, "f1", Some("Pack.mkv")).await.unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Transferring);
        assert_eq!(task.drive_file_id.as_deref(), Some("f1"));
        assert_eq!(task.drive_file_name.as_deref(), Some("Pack.mkv"));

        // A stale actor that still believes the task is CONFIRMED loses.
        assert!(!store.mark_transferring(id, "f2", None).await.unwrap());

        let gids = vec!["gid-1".to_string(), "gid-2".to_string()];
        assert!(store.mark_downloading(id, &gids).await.unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.download_gids, gids);

        assert!(store.mark_complete(id).await.unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.completed_at.is_some());

        // Terminal: no further moves.
        assert!(!store.fail_task(id, TaskStatus::Downloading, "late").await.unwrap());
    }

    #[tokio::test]
    async fn fail_task_truncates_long_messages() {
        let store = Store::open_memory().await.unwrap();
        let id = store.insert_task(&magnet_task(1, 1)).await.unwrap().unwrap();
        store.mark_confirmed(id).await.unwrap();

        // Multi-byte characters: truncation must cut on char boundaries.
        let long: String = "转".repeat(600);
        assert!(store.fail_task(id, TaskStatus::Confirmed, &long).await.unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error_message.unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn active_counts_and_latest_completion() {
        let store = Store::open_memory().await.unwrap();
        assert_eq!(store.count_active_tasks().await.unwrap(), 0);
        assert_eq!(store.latest_completed_at().await.unwrap(), None);

        let a = store.insert_task(&magnet_task(1, 1)).await.unwrap().unwrap();
        let b = store.insert_task(&magnet_task(1, 2)).await.unwrap().unwrap();
        store.mark_confirmed(a).await.unwrap();
        store.mark_confirmed(b).await.unwrap();
        assert_eq!(store.count_active_tasks().await.unwrap(), 2);

        store.mark_transferring(a, "f1", None).await.unwrap();
        store.mark_downloading(a, &["g1".into()]).await.unwrap();
        store.mark_complete(a).await.unwrap();
        assert_eq!(store.count_active_tasks().await.unwrap(), 1);
        assert!(store.latest_completed_at().await.unwrap().is_some());

        let counts = store.status_counts().await.unwrap();
        let get = |s: TaskStatus| counts.iter().find(|(x, _)| *x == s).unwrap().1;
        assert_eq!(get(TaskStatus::Confirmed), 1);
        assert_eq!(get(TaskStatus::Complete), 1);
        assert_eq!(get(TaskStatus::Pending), 0);
    }

    fn proxy_instance(provider_id: i64, status: InstanceStatus) -> NewInstance {
        NewInstance {
            provider_id,
            label: "swipe".to_string(),
            region: "ap-northeast".to_string(),
            ip_address: None,
            proxy_port: 1080,
            proxy_username: "proxy".to_string(),
            proxy_password: "swipe2024".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn instance_upsert_preserves_ready_at() {
        let store = Store::open_memory().await.unwrap();
        store
            .upsert_instance(&proxy_instance(42, InstanceStatus::Provisioning))
            .await
            .unwrap();
        assert!(store.running_instance("swipe").await.unwrap().is_none());

        store.mark_instance_running(42, "203.0.113.7").await.unwrap();
        let row = store.running_instance("swipe").await.unwrap().unwrap();
        assert_eq!(row.ip_address.as_deref(), Some("203.0.113.7"));
        let ready_at = row.ready_at.unwrap();

        // Reconcile after restart observes the same remote again.
        store
            .upsert_instance(&proxy_instance(42, InstanceStatus::Running))
            .await
            .unwrap();
        store.mark_instance_running(42, "203.0.113.7").await.unwrap();
        let row = store.running_instance("swipe").await.unwrap().unwrap();
        assert_eq!(row.ready_at, Some(ready_at));
        assert_eq!(store.count_live_instances().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn finish_and_destroy_all() {
        let store = Store::open_memory().await.unwrap();
        store
            .upsert_instance(&proxy_instance(42, InstanceStatus::Provisioning))
            .await
            .unwrap();
        store.mark_instance_running(42, "203.0.113.7").await.unwrap();

        store.finish_instance(42, unix_timestamp(), 12).await.unwrap();
        let row = store.get_instance_by_provider(42).await.unwrap().unwrap();
        assert_eq!(row.status, InstanceStatus::Destroyed);
        assert_eq!(row.total_minutes, 12);
        assert!(row.destroyed_at.is_some());

        store
            .upsert_instance(&proxy_instance(43, InstanceStatus::Provisioning))
            .await
            .unwrap();
        store
            .upsert_instance(&proxy_instance(44, InstanceStatus::Zombie))
            .await
            .unwrap();
        let touched = store.destroy_all_instances().await.unwrap();
        assert_eq!(touched, 2);
        assert_eq!(store.count_live_instances().await.unwrap(), 0);
        assert!(store.zombie_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swipe.db");

        let id = {
            let store = Store::open_at(&path).await.unwrap();
            let id = store.insert_task(&magnet_task(1, 1)).await.unwrap().unwrap();
            store.mark_confirmed(id).await.unwrap();
            id
        };

        // A fresh process sees exactly what was committed.
        let store = Store::open_at(&path).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Confirmed);
        assert_eq!(store.count_active_tasks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn config_kv_roundtrip() {
        let store = Store::open_memory().await.unwrap();
        assert_eq!(store.get_config("collector_cursor").await.unwrap(), None);
        store.set_config("collector_cursor", "12345").await.unwrap();
        store.set_config("collector_cursor", "12346").await.unwrap();
        assert_eq!(
            store.get_config("collector_cursor").await.unwrap().as_deref(),
            Some("12346")
        );
    }
}
