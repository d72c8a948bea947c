//! Types used by the task/instance store.

/// Task identifier.
pub type TaskId = i64;

/// Task lifecycle, stored as a wire-stable uppercase string.
///
/// Legal transitions only move forward:
/// `PENDING → CONFIRMED → TRANSFERRING → DOWNLOADING → COMPLETE`, with
/// `IGNORED` reachable from `PENDING` and `ERROR` from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Confirmed,
    Transferring,
    Downloading,
    Complete,
    Ignored,
    Error,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Confirmed,
        TaskStatus::Transferring,
        TaskStatus::Downloading,
        TaskStatus::Complete,
        TaskStatus::Ignored,
        TaskStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Confirmed => "CONFIRMED",
            TaskStatus::Transferring => "TRANSFERRING",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Ignored => "IGNORED",
            TaskStatus::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PENDING" => TaskStatus::Pending,
            "CONFIRMED" => TaskStatus::Confirmed,
            "TRANSFERRING" => TaskStatus::Transferring,
            "DOWNLOADING" => TaskStatus::Downloading,
            "COMPLETE" => TaskStatus::Complete,
            "IGNORED" => TaskStatus::Ignored,
            _ => TaskStatus::Error,
        }
    }

    /// Active states keep the proxy instance alive and are scanned by the
    /// engine; terminal states are never revisited.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Confirmed | TaskStatus::Transferring | TaskStatus::Downloading
        )
    }
}

/// Proxy instance lifecycle, stored as a wire-stable uppercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Destroying,
    Destroyed,
    /// Remote state could not be confirmed destroyed; needs an operator.
    Zombie,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Destroying => "DESTROYING",
            InstanceStatus::Destroyed => "DESTROYED",
            InstanceStatus::Zombie => "ZOMBIE",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "RUNNING" => InstanceStatus::Running,
            "DESTROYING" => InstanceStatus::Destroying,
            "DESTROYED" => InstanceStatus::Destroyed,
            _ => InstanceStatus::Zombie,
        }
    }
}

/// Input for collector ingest.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub chat_id: i64,
    pub msg_id: i64,
    pub source_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_size: i64,
    pub preview_images: Vec<String>,
}

/// Full task record.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: TaskId,
    pub chat_id: i64,
    pub msg_id: i64,
    pub source_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_size: i64,
    pub preview_images: Vec<String>,
    pub status: TaskStatus,
    /// Best-known id of the artifact on the drive. A share restore changes
    /// ids server-side, so this may be repaired later by name lookup.
    pub drive_file_id: Option<String>,
    /// Fallback lookup key paired with `drive_file_id`.
    pub drive_file_name: Option<String>,
    /// aria2 GIDs, one per enqueued video file.
    pub download_gids: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Full proxy-instance record.
#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub id: i64,
    pub provider_id: i64,
    pub label: String,
    pub region: String,
    pub ip_address: Option<String>,
    pub proxy_port: u16,
    pub proxy_username: String,
    pub proxy_password: String,
    pub status: InstanceStatus,
    pub hourly_cost: f64,
    pub total_minutes: i64,
    pub ready_at: Option<i64>,
    pub destroyed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input when a provisioning attempt records (or re-records) an instance.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub provider_id: i64,
    pub label: String,
    pub region: String,
    pub ip_address: Option<String>,
    pub proxy_port: u16,
    pub proxy_username: String,
    pub proxy_password: String,
    pub status: InstanceStatus,
}
