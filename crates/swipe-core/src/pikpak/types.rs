//! Minimal PikPak drive API structures (only the fields we read).

use serde::Deserialize;
use std::collections::HashMap;

pub const FOLDER_KIND: &str = "drive#folder";
pub const PHASE_COMPLETE: &str = "PHASE_TYPE_COMPLETE";

/// Well-known folder the drive restores shares into.
pub const RESTORE_FOLDER: &str = "Pack From Shared";

#[derive(Debug, Deserialize)]
pub struct SignInResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    /// Byte size as a decimal string (the API's convention).
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub web_content_link: Option<String>,
    #[serde(default)]
    pub links: HashMap<String, DriveLink>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.kind == FOLDER_KIND
    }

    pub fn size_bytes(&self) -> i64 {
        self.size.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveLink {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct FileListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Deserialize)]
pub struct OfflineTask {
    #[serde(default)]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OfflineDownloadResponse {
    #[serde(default)]
    pub task: Option<OfflineTask>,
}

#[derive(Debug, Deserialize)]
pub struct ShareInfo {
    #[serde(default)]
    pub share_status: String,
    #[serde(default)]
    pub pass_code_token: String,
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

/// One restored share member: display name plus its pre-restore id.
/// The restore endpoint does not return post-restore ids; readiness checks
/// repair the id by name later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareMember {
    pub file_name: String,
    pub file_id: String,
}

/// A video file found under an artifact root, with its resolved direct URL.
#[derive(Debug, Clone)]
pub struct VideoFile {
    pub file_id: String,
    pub file_name: String,
    pub size: i64,
    pub url: String,
}
