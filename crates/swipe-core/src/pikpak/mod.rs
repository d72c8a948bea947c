//! PikPak drive client.
//!
//! Covers the four drive operations the engine needs: offline-download for
//! magnets, share restore, readiness probing with name-based id repair, and
//! recursive video enumeration with direct-URL resolution. One client per
//! process; the login session is established lazily on first use.

pub mod share;
pub mod types;

pub use share::{is_magnet, is_video_filename, parse_share_token};
pub use types::{ShareMember, VideoFile};

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;

use types::{
    DriveFile, FileListResponse, OfflineDownloadResponse, ShareInfo, SignInResponse,
    PHASE_COMPLETE, RESTORE_FOLDER,
};

const USER_BASE: &str = "https://user.mypikpak.com";
const DRIVE_BASE: &str = "https://api-drive.mypikpak.com";
/// Web client id; the API refuses sign-ins without one.
const CLIENT_ID: &str = "YNxT9w7GMdWvO7bb";
/// Exclude trashed entries from every listing.
const LIST_FILTERS: &str = r#"{"trashed":{"eq":false}}"#;

#[derive(Debug, thiserror::Error)]
pub enum PikPakError {
    #[error("pikpak transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("pikpak api [{status}]: {message}")]
    Api { status: u16, message: String },

    #[error("not a recognizable share link: {0}")]
    InvalidShareUrl(String),

    #[error("PikPak share is not available: {0}")]
    ShareUnavailable(String),

    #[error("PikPak share restore returned no files")]
    ShareEmpty,

    #[error("PikPak offline download returned no file_id")]
    MissingFileId,

    #[error("no download link available for {0}")]
    NoDownloadLink(String),
}

/// The drive operations the engine depends on.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Push a magnet into the offline-download queue; returns the tentative
    /// drive file id for the artifact root.
    async fn offline_download(&self, url: &str, parent_id: &str) -> Result<String, PikPakError>;

    /// Restore a public share into the account. Returns each member's name
    /// paired with its pre-restore id (the API does not report new ids).
    async fn transfer_share(&self, share_url: &str) -> Result<Vec<ShareMember>, PikPakError>;

    /// Whether the artifact is usable, plus the id it was actually found
    /// under (name lookup can repair a stale post-restore id).
    async fn is_ready(
        &self,
        file_id: &str,
        file_name: Option<&str>,
    ) -> Result<(bool, Option<String>), PikPakError>;

    /// Depth-first walk collecting every video file with a direct URL.
    async fn list_videos_recursive(&self, root_id: &str) -> Result<Vec<VideoFile>, PikPakError>;
}

pub struct PikPakClient {
    username: String,
    password: String,
    http: reqwest::Client,
    access_token: Mutex<Option<String>>,
}

impl PikPakClient {
    pub fn new(username: &str, password: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            username: username.to_string(),
            password: password.to_string(),
            http,
            access_token: Mutex::new(None),
        }
    }

    /// Sign in on first use; afterwards the cached token is reused until the
    /// process exits.
    async fn token(&self) -> Result<String, PikPakError> {
        let mut guard = self.access_token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let resp = self
            .http
            .post(format!("{USER_BASE}/v1/auth/signin"))
            .json(&json!({
                "client_id": CLIENT_ID,
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;
        let resp = check(resp).await?;
        let signin: SignInResponse = resp.json().await?;
        *guard = Some(signin.access_token.clone());
        Ok(signin.access_token)
    }

    /// One page-following listing of a folder (`""` is the account root).
    async fn list_folder(&self, parent_id: &str) -> Result<Vec<DriveFile>, PikPakError> {
        let token = self.token().await?;
        let mut files = Vec::new();
        let mut page_token = String::new();
        loop {
            let resp = self
                .http
                .get(format!("{DRIVE_BASE}/drive/v1/files"))
                .bearer_auth(&token)
                .query(&[
                    ("parent_id", parent_id),
                    ("page_token", page_token.as_str()),
                    ("filters", LIST_FILTERS),
                ])
                .send()
                .await?;
            let resp = check(resp).await?;
            let page: FileListResponse = resp.json().await?;
            files.extend(page.files);
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }
        Ok(files)
    }

    async fn file_info(&self, file_id: &str) -> Result<DriveFile, PikPakError> {
        let token = self.token().await?;
        let resp = self
            .http
            .get(format!("{DRIVE_BASE}/drive/v1/files/{file_id}"))
            .bearer_auth(&token)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Direct download URL: `web_content_link` first, then the first
    /// populated `links.*.url`.
    async fn download_url(&self, file: &DriveFile) -> Result<String, PikPakError> {
        let info = self.file_info(&file.id).await?;
        if let Some(url) = info.web_content_link.filter(|u| !u.is_empty()) {
            return Ok(url);
        }
        if let Some(link) = info.links.values().find(|l| !l.url.is_empty()) {
            return Ok(link.url.clone());
        }
        Err(PikPakError::NoDownloadLink(file.name.clone()))
    }

    /// Contents of the drive's well-known restore folder, if it exists.
    async fn restore_folder_files(
        &self,
        root: &[DriveFile],
    ) -> Result<Vec<DriveFile>, PikPakError> {
        let Some(folder) = root
            .iter()
            .find(|f| f.is_folder() && f.name == RESTORE_FOLDER)
        else {
            return Ok(Vec::new());
        };
        self.list_folder(&folder.id).await
    }
}

/// A folder is always ready; a file only once fully materialized.
fn entry_ready(file: &DriveFile) -> bool {
    file.is_folder() || (file.size_bytes() > 0 && file.phase == PHASE_COMPLETE)
}

#[async_trait]
impl DriveApi for PikPakClient {
    async fn offline_download(&self, url: &str, parent_id: &str) -> Result<String, PikPakError> {
        let token = self.token().await?;
        let resp = self
            .http
            .post(format!("{DRIVE_BASE}/drive/v1/files"))
            .bearer_auth(&token)
            .json(&json!({
                "kind": "drive#file",
                "upload_type": "UPLOAD_TYPE_URL",
                "url": { "url": url },
                "parent_id": parent_id,
                "folder_type": if parent_id.is_empty() { "DOWNLOAD" } else { "" },
            }))
            .send()
            .await?;
        let resp = check(resp).await?;
        let body: OfflineDownloadResponse = resp.json().await?;
        match body.task {
            Some(task) if !task.file_id.is_empty() => Ok(task.file_id),
            _ => Err(PikPakError::MissingFileId),
        }
    }

    async fn transfer_share(&self, share_url: &str) -> Result<Vec<ShareMember>, PikPakError> {
        let share_id = parse_share_token(share_url)
            .ok_or_else(|| PikPakError::InvalidShareUrl(share_url.to_string()))?;
        let token = self.token().await?;

        let resp = self
            .http
            .get(format!("{DRIVE_BASE}/drive/v1/share"))
            .bearer_auth(&token)
            .query(&[("share_id", share_id)])
            .send()
            .await?;
        let resp = check(resp).await?;
        let info: ShareInfo = resp.json().await?;

        if info.share_status != "OK" {
            return Err(PikPakError::ShareUnavailable(info.share_status));
        }
        if info.files.is_empty() {
            return Err(PikPakError::ShareEmpty);
        }

        let file_ids: Vec<&str> = info.files.iter().map(|f| f.id.as_str()).collect();
        let resp = self
            .http
            .post(format!("{DRIVE_BASE}/drive/v1/share/restore"))
            .bearer_auth(&token)
            .json(&json!({
                "share_id": share_id,
                "pass_code_token": info.pass_code_token,
                "file_ids": file_ids,
            }))
            .send()
            .await?;
        check(resp).await?;

        Ok(info
            .files
            .into_iter()
            .map(|f| ShareMember {
                file_name: f.name,
                file_id: f.id,
            })
            .collect())
    }

    async fn is_ready(
        &self,
        file_id: &str,
        file_name: Option<&str>,
    ) -> Result<(bool, Option<String>), PikPakError> {
        let root = self.list_folder("").await?;
        let restored = self.restore_folder_files(&root).await?;

        // Primary: locate by id in the root or the restore folder.
        if let Some(entry) = root
            .iter()
            .chain(restored.iter())
            .find(|f| f.id == file_id)
        {
            return Ok((entry_ready(entry), Some(entry.id.clone())));
        }

        // Fallback: a restore changed the id; find the entry by name and
        // hand the repaired id back to the caller.
        if let Some(name) = file_name {
            if let Some(entry) = restored.iter().find(|f| f.name == name) {
                return Ok((entry_ready(entry), Some(entry.id.clone())));
            }
        }

        Ok((false, None))
    }

    async fn list_videos_recursive(&self, root_id: &str) -> Result<Vec<VideoFile>, PikPakError> {
        let mut videos = Vec::new();
        let mut folders = vec![root_id.to_string()];

        while let Some(folder_id) = folders.pop() {
            for file in self.list_folder(&folder_id).await? {
                if file.is_folder() {
                    folders.push(file.id);
                } else if is_video_filename(&file.name) {
                    let url = self.download_url(&file).await?;
                    videos.push(VideoFile {
                        size: file.size_bytes(),
                        file_id: file.id,
                        file_name: file.name,
                        url,
                    });
                }
            }
        }

        Ok(videos)
    }
}

/// Surface non-2xx responses as `PikPakError::Api` with the server's
/// description when one is present.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PikPakError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error_description")
            .or_else(|| body.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => "unreadable error body".to_string(),
    };
    Err(PikPakError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use super::*;

    fn file(id: &str, name: &str, kind: &str, size: &str, phase: &str) -> DriveFile {
        serde_json::from_value(serde_json::json!({
            "id": id, "name": name, "kind": kind, "size": size, "phase": phase,
        }))
        .unwrap()
    }

    #[test]
    fn folders_are_always_ready() {
        let folder = file("d1", "Pack", FOLDER_KIND, "0", "");
        assert!(entry_ready(&folder));
    }

    #[test]
    fn files_need_size_and_complete_phase() {
        let done = file("f1", "Movie.mkv", "drive#file", "4200000000", PHASE_COMPLETE);
        assert!(entry_ready(&done));

        let empty = file("f2", "Movie.mkv", "drive#file", "0", PHASE_COMPLETE);
        assert!(!entry_ready(&empty));

        let pending = file("f3", "Movie.mkv", "drive#file", "4200000000", "PHASE_TYPE_RUNNING");
        assert!(!entry_ready(&pending));
    }

    #[test]
    fn drive_file_size_parses_decimal_strings() {
        let f = file("f1", "a.mkv", "drive#file", "123", PHASE_COMPLETE);
        assert_eq!(f.size_bytes(), 123);
        let f = file("f1", "a.mkv", "drive#file", "", PHASE_COMPLETE);
        assert_eq!(f.size_bytes(), 0);
    }
}
