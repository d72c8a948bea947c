//! Minimal in-memory stand-ins for the three external services, with fixed
//! happy-path behavior. Used by the engine lifecycle test; the per-scenario
//! scripted fakes live with the engine's own unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use swipe_core::aria2::{AddUriOptions, Aria2Error, DownloadDaemon, GlobalStat};
use swipe_core::linode::{CloudInstance, CloudProvider, LinodeError};
use swipe_core::pikpak::{DriveApi, PikPakError, ShareMember, VideoFile};

/// Drive where every magnet resolves instantly to one ready video.
#[derive(Default)]
pub struct InstantDrive;

#[async_trait]
impl DriveApi for InstantDrive {
    async fn offline_download(&self, _url: &str, _parent_id: &str) -> Result<String, PikPakError> {
        Ok("file-1".to_string())
    }

    async fn transfer_share(&self, _share_url: &str) -> Result<Vec<ShareMember>, PikPakError> {
        Ok(vec![ShareMember {
            file_name: "Pack.mkv".to_string(),
            file_id: "file-1".to_string(),
        }])
    }

    async fn is_ready(
        &self,
        file_id: &str,
        _file_name: Option<&str>,
    ) -> Result<(bool, Option<String>), PikPakError> {
        Ok((true, Some(file_id.to_string())))
    }

    async fn list_videos_recursive(&self, root_id: &str) -> Result<Vec<VideoFile>, PikPakError> {
        Ok(vec![VideoFile {
            file_id: format!("{root_id}-v"),
            file_name: "Movie.mkv".to_string(),
            size: 1_000,
            url: "https://cdn.example/movie".to_string(),
        }])
    }
}

/// Daemon that accepts everything and immediately reports `complete`.
#[derive(Default)]
pub struct RecordingDaemon {
    next_gid: AtomicI64,
    pub added: Mutex<Vec<String>>,
    pub proxy: Mutex<Option<String>>,
}

#[async_trait]
impl DownloadDaemon for RecordingDaemon {
    async fn add_uri(
        &self,
        _uris: &[String],
        options: &AddUriOptions,
    ) -> Result<String, Aria2Error> {
        self.added.lock().unwrap().push(options.out.clone());
        Ok(format!(
            "gid-{}",
            1 + self.next_gid.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn tell_status(
        &self,
        _gid: &str,
        _keys: &[&str],
    ) -> Result<Map<String, Value>, Aria2Error> {
        let mut map = Map::new();
        map.insert("status".to_string(), json!("complete"));
        Ok(map)
    }

    async fn set_proxy(&self, proxy_url: Option<&str>) -> Result<(), Aria2Error> {
        *self.proxy.lock().unwrap() = Some(proxy_url.unwrap_or("").to_string());
        Ok(())
    }

    async fn global_stat(&self) -> Result<GlobalStat, Aria2Error> {
        Ok(GlobalStat::default())
    }
}

/// Provider where instances boot instantly.
#[derive(Default)]
pub struct InstantCloud {
    next_id: AtomicI64,
    pub instances: Mutex<HashMap<i64, CloudInstance>>,
    pub create_calls: AtomicI64,
}

#[async_trait]
impl CloudProvider for InstantCloud {
    async fn create_instance(
        &self,
        label: &str,
        _proxy_port: u16,
        _proxy_username: &str,
        _proxy_password: &str,
    ) -> Result<CloudInstance, LinodeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut instances = self.instances.lock().unwrap();
        if let Some(existing) = instances.values().find(|i| i.label == label) {
            return Ok(existing.clone());
        }
        let id = 42 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = CloudInstance {
            id,
            label: label.to_string(),
            region: "ap-northeast".to_string(),
            status: "running".to_string(),
            ipv4: vec!["203.0.113.7".to_string()],
        };
        instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: i64) -> Result<CloudInstance, LinodeError> {
        self.instances
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(LinodeError::Api {
                status: 404,
                message: "Not found".into(),
            })
    }

    async fn get_instance_by_label(
        &self,
        label: &str,
    ) -> Result<Option<CloudInstance>, LinodeError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .find(|i| i.label == label)
            .cloned())
    }

    async fn list_instances(
        &self,
        label_prefix: Option<&str>,
    ) -> Result<Vec<CloudInstance>, LinodeError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| label_prefix.map_or(true, |p| i.label.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn delete_instance(&self, id: i64) -> Result<bool, LinodeError> {
        Ok(self.instances.lock().unwrap().remove(&id).is_some())
    }

    async fn wait_for_running(
        &self,
        id: i64,
        _timeout: Duration,
        _poll: Duration,
    ) -> Result<Option<String>, LinodeError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|i| i.ipv4.first().cloned()))
    }

    async fn delete_all_instances(&self, label_prefix: &str) -> Result<u32, LinodeError> {
        let mut instances = self.instances.lock().unwrap();
        let ids: Vec<i64> = instances
            .values()
            .filter(|i| i.label.starts_with(label_prefix))
            .map(|i| i.id)
            .collect();
        for id in &ids {
            instances.remove(id);
        }
        Ok(ids.len() as u32)
    }
}
