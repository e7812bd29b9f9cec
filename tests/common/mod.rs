//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use strm_sync::config::{OpenListConfig, TaskConfig};
use strm_sync::services::{MediaServer, RemoteFile, RemoteSource};
use strm_sync::{Result, SyncError};

pub const BASE_URL: &str = "http://nas:5244";

/// Remote tree served from memory
#[derive(Default)]
pub struct FakeRemote {
    dirs: Mutex<HashMap<String, Vec<RemoteFile>>>,
    failing: Mutex<HashMap<String, fn(String) -> SyncError>>,
    pub list_calls: AtomicUsize,
    pub refreshed: Mutex<Vec<String>>,
    pub fail_refresh: Mutex<bool>,
    /// When set, every listing waits for a permit
    gate: Option<Arc<Semaphore>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote whose listings block until [`FakeRemote::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    /// Add a file (and any missing parent directories) with `modified_at` millis
    pub fn add_file(&self, path: &str, size: u64, modified_at: i64) {
        let (dir, name) = path.rsplit_once('/').expect("absolute path");
        self.ensure_dir(dir);
        self.dirs.lock().entry(dir.to_string()).or_default().push(RemoteFile {
            name: name.to_string(),
            path: path.to_string(),
            size,
            is_dir: false,
            modified_at: Some(modified_at),
            raw_url: format!("{BASE_URL}/d{}", path.replace(' ', "%20")),
        });
    }

    pub fn ensure_dir(&self, dir: &str) {
        let mut dirs = self.dirs.lock();
        if dirs.contains_key(dir) {
            return;
        }
        dirs.insert(dir.to_string(), Vec::new());
        drop(dirs);

        if let Some((parent, name)) = dir.rsplit_once('/') {
            if parent.is_empty() {
                return;
            }
            self.ensure_dir(parent);
            self.dirs.lock().entry(parent.to_string()).or_default().push(RemoteFile {
                name: name.to_string(),
                path: dir.to_string(),
                size: 0,
                is_dir: true,
                modified_at: None,
                raw_url: String::new(),
            });
        }
    }

    /// Add a file the server reports without a usable modification time
    pub fn add_file_without_mtime(&self, path: &str, size: u64) {
        self.add_file(path, size, 0);
        let (dir, _) = path.rsplit_once('/').expect("absolute path");
        if let Some(file) = self
            .dirs
            .lock()
            .get_mut(dir)
            .and_then(|entries| entries.iter_mut().find(|e| e.path == path))
        {
            file.modified_at = None;
        }
    }

    pub fn fail_listing(&self, dir: &str, error: fn(String) -> SyncError) {
        self.failing.lock().insert(dir.to_string(), error);
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failing.lock().get(path) {
            return Err(error(path.to_string()));
        }
        self.dirs
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::RemoteNotFound(path.to_string()))
    }

    async fn fetch(&self, file: &RemoteFile) -> Result<Vec<u8>> {
        Ok(format!("content of {}", file.name).into_bytes())
    }

    async fn refresh(&self, path: &str) -> Result<()> {
        if *self.fail_refresh.lock() {
            return Err(SyncError::RemoteUnavailable("refresh rejected".into()));
        }
        self.refreshed.lock().push(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMediaServer {
    pub refreshed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    fn name(&self) -> &'static str {
        "fake-emby"
    }

    async fn refresh_library(&self, path: &Path) -> Result<()> {
        self.refreshed.lock().push(path.to_path_buf());
        Ok(())
    }
}

pub fn source_config() -> OpenListConfig {
    serde_json::from_value(json!({ "id": "home", "baseUrl": BASE_URL })).unwrap()
}

/// Task mirroring `/media` into `local`, with field overrides
pub fn task(local: &Path, overrides: serde_json::Value) -> TaskConfig {
    let mut value = json!({
        "id": "movies",
        "openlistId": "home",
        "remotePath": "/media",
        "localPath": local,
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), overrides.as_object()) {
        for (key, field) in extra {
            base.insert(key.clone(), field.clone());
        }
    }
    serde_json::from_value(value).unwrap()
}

/// Every regular file below `root`, relative path -> content
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    fn visit(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                visit(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(relative, std::fs::read_to_string(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    if root.exists() {
        visit(root, root, &mut out);
    }
    out
}

/// Relative paths of every file below `root`
pub fn tree_paths(root: &Path) -> HashSet<String> {
    read_tree(root).into_keys().collect()
}
