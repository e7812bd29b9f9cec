//! Post-run refresh notifications
//!
//! After a run that produced output, the remote source and the media
//! server can each be asked to rescan. Both are best-effort: a failure is
//! logged and reported but never changes the run outcome.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::openlist::RemoteSource;
use crate::config::{EmbyConfig, TaskConfig};
use crate::error::{Result, SyncError};

/// A media library that can be told to rescan a directory
#[async_trait]
pub trait MediaServer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn refresh_library(&self, path: &Path) -> Result<()>;
}

/// Emby/Jellyfin library refresh client
pub struct EmbyClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl EmbyClient {
    pub fn new(config: &EmbyConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl MediaServer for EmbyClient {
    fn name(&self) -> &'static str {
        "emby"
    }

    async fn refresh_library(&self, path: &Path) -> Result<()> {
        let url = format!("{}/Library/Media/Updated", self.base_url);
        let body = json!({
            "Updates": [{ "Path": path.to_string_lossy(), "UpdateType": "Modified" }]
        });

        let resp = self
            .client
            .post(&url)
            .header("X-Emby-Token", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::refresh("emby", e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::refresh("emby", format!("{status}: {text}")));
        }
        Ok(())
    }
}

/// Result of one refresh target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RefreshStatus {
    /// Not enabled for this task
    #[default]
    Disabled,
    /// Enabled, but the run produced nothing or did not complete
    Skipped,
    Refreshed,
    Failed { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub openlist: RefreshStatus,
    pub emby: RefreshStatus,
}

/// Fires the refreshes a task asked for
pub struct RefreshNotifier {
    source: Arc<dyn RemoteSource>,
    media_server: Option<Arc<dyn MediaServer>>,
}

impl RefreshNotifier {
    pub fn new(source: Arc<dyn RemoteSource>, media_server: Option<Arc<dyn MediaServer>>) -> Self {
        Self {
            source,
            media_server,
        }
    }

    /// Report for a run that will not refresh anything
    pub fn skipped(task: &TaskConfig) -> RefreshReport {
        RefreshReport {
            openlist: Self::gate(task.enable_openlist_refresh),
            emby: Self::gate(task.enable_emby_refresh),
        }
    }

    fn gate(enabled: bool) -> RefreshStatus {
        if enabled {
            RefreshStatus::Skipped
        } else {
            RefreshStatus::Disabled
        }
    }

    /// Refresh after a completed run. Nothing is sent when no file was
    /// processed. Targets are independent of each other.
    pub async fn notify(&self, task: &TaskConfig, processed: u64) -> RefreshReport {
        if processed == 0 {
            return Self::skipped(task);
        }

        let openlist = async {
            if !task.enable_openlist_refresh {
                return RefreshStatus::Disabled;
            }
            match self.source.refresh(&task.remote_path).await {
                Ok(()) => {
                    info!(task_id = %task.id, path = %task.remote_path, "Refreshed OpenList directory");
                    RefreshStatus::Refreshed
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "OpenList refresh failed");
                    RefreshStatus::Failed {
                        message: e.to_string(),
                    }
                }
            }
        };

        let emby = async {
            if !task.enable_emby_refresh {
                return RefreshStatus::Disabled;
            }
            let Some(server) = &self.media_server else {
                warn!(task_id = %task.id, "Emby refresh enabled without a configured server");
                return RefreshStatus::Failed {
                    message: "no media server configured".into(),
                };
            };
            match server.refresh_library(&task.local_path).await {
                Ok(()) => {
                    info!(task_id = %task.id, server = server.name(), "Requested library refresh");
                    RefreshStatus::Refreshed
                }
                Err(e) => {
                    warn!(task_id = %task.id, server = server.name(), error = %e, "Library refresh failed");
                    RefreshStatus::Failed {
                        message: e.to_string(),
                    }
                }
            }
        };

        let (openlist, emby) = tokio::join!(openlist, emby);
        RefreshReport { openlist, emby }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::openlist::RemoteFile;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingSource {
        refreshed: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteSource for RecordingSource {
        async fn list(&self, _: &str) -> Result<Vec<RemoteFile>> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _: &RemoteFile) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn refresh(&self, path: &str) -> Result<()> {
            if self.fail {
                return Err(SyncError::RemoteUnavailable("down".into()));
            }
            self.refreshed.lock().push(path.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingServer {
        refreshed: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl MediaServer for RecordingServer {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn refresh_library(&self, path: &Path) -> Result<()> {
            self.refreshed.lock().push(path.to_path_buf());
            Ok(())
        }
    }

    fn task(openlist: bool, emby: bool) -> TaskConfig {
        serde_json::from_value(json!({
            "id": "movies",
            "openlistId": "home",
            "remotePath": "/Movies",
            "localPath": "/strm/movies",
            "enableOpenlistRefresh": openlist,
            "enableEmbyRefresh": emby,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_nothing_sent_without_processed_files() {
        let source = Arc::new(RecordingSource::default());
        let notifier = RefreshNotifier::new(source.clone(), None);

        let report = notifier.notify(&task(true, false), 0).await;
        assert_eq!(report.openlist, RefreshStatus::Skipped);
        assert_eq!(report.emby, RefreshStatus::Disabled);
        assert!(source.refreshed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        let source = Arc::new(RecordingSource {
            fail: true,
            ..Default::default()
        });
        let server = Arc::new(RecordingServer::default());
        let notifier = RefreshNotifier::new(source, Some(server.clone()));

        let report = notifier.notify(&task(true, true), 3).await;
        assert!(matches!(report.openlist, RefreshStatus::Failed { .. }));
        assert_eq!(report.emby, RefreshStatus::Refreshed);
        assert_eq!(*server.refreshed.lock(), vec![PathBuf::from("/strm/movies")]);
    }

    #[tokio::test]
    async fn test_openlist_refresh_uses_remote_path() {
        let source = Arc::new(RecordingSource::default());
        let notifier = RefreshNotifier::new(source.clone(), None);

        let report = notifier.notify(&task(true, false), 1).await;
        assert_eq!(report.openlist, RefreshStatus::Refreshed);
        assert_eq!(*source.refreshed.lock(), vec!["/Movies".to_string()]);
    }
}
