//! OpenList API client and remote tree traversal
//!
//! Lists directories through `POST /api/fs/list`, builds direct-access
//! (`/d/...`) URLs for files and walks a remote tree lazily, one directory
//! request per poll, so huge trees never sit in memory at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::rate_limiter::{DirectLimiter, RateLimitConfig, RetryConfig, retry_async};
use crate::config::OpenListConfig;
use crate::error::{Result, SyncError};

/// Immutable snapshot of one remote entry.
///
/// `raw_url` is only valid while the remote session/sign is valid and must
/// not be persisted beyond the pointer files it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    /// Absolute remote path
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    /// Modification time, epoch millis. `None` when the server reported no
    /// usable time; such entries always count as changed.
    pub modified_at: Option<i64>,
    /// Direct-access URL (empty for directories)
    pub raw_url: String,
}

/// One directory's entries, in server order
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    pub path: String,
    pub entries: Vec<RemoteFile>,
}

/// The remote file-listing capability a sync run depends on
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List the direct children of `path`
    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>>;

    /// Download a (small) file's content, used for companion files
    async fn fetch(&self, file: &RemoteFile) -> Result<Vec<u8>>;

    /// Ask the server to re-index `path`
    async fn refresh(&self, path: &str) -> Result<()>;
}

/// Join a remote directory and an entry name
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Path of `path` below `root`, without a leading slash
pub fn relative_to<'a>(root: &str, path: &'a str) -> &'a str {
    let root = root.trim_end_matches('/');
    path.strip_prefix(root)
        .unwrap_or(path)
        .trim_start_matches('/')
}

/// Lazily walk the tree below `root`, breadth-first.
///
/// Each listing call is retried per `retry`. A subdirectory that vanished
/// between being listed and being entered is skipped; any other failure is
/// yielded as an error and ends the walk.
pub fn walk(
    source: Arc<dyn RemoteSource>,
    root: String,
    retry: RetryConfig,
) -> BoxStream<'static, Result<DirectoryListing>> {
    struct WalkState {
        source: Arc<dyn RemoteSource>,
        root: String,
        retry: RetryConfig,
        pending: VecDeque<String>,
    }

    let state = WalkState {
        source,
        pending: VecDeque::from([root.clone()]),
        root,
        retry,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let dir = state.pending.pop_front()?;
            let listed = retry_async(|| state.source.list(&dir), &state.retry, "openlist.list").await;

            match listed {
                Ok(entries) => {
                    state.pending.extend(
                        entries
                            .iter()
                            .filter(|entry| entry.is_dir)
                            .map(|entry| entry.path.clone()),
                    );
                    let listing = DirectoryListing { path: dir, entries };
                    return Some((Ok(listing), state));
                }
                Err(SyncError::RemoteNotFound(path)) if dir != state.root => {
                    warn!(path = %path, "Directory disappeared during traversal, skipping");
                }
                Err(e) => {
                    state.pending.clear();
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}

// =========================================================================
// OpenList HTTP client
// =========================================================================

#[derive(Debug, Serialize)]
struct FsListRequest<'a> {
    path: &'a str,
    password: &'a str,
    page: u32,
    per_page: u32,
    refresh: bool,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Response envelope shared by every OpenList endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FsListData {
    content: Option<Vec<FsObject>>,
}

#[derive(Debug, Deserialize)]
struct FsObject {
    name: String,
    #[serde(default)]
    size: i64,
    is_dir: bool,
    #[serde(default)]
    modified: String,
    #[serde(default)]
    sign: String,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// Map an OpenList envelope code to the error taxonomy
fn check_envelope(code: i64, message: &str, path: &str) -> Result<()> {
    match code {
        200 => Ok(()),
        401 | 403 => Err(SyncError::RemoteAuth(format!("{path}: {message}"))),
        404 => Err(SyncError::RemoteNotFound(path.to_string())),
        _ if message.to_lowercase().contains("not found") => {
            Err(SyncError::RemoteNotFound(path.to_string()))
        }
        _ => Err(SyncError::RemoteUnavailable(format!(
            "{path}: code {code}: {message}"
        ))),
    }
}

fn transport_error(context: &str, e: reqwest::Error) -> SyncError {
    SyncError::RemoteUnavailable(format!("{context}: {e}"))
}

/// Client for one OpenList server
pub struct OpenListClient {
    client: reqwest::Client,
    config: OpenListConfig,
    limiter: DirectLimiter,
    token: OnceCell<String>,
}

impl OpenListClient {
    pub fn new(config: OpenListConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::config(format!("failed to create HTTP client: {e}")))?;

        let limiter = RateLimitConfig {
            requests_per_second: config.requests_per_second.unwrap_or(5),
            ..RateLimitConfig::default()
        }
        .build();

        Ok(Self {
            client,
            config,
            limiter,
            token: OnceCell::new(),
        })
    }

    /// Direct-access URL for a file: `{base}/d{encoded path}[?sign=...]`
    pub fn direct_url(&self, path: &str, sign: &str) -> String {
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let mut url = format!("{}/d{}", self.config.base_url(), encoded);
        if self.config.sign_links && !sign.is_empty() {
            url.push_str("?sign=");
            url.push_str(&urlencoding::encode(sign));
        }
        url
    }

    fn to_remote_file(&self, dir: &str, object: FsObject) -> RemoteFile {
        let path = join_remote(dir, &object.name);
        let modified_at = match chrono::DateTime::parse_from_rfc3339(&object.modified) {
            // OpenList reports the zero time `0001-01-01T00:00:00Z` for unknown values
            Ok(time) if time.timestamp_millis() > 0 => Some(time.timestamp_millis()),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %path, modified = %object.modified, error = %e, "Unparseable modification time");
                None
            }
        };
        let raw_url = if object.is_dir {
            String::new()
        } else {
            self.direct_url(&path, &object.sign)
        };
        RemoteFile {
            name: object.name,
            path,
            size: object.size.max(0) as u64,
            is_dir: object.is_dir,
            modified_at,
            raw_url,
        }
    }

    /// Static token, or one obtained through `/api/auth/login` and cached
    async fn token(&self) -> Result<&str> {
        if let Some(token) = self.config.token.as_deref() {
            return Ok(token);
        }
        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_deref())
        else {
            return Ok("");
        };

        let token = self
            .token
            .get_or_try_init(|| async {
                let url = format!("{}/api/auth/login", self.config.base_url());
                let response = self
                    .client
                    .post(&url)
                    .json(&LoginRequest { username, password })
                    .send()
                    .await
                    .map_err(|e| transport_error("login", e))?;
                let envelope: ApiResponse<LoginData> = response
                    .json()
                    .await
                    .map_err(|e| transport_error("login response", e))?;
                check_envelope(envelope.code, &envelope.message, "/api/auth/login")?;
                info!(openlist = %self.config.id, "Logged in to OpenList");
                envelope
                    .data
                    .map(|d| d.token)
                    .ok_or_else(|| SyncError::RemoteAuth("login returned no token".into()))
            })
            .await?;
        Ok(token.as_str())
    }

    async fn fs_list(&self, path: &str, refresh: bool) -> Result<Vec<FsObject>> {
        self.limiter.until_ready().await;
        let token = self.token().await?;
        let url = format!("{}/api/fs/list", self.config.base_url());

        debug!(openlist = %self.config.id, path = %path, refresh, "Listing remote directory");

        let response = self
            .client
            .post(&url)
            .header("Authorization", token)
            .json(&FsListRequest {
                path,
                password: "",
                page: 1,
                per_page: 0,
                refresh,
            })
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::RemoteAuth(format!("{path}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SyncError::RemoteUnavailable(format!("{path}: HTTP {status}")));
        }

        let envelope: ApiResponse<FsListData> = response
            .json()
            .await
            .map_err(|e| transport_error(path, e))?;
        check_envelope(envelope.code, &envelope.message, path)?;

        Ok(envelope.data.and_then(|d| d.content).unwrap_or_default())
    }
}

#[async_trait]
impl RemoteSource for OpenListClient {
    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>> {
        let objects = self.fs_list(path, false).await?;
        Ok(objects
            .into_iter()
            .map(|object| self.to_remote_file(path, object))
            .collect())
    }

    async fn fetch(&self, file: &RemoteFile) -> Result<Vec<u8>> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(&file.raw_url)
            .send()
            .await
            .map_err(|e| transport_error(&file.path, e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SyncError::RemoteNotFound(file.path.clone()));
        }
        if !status.is_success() {
            return Err(SyncError::RemoteUnavailable(format!(
                "{}: HTTP {status}",
                file.path
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&file.path, e))?;
        Ok(bytes.to_vec())
    }

    async fn refresh(&self, path: &str) -> Result<()> {
        self.fs_list(path, true).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(sign_links: bool) -> OpenListClient {
        OpenListClient::new(
            OpenListConfig {
                id: "home".into(),
                base_url: "http://nas:5244/".into(),
                token: Some("t".into()),
                username: None,
                password: None,
                sign_links,
                requests_per_second: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_join_and_relative() {
        assert_eq!(join_remote("/", "a"), "/a");
        assert_eq!(join_remote("/movies", "a.mkv"), "/movies/a.mkv");
        assert_eq!(relative_to("/movies", "/movies/x/a.mkv"), "x/a.mkv");
        assert_eq!(relative_to("/movies/", "/movies/a.mkv"), "a.mkv");
        assert_eq!(relative_to("/", "/a.mkv"), "a.mkv");
    }

    #[test]
    fn test_direct_url_encodes_segments() {
        let client = client(true);
        assert_eq!(
            client.direct_url("/电影/盗梦空间 2010.mkv", "abc=:0"),
            "http://nas:5244/d/%E7%94%B5%E5%BD%B1/%E7%9B%97%E6%A2%A6%E7%A9%BA%E9%97%B4%202010.mkv?sign=abc%3D%3A0"
        );
        assert_eq!(client.direct_url("/a b.mkv", ""), "http://nas:5244/d/a%20b.mkv");
    }

    #[test]
    fn test_direct_url_without_sign() {
        let client = client(false);
        assert_eq!(client.direct_url("/a.mkv", "sig"), "http://nas:5244/d/a.mkv");
    }

    #[test]
    fn test_to_remote_file() {
        let client = client(true);
        let object: FsObject = serde_json::from_str(
            r#"{"name":"a.mkv","size":42,"is_dir":false,"modified":"2024-05-01T10:00:00+08:00","sign":"s"}"#,
        )
        .unwrap();
        let file = client.to_remote_file("/movies", object);
        assert_eq!(file.path, "/movies/a.mkv");
        assert_eq!(file.size, 42);
        assert_eq!(file.modified_at, Some(1_714_528_800_000));
        assert_eq!(file.raw_url, "http://nas:5244/d/movies/a.mkv?sign=s");
    }

    #[test]
    fn test_to_remote_file_without_usable_mtime() {
        let client = client(true);
        for modified in ["", "yesterday", "0001-01-01T00:00:00Z"] {
            let object = FsObject {
                name: "a.mkv".into(),
                size: 1,
                is_dir: false,
                modified: modified.into(),
                sign: String::new(),
            };
            assert_eq!(client.to_remote_file("/movies", object).modified_at, None, "{modified:?}");
        }
    }

    #[test]
    fn test_check_envelope() {
        assert!(check_envelope(200, "success", "/a").is_ok());
        assert!(matches!(
            check_envelope(401, "token is expired", "/a"),
            Err(SyncError::RemoteAuth(_))
        ));
        assert!(matches!(
            check_envelope(500, "failed get storage: storage not found", "/a"),
            Err(SyncError::RemoteNotFound(_))
        ));
        assert!(matches!(
            check_envelope(500, "object not found", "/a"),
            Err(SyncError::RemoteNotFound(_))
        ));
        assert!(matches!(
            check_envelope(500, "driver timeout", "/a"),
            Err(SyncError::RemoteUnavailable(_))
        ));
    }
}
