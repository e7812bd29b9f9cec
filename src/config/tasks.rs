//! Task file model: OpenList sources and the sync tasks that mirror them.
//!
//! ```yaml
//! openlist:
//!   - id: home
//!     baseUrl: http://nas:5244
//!     token: openlist-xxxxxxxx
//! tasks:
//!   - id: movies
//!     openlistId: home
//!     remotePath: /115/Movies
//!     localPath: /media/strm/movies
//!     cron: "0 0 */6 * * *"
//!     needScrap: true
//!     isIncrement: true
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Connection settings for one OpenList-compatible server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenListConfig {
    pub id: String,
    pub base_url: String,
    /// Static API token. Takes precedence over username/password.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Append `?sign=` to direct-access URLs when the server provides one
    #[serde(default = "default_true")]
    pub sign_links: bool,
    /// Requests per second allowed against this server
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl OpenListConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Emby/Jellyfin library refresh target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbyConfig {
    pub url: String,
    pub api_key: String,
}

/// One scheduled synchronization job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub openlist_id: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    /// Regex applied once to each filename before naming
    #[serde(default)]
    pub rename_regex: Option<String>,
    #[serde(default)]
    pub rename_replacement: Option<String>,
    /// Six-field cron expression (seconds first). Tasks without one only run on demand.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub need_scrap: bool,
    #[serde(default)]
    pub is_increment: bool,
    /// Seed for the first run. The state file takes over once a run completes.
    #[serde(default)]
    pub last_exec_time: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub enable_openlist_refresh: bool,
    #[serde(default)]
    pub enable_emby_refresh: bool,
    #[serde(default)]
    pub emby: Option<EmbyConfig>,
}

impl TaskConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Compile the rename regex, if one is configured
    pub fn rename_rule(&self) -> Result<Option<(Regex, String)>> {
        match self.rename_regex.as_deref() {
            Some(pattern) if !pattern.is_empty() => {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("Invalid rename regex for task {}", self.id))?;
                let replacement = self.rename_replacement.clone().unwrap_or_default();
                Ok(Some((regex, replacement)))
            }
            _ => Ok(None),
        }
    }
}

/// Top-level task file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default)]
    pub openlist: Vec<OpenListConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl TaskFile {
    /// Read and validate a task file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?;
        let file = Self::parse(&raw)
            .with_context(|| format!("Invalid task file {}", path.display()))?;
        Ok(file)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: TaskFile = serde_yaml::from_str(raw).context("Failed to parse task YAML")?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<()> {
        let mut source_ids = HashSet::new();
        for source in &self.openlist {
            if !source_ids.insert(source.id.as_str()) {
                bail!("Duplicate openlist id: {}", source.id);
            }
            url::Url::parse(&source.base_url)
                .with_context(|| format!("Invalid baseUrl for openlist {}", source.id))?;
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                bail!("Duplicate task id: {}", task.id);
            }
            if !source_ids.contains(task.openlist_id.as_str()) {
                bail!(
                    "Task {} references unknown openlist {}",
                    task.id,
                    task.openlist_id
                );
            }
            if !task.remote_path.starts_with('/') {
                bail!("Task {} remotePath must be absolute", task.id);
            }
            task.rename_rule()?;
            if task.enable_emby_refresh && task.emby.is_none() {
                bail!("Task {} enables Emby refresh without an emby block", task.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
openlist:
  - id: home
    baseUrl: http://nas:5244/
    token: abc
tasks:
  - id: movies
    openlistId: home
    remotePath: /115/Movies
    localPath: /media/strm/movies
    cron: "0 0 */6 * * *"
    needScrap: true
    isIncrement: true
    renameRegex: '^\[[^\]]+\]\s*'
"#;

    #[test]
    fn test_parse_sample() {
        let file = TaskFile::parse(SAMPLE).unwrap();
        assert_eq!(file.openlist[0].base_url(), "http://nas:5244");
        assert!(file.openlist[0].sign_links);

        let task = &file.tasks[0];
        assert!(task.need_scrap);
        assert!(task.is_increment);
        assert!(task.is_active);
        assert!(!task.enable_emby_refresh);
        assert_eq!(task.last_exec_time, 0);
        assert!(task.rename_rule().unwrap().is_some());
    }

    #[test]
    fn test_unknown_source_rejected() {
        let raw = SAMPLE.replace("openlistId: home", "openlistId: office");
        assert!(TaskFile::parse(&raw).is_err());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let raw = SAMPLE.replace(r"'^\[[^\]]+\]\s*'", "'(unclosed'");
        assert!(TaskFile::parse(&raw).is_err());
    }

    #[test]
    fn test_emby_refresh_requires_target() {
        let raw = SAMPLE.replace("isIncrement: true", "isIncrement: true\n    enableEmbyRefresh: true");
        assert!(TaskFile::parse(&raw).is_err());
    }
}
