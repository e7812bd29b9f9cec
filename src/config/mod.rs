//! Application configuration management

mod tasks;

pub use tasks::{EmbyConfig, OpenListConfig, TaskConfig, TaskFile};

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Which name-extraction collaborator backs tasks with `needScrap` enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// Offline rule-based parser
    Rules,
    /// Local LLM via Ollama
    Ollama,
}

impl ExtractorKind {
    pub fn from_arg(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rules" | "rule" => Some(Self::Rules),
            "ollama" | "llm" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// YAML file describing OpenList sources and sync tasks
    pub tasks_file: PathBuf,

    /// JSON file holding per-task run state (last execution time, last report)
    pub state_file: PathBuf,

    /// Maximum files processed concurrently within one run
    pub workers: usize,

    /// Request timeout for remote listing and refresh calls
    pub http_timeout: Duration,

    /// Attempts per remote/extraction call before giving up
    pub retry_max_attempts: u32,

    /// First backoff interval between attempts
    pub retry_initial_interval: Duration,

    pub extractor: ExtractorKind,

    /// Ollama server URL
    pub ollama_url: String,

    /// Ollama model used for filename extraction
    pub ollama_model: String,

    /// Timeout for a single extraction call
    pub extraction_timeout: Duration,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let extractor = match env::var("STRM_EXTRACTOR") {
            Ok(value) => ExtractorKind::from_arg(&value)
                .with_context(|| format!("Invalid STRM_EXTRACTOR: {value}"))?,
            Err(_) => ExtractorKind::Rules,
        };

        Ok(Self {
            tasks_file: env::var("STRM_TASKS_FILE")
                .unwrap_or_else(|_| "./data/tasks.yaml".to_string())
                .into(),

            state_file: env::var("STRM_STATE_FILE")
                .unwrap_or_else(|_| "./data/state.json".to_string())
                .into(),

            workers: env::var("STRM_WORKERS")
                .unwrap_or_else(|_| "8".to_string())
                .parse::<usize>()
                .context("Invalid STRM_WORKERS")?
                .max(1),

            http_timeout: Duration::from_secs(
                env::var("STRM_HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid STRM_HTTP_TIMEOUT_SECS")?,
            ),

            retry_max_attempts: env::var("STRM_RETRY_MAX")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid STRM_RETRY_MAX")?,

            retry_initial_interval: Duration::from_millis(
                env::var("STRM_RETRY_INITIAL_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("Invalid STRM_RETRY_INITIAL_MS")?,
            ),

            extractor,

            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),

            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "qwen2.5:7b".to_string()),

            extraction_timeout: Duration::from_secs(
                env::var("OLLAMA_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),

            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_kind_from_arg() {
        assert_eq!(ExtractorKind::from_arg("rules"), Some(ExtractorKind::Rules));
        assert_eq!(ExtractorKind::from_arg("Ollama"), Some(ExtractorKind::Ollama));
        assert_eq!(ExtractorKind::from_arg("llm"), Some(ExtractorKind::Ollama));
        assert_eq!(ExtractorKind::from_arg("tmdb"), None);
    }
}
