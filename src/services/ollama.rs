//! Ollama API client for LLM-based filename extraction
//!
//! Sends the filename (and parent directory hint) with a prompt that pins
//! the JSON contract, asks Ollama for JSON-mode output and decodes the
//! answer with the shared contract parser.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::extraction::{NameExtractionResult, NameExtractor, parse_response};
use crate::error::{Result, SyncError};

/// Configuration for the Ollama service
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_template: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_seconds: 30,
            temperature: 0.0,
            max_tokens: 256,
            prompt_template: DEFAULT_PROMPT.to_string(),
        }
    }
}

const DEFAULT_PROMPT: &str = r#"You extract media metadata from a filename.
Answer with ONE JSON object and nothing else.

On success:
{"success": true, "title": string, "year": "YYYY" (movies, optional), "season": int (tv), "episode": int (tv), "type": "movie" | "tv"}
On failure:
{"success": false, "reason": string, "type": "movie" | "tv" | "unknown"}

Rules:
- title is the clean work title: no dots, underscores, resolution, source, codec or release group.
- type is "tv" when a season/episode marker such as S01E02 is present, otherwise "movie".
- tv without a show title fails with reason "缺少剧名信息".
- files that are not videos fail with reason "非视频文件" and type "unknown".
- The parent directory may name the show or movie when the filename does not.

Examples:
盗梦空间.2010.1080p.BluRay.x264.mkv -> {"success":true,"title":"盗梦空间","year":"2010","type":"movie"}
Breaking Bad S05E14 Ozymandias 1080p.mkv -> {"success":true,"title":"Breaking Bad","season":5,"episode":14,"type":"tv"}
S01E05.mkv -> {"success":false,"reason":"缺少剧名信息","type":"tv"}
random_file.txt -> {"success":false,"reason":"非视频文件","type":"unknown"}

Parent directory: {parent}
Filename: {filename}"#;

/// Request body for Ollama generate API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response from Ollama generate API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    eval_count: u32,
}

/// Name extractor backed by a local Ollama model
pub struct OllamaExtractor {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaExtractor {
    /// Create a new OllamaExtractor with the given configuration
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SyncError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn render_prompt(&self, filename: &str, parent_hint: Option<&str>) -> String {
        self.config
            .prompt_template
            .replace("{parent}", parent_hint.unwrap_or("(none)"))
            .replace("{filename}", filename)
    }
}

#[async_trait]
impl NameExtractor for OllamaExtractor {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn extract(
        &self,
        filename: &str,
        parent_hint: Option<&str>,
    ) -> Result<NameExtractionResult> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: self.render_prompt(filename, parent_hint),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.url.trim_end_matches('/'));

        debug!("Sending request to Ollama for filename: {}", filename);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::ExtractionTimeout(Duration::from_secs(self.config.timeout_seconds))
                } else {
                    SyncError::ExtractionUnavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::ExtractionUnavailable(format!(
                "Ollama API error: {status} - {body}"
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| SyncError::ExtractionMalformed(e.to_string()))?;

        let duration_ms = ollama_response.total_duration / 1_000_000;
        info!(
            "LLM parsed '{}' in {}ms ({} tokens)",
            filename, duration_ms, ollama_response.eval_count
        );

        parse_response(&ollama_response.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OllamaConfig::default();
        assert_eq!(config.url, "http://localhost:11434");
        assert!(config.prompt_template.contains("{filename}"));
        assert!(config.prompt_template.contains("{parent}"));
    }

    #[test]
    fn test_render_prompt() {
        let extractor = OllamaExtractor::new(OllamaConfig::default()).unwrap();
        let prompt = extractor.render_prompt("S01E05.mkv", Some("Breaking Bad"));
        assert!(prompt.ends_with("Parent directory: Breaking Bad\nFilename: S01E05.mkv"));

        let prompt = extractor.render_prompt("a.mkv", None);
        assert!(prompt.contains("Parent directory: (none)"));
    }
}
