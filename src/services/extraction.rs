//! Filename-to-metadata extraction contract
//!
//! Extractors (rule-based or LLM-backed) answer with exactly one JSON
//! object, in either the current shape:
//!
//! ```json
//! {"success": true, "title": "盗梦空间", "year": "2010", "type": "movie"}
//! ```
//!
//! or the legacy shape, where the name is pre-formatted:
//!
//! ```json
//! {"success": true, "filename": "盗梦空间 (2010)", "type": "movie"}
//! ```
//!
//! Both decode into [`NameExtractionResult`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SyncError};

/// Reason recorded when an extractor's output cannot be decoded
pub const REASON_MALFORMED: &str = "extraction-malformed";
/// Reason recorded when an extractor does not answer in time
pub const REASON_TIMEOUT: &str = "extraction-timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
    #[default]
    Unknown,
}

/// Structured extraction outcome. Absent fields mean "not applicable".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameExtractionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NameExtractionResult {
    pub fn movie(title: impl Into<String>, year: Option<String>) -> Self {
        Self {
            success: true,
            title: Some(title.into()),
            year,
            season: None,
            episode: None,
            kind: MediaKind::Movie,
            reason: None,
        }
    }

    pub fn tv(title: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            success: true,
            title: Some(title.into()),
            year: None,
            season: Some(season),
            episode: Some(episode),
            kind: MediaKind::Tv,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            success: false,
            title: None,
            year: None,
            season: None,
            episode: None,
            kind,
            reason: Some(reason.into()),
        }
    }

    /// A tv result without both season and episode cannot be placed in a season folder
    pub fn is_placeable(&self) -> bool {
        match self.kind {
            MediaKind::Tv => self.season.is_some() && self.episode.is_some(),
            _ => true,
        }
    }
}

/// A service that turns a filename into [`NameExtractionResult`]
#[async_trait]
pub trait NameExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `parent_hint` is the name of the directory holding the file, when known
    async fn extract(&self, filename: &str, parent_hint: Option<&str>)
    -> Result<NameExtractionResult>;
}

/// Year as returned by extractors: `"2010"` or, from sloppier models, `2010`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YearValue {
    Text(String),
    Number(u32),
}

/// Union of the current and legacy response shapes
#[derive(Debug, Deserialize)]
struct RawExtraction {
    success: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    year: Option<YearValue>,
    #[serde(default)]
    season: Option<u32>,
    #[serde(default)]
    episode: Option<u32>,
    #[serde(rename = "type", default)]
    kind: MediaKind,
    #[serde(default)]
    reason: Option<String>,
}

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(19|20)\d{2}$").expect("valid regex"));

static LEGACY_TV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<title>.+?)[\s.\-]*S(?P<season>\d{1,3})E(?P<episode>\d{1,4})\b")
        .expect("valid regex")
});

static LEGACY_MOVIE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<title>.+?)\s*[(\[](?P<year>(?:19|20)\d{2})[)\]]\s*$").expect("valid regex")
});

fn normalize_year(year: Option<YearValue>) -> Option<String> {
    let year = match year? {
        YearValue::Text(text) => text.trim().to_string(),
        YearValue::Number(n) => n.to_string(),
    };
    YEAR_RE.is_match(&year).then_some(year)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Decompose a legacy pre-formatted `filename` into title/year/season/episode
fn from_legacy(filename: &str, kind: MediaKind) -> NameExtractionResult {
    let filename = filename.trim();
    match kind {
        MediaKind::Tv => {
            if let Some(caps) = LEGACY_TV_RE.captures(filename) {
                let season = caps["season"].parse().ok().filter(|n| *n > 0);
                let episode = caps["episode"].parse().ok().filter(|n| *n > 0);
                return NameExtractionResult {
                    success: true,
                    title: Some(caps["title"].trim().to_string()),
                    year: None,
                    season,
                    episode,
                    kind,
                    reason: None,
                };
            }
            NameExtractionResult {
                success: true,
                title: Some(filename.to_string()),
                year: None,
                season: None,
                episode: None,
                kind,
                reason: None,
            }
        }
        _ => {
            if let Some(caps) = LEGACY_MOVIE_RE.captures(filename) {
                let mut result =
                    NameExtractionResult::movie(caps["title"].trim(), Some(caps["year"].to_string()));
                result.kind = kind;
                return result;
            }
            let mut result = NameExtractionResult::movie(filename, None);
            result.kind = kind;
            result
        }
    }
}

/// Pull the JSON object out of a response that may be wrapped in prose or
/// markdown code fences
pub fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// Decode an extractor response in either shape
pub fn parse_response(response: &str) -> Result<NameExtractionResult> {
    let json = extract_json(response).ok_or_else(|| {
        warn!(response = %response, "No JSON object in extraction response");
        SyncError::ExtractionMalformed("no JSON object".into())
    })?;

    let raw: RawExtraction =
        serde_json::from_str(json).map_err(|e| SyncError::ExtractionMalformed(e.to_string()))?;

    if !raw.success {
        let reason = non_empty(raw.reason).unwrap_or_else(|| "unspecified".to_string());
        return Ok(NameExtractionResult::failure(reason, raw.kind));
    }

    if let Some(title) = non_empty(raw.title) {
        let positive = |n: Option<u32>| n.filter(|n| *n > 0);
        let (season, episode) = match raw.kind {
            MediaKind::Tv => (positive(raw.season), positive(raw.episode)),
            _ => (None, None),
        };
        return Ok(NameExtractionResult {
            success: true,
            title: Some(title),
            year: normalize_year(raw.year),
            season,
            episode,
            kind: raw.kind,
            reason: None,
        });
    }

    if let Some(filename) = non_empty(raw.filename) {
        return Ok(from_legacy(&filename, raw.kind));
    }

    Err(SyncError::ExtractionMalformed(
        "success without title or filename".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extract_json_raw() {
        let input = r#"{"type": "movie", "title": "Test"}"#;
        assert_eq!(extract_json(input), Some(input));
    }

    #[test]
    fn test_extract_json_fenced() {
        let input = "```json\n{\"type\": \"movie\", \"title\": \"Test\"}\n```";
        assert_eq!(extract_json(input), Some(r#"{"type": "movie", "title": "Test"}"#));
    }

    #[test]
    fn test_extract_json_with_prefix() {
        let input = "Here is the parsed result:\n{\"type\": \"tv\"}";
        assert_eq!(extract_json(input), Some(r#"{"type": "tv"}"#));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_new_format_movie() {
        let result =
            parse_response(r#"{"success":true,"title":"盗梦空间","year":"2010","type":"movie"}"#)
                .unwrap();
        assert_eq!(result, NameExtractionResult::movie("盗梦空间", Some("2010".into())));
    }

    #[test]
    fn test_parse_numeric_year_and_bad_year() {
        let result =
            parse_response(r#"{"success":true,"title":"Heat","year":1995,"type":"movie"}"#).unwrap();
        assert_eq!(result.year.as_deref(), Some("1995"));

        let result =
            parse_response(r#"{"success":true,"title":"Heat","year":"95","type":"movie"}"#).unwrap();
        assert_eq!(result.year, None);
    }

    #[test]
    fn test_parse_failure_keeps_type() {
        let result =
            parse_response(r#"{"success":false,"reason":"缺少剧名信息","type":"tv"}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"success": false, "reason": "缺少剧名信息", "type": "tv"})
        );
    }

    #[test]
    fn test_legacy_movie_matches_new_format() {
        let legacy =
            parse_response(r#"{"success":true,"filename":"盗梦空间 (2010)","type":"movie"}"#).unwrap();
        let current =
            parse_response(r#"{"success":true,"title":"盗梦空间","year":"2010","type":"movie"}"#)
                .unwrap();
        assert_eq!(legacy, current);
    }

    #[test]
    fn test_legacy_tv_matches_new_format() {
        let legacy =
            parse_response(r#"{"success":true,"filename":"Breaking Bad - S05E14","type":"tv"}"#)
                .unwrap();
        let current = parse_response(
            r#"{"success":true,"title":"Breaking Bad","season":5,"episode":14,"type":"tv"}"#,
        )
        .unwrap();
        assert_eq!(legacy, current);
    }

    #[test]
    fn test_legacy_failure() {
        let result = parse_response(
            r#"{"success":false,"filename":"","type":"unknown","reason":"非视频文件"}"#,
        )
        .unwrap();
        assert_eq!(result, NameExtractionResult::failure("非视频文件", MediaKind::Unknown));
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(
            parse_response("I think this is a movie"),
            Err(SyncError::ExtractionMalformed(_))
        ));
        assert!(matches!(
            parse_response(r#"{"success":true,"title":"Cut off"#),
            Err(SyncError::ExtractionMalformed(_))
        ));
        assert!(matches!(
            parse_response(r#"{"success":true,"type":"movie"}"#),
            Err(SyncError::ExtractionMalformed(_))
        ));
        assert!(matches!(
            parse_response(r#"{"success":true,"title":"X","type":"documentary"}"#),
            Err(SyncError::ExtractionMalformed(_))
        ));
    }

    #[test]
    fn test_tv_without_episode_is_not_placeable() {
        let result =
            parse_response(r#"{"success":true,"title":"Breaking Bad","season":5,"type":"tv"}"#)
                .unwrap();
        assert!(result.success);
        assert!(!result.is_placeable());
    }
}
