//! Rule-based filename extraction for scene-style release names
//!
//! Parses filenames like:
//! - "盗梦空间.2010.1080p.BluRay.x264.mkv"
//! - "Breaking Bad S05E14 Ozymandias 1080p.mkv"
//! - "[Group] Show Name - S01E03 [1080p].mkv"
//!
//! and answers with the same contract as the LLM extractor, so it can back
//! `needScrap` tasks without any external service.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::extraction::{MediaKind, NameExtractionResult, NameExtractor};
use super::file_classifier::{self, FileType};
use crate::error::Result;

/// Failure reason for names with an episode marker but no show title
pub const REASON_MISSING_TITLE: &str = "缺少剧名信息";
/// Failure reason for files that are not videos
pub const REASON_NOT_VIDEO: &str = "非视频文件";

static SXXEXX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bS(\d{1,3})\s*E(\d{1,4})\b").expect("valid regex")
});

static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").expect("valid regex"));

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid regex"));

/// First release tag marks the end of the title
static RELEASE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(2160p|1080p|1080i|720p|576p|480p|4k|uhd|blu-?ray|bdrip|brrip|remux|web-?dl|web-?rip|hdtv|dvdrip|hdrip|x264|x265|h\s?26[45]|hevc|avc|10bit|hdr10?|dts|aac|ac3|ddp?5\s?1|atmos|proper|repack)\b",
    )
    .expect("valid regex")
});

static BRACKET_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[[^\]]*\]\s*").expect("valid regex"));

static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Directory names that describe a season rather than a show
static SEASON_DIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(season\s*\d+|s\d{1,3}|specials?|第.{1,4}季)$").expect("valid regex")
});

/// Clean a raw title fragment: strip group tags, separators and dangling punctuation
fn clean_title(raw: &str) -> String {
    let mut cleaned = raw.to_string();
    while BRACKET_TAG_RE.is_match(&cleaned) {
        cleaned = BRACKET_TAG_RE.replace(&cleaned, "").to_string();
    }
    let cleaned = SPACE_RE.replace_all(&cleaned, " ");
    cleaned
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '(' | '[' | '.' | ','))
        .to_string()
}

/// Replace dot/underscore separators with spaces
fn normalize_separators(stem: &str) -> String {
    stem.replace(['.', '_'], " ")
}

/// Use the parent directory as the title when it names a show, not a season
fn title_from_parent(parent_hint: Option<&str>) -> Option<String> {
    let parent = parent_hint?.trim();
    if parent.is_empty() || SEASON_DIR_RE.is_match(parent) {
        return None;
    }
    let title = clean_title(&normalize_separators(parent));
    (!title.is_empty()).then_some(title)
}

fn parse_episode_marker(cleaned: &str) -> Option<(usize, u32, u32)> {
    let caps = SXXEXX_RE
        .captures(cleaned)
        .or_else(|| NXNN_RE.captures(cleaned))?;
    let start = caps.get(0)?.start();
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some((start, season, episode))
}

/// Parse a filename into the extraction contract
pub fn parse_filename(filename: &str, parent_hint: Option<&str>) -> NameExtractionResult {
    if file_classifier::classify(filename) != FileType::Video {
        return NameExtractionResult::failure(REASON_NOT_VIDEO, MediaKind::Unknown);
    }

    let cleaned = normalize_separators(file_classifier::file_stem(filename));

    // Episode marker: tv
    if let Some((start, season, episode)) = parse_episode_marker(&cleaned) {
        let title = Some(clean_title(&cleaned[..start]))
            .filter(|t| !t.is_empty())
            .or_else(|| title_from_parent(parent_hint));

        let result = match title {
            Some(_) if season == 0 || episode == 0 => {
                NameExtractionResult::failure("季集编号无效", MediaKind::Tv)
            }
            Some(title) => NameExtractionResult::tv(title, season, episode),
            None => NameExtractionResult::failure(REASON_MISSING_TITLE, MediaKind::Tv),
        };
        debug!(filename = filename, result = ?result, "Parsed episode filename");
        return result;
    }

    // Movie: title runs up to the release year or the first release tag
    let cutoff = RELEASE_TAG_RE
        .find(&cleaned)
        .map(|m| m.start())
        .unwrap_or(cleaned.len());

    let year = YEAR_RE
        .find_iter(&cleaned)
        .filter(|m| m.start() > 0 && m.start() < cutoff)
        .last();

    let (title, year) = match year {
        Some(m) => (clean_title(&cleaned[..m.start()]), Some(m.as_str().to_string())),
        None => (clean_title(&cleaned[..cutoff]), None),
    };

    let title = Some(title)
        .filter(|t| !t.is_empty())
        .or_else(|| title_from_parent(parent_hint));

    let result = match title {
        Some(title) => NameExtractionResult::movie(title, year),
        None => NameExtractionResult::failure(REASON_MISSING_TITLE, MediaKind::Movie),
    };
    debug!(filename = filename, result = ?result, "Parsed movie filename");
    result
}

/// Offline extractor implementing the extraction contract with regex rules
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleExtractor;

#[async_trait]
impl NameExtractor for RuleExtractor {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn extract(
        &self,
        filename: &str,
        parent_hint: Option<&str>,
    ) -> Result<NameExtractionResult> {
        Ok(parse_filename(filename, parent_hint))
    }
}
