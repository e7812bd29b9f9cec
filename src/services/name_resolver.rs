//! Canonical output naming
//!
//! Resolution order for a filename:
//! 1. apply the task's rename regex once (no match keeps the raw name)
//! 2. when extraction is enabled, ask the extractor about the renamed name
//! 3. on success, synthesize `Title (Year)` or `Title - SxxEyy`
//! 4. otherwise fall back to the renamed name without its extension

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::extraction::{
    MediaKind, NameExtractionResult, NameExtractor, REASON_MALFORMED, REASON_TIMEOUT,
};
use super::file_classifier::file_stem;
use super::rate_limiter::{RetryConfig, retry_async, with_timeout};
use crate::error::SyncError;

/// Outcome of naming one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameResolution {
    /// Output base name, extension excluded
    pub base_name: String,
    /// Present whenever extraction ran, successful or not
    pub extraction: Option<NameExtractionResult>,
}

impl NameResolution {
    /// Extraction succeeded and produced enough to name the file
    pub fn scraped(&self) -> Option<&NameExtractionResult> {
        self.extraction
            .as_ref()
            .filter(|e| e.success && e.title.is_some() && e.is_placeable())
    }

    /// Extraction claimed success for tv content but left out season/episode
    pub fn missing_episode(&self) -> bool {
        self.extraction
            .as_ref()
            .is_some_and(|e| e.success && !e.is_placeable())
    }
}

/// Task-level rename rule: one substitution pass
#[derive(Debug, Clone)]
pub struct RenameRule {
    regex: Regex,
    replacement: String,
}

impl RenameRule {
    pub fn new(regex: Regex, replacement: impl Into<String>) -> Self {
        Self {
            regex,
            replacement: replacement.into(),
        }
    }

    /// Replace the first match; a non-matching regex leaves the name untouched
    pub fn apply(&self, name: &str) -> String {
        if self.regex.is_match(name) {
            self.regex.replace(name, self.replacement.as_str()).into_owned()
        } else {
            name.to_string()
        }
    }
}

/// Deterministic base name for a successful extraction
pub fn canonical_name(result: &NameExtractionResult) -> Option<String> {
    let title = sanitize_filename::sanitize(result.title.as_deref()?.trim());
    if title.is_empty() {
        return None;
    }
    match result.kind {
        MediaKind::Tv => Some(format!(
            "{} - S{:02}E{:02}",
            title,
            result.season?,
            result.episode?
        )),
        _ => Some(match result.year.as_deref() {
            Some(year) => format!("{title} ({year})"),
            None => title,
        }),
    }
}

pub struct NameResolver {
    rename: Option<RenameRule>,
    extractor: Option<Arc<dyn NameExtractor>>,
    retry: RetryConfig,
    timeout: Duration,
}

impl NameResolver {
    pub fn new(
        rename: Option<RenameRule>,
        extractor: Option<Arc<dyn NameExtractor>>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            rename,
            extractor,
            retry,
            timeout,
        }
    }

    pub fn apply_rename(&self, raw_name: &str) -> String {
        match &self.rename {
            Some(rule) => rule.apply(raw_name),
            None => raw_name.to_string(),
        }
    }

    /// Call the extractor with timeout and bounded retries. Every failure,
    /// including unparseable output, becomes a `success: false` result.
    async fn extract(
        &self,
        extractor: &dyn NameExtractor,
        filename: &str,
        parent_hint: Option<&str>,
    ) -> NameExtractionResult {
        let timeout = self.timeout;
        let outcome = retry_async(
            || {
                with_timeout(timeout, extractor.extract(filename, parent_hint), || {
                    SyncError::ExtractionTimeout(timeout)
                })
            },
            &self.retry,
            "name.extract",
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    extractor = extractor.name(),
                    filename = filename,
                    error = %e,
                    "Name extraction failed, falling back to raw name"
                );
                let reason = match e {
                    SyncError::ExtractionMalformed(_) => REASON_MALFORMED.to_string(),
                    SyncError::ExtractionTimeout(_) => REASON_TIMEOUT.to_string(),
                    other => other.to_string(),
                };
                NameExtractionResult::failure(reason, MediaKind::Unknown)
            }
        }
    }

    /// Resolve the output base name for `raw_name`
    pub async fn resolve(&self, raw_name: &str, parent_hint: Option<&str>) -> NameResolution {
        let renamed = self.apply_rename(raw_name);
        let fallback = file_stem(&renamed).to_string();

        let Some(extractor) = self.extractor.as_deref() else {
            return NameResolution {
                base_name: fallback,
                extraction: None,
            };
        };

        let extraction = self.extract(extractor, &renamed, parent_hint).await;
        let base_name = if extraction.success {
            canonical_name(&extraction).unwrap_or_else(|| fallback.clone())
        } else {
            fallback
        };

        debug!(
            raw = raw_name,
            renamed = %renamed,
            base_name = %base_name,
            success = extraction.success,
            "Resolved output name"
        );

        NameResolution {
            base_name,
            extraction: Some(extraction),
        }
    }
}
