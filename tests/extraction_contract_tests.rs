//! Extraction contract tests
//!
//! The rule-based extractor must produce exactly the documented structured
//! results, and both response shapes an LLM may return must decode to the
//! same internal result.

use serde_json::{Value, json};

use strm_sync::services::extraction::parse_response;
use strm_sync::services::{NameExtractor, RuleExtractor};

async fn extract(filename: &str) -> Value {
    let result = RuleExtractor.extract(filename, None).await.unwrap();
    serde_json::to_value(result).unwrap()
}

mod worked_examples {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_movie_with_year() {
        assert_eq!(
            extract("盗梦空间.2010.1080p.BluRay.x264.mkv").await,
            json!({"success": true, "title": "盗梦空间", "year": "2010", "type": "movie"})
        );
    }

    #[tokio::test]
    async fn test_tv_episode() {
        assert_eq!(
            extract("Breaking Bad S05E14 Ozymandias 1080p.mkv").await,
            json!({"success": true, "title": "Breaking Bad", "season": 5, "episode": 14, "type": "tv"})
        );
    }

    #[tokio::test]
    async fn test_episode_without_title() {
        assert_eq!(
            extract("S01E05.mkv").await,
            json!({"success": false, "reason": "缺少剧名信息", "type": "tv"})
        );
    }

    #[tokio::test]
    async fn test_non_video() {
        assert_eq!(
            extract("random_file.txt").await,
            json!({"success": false, "reason": "非视频文件", "type": "unknown"})
        );
    }
}

mod response_formats {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_legacy_tv_matches_current_format() {
        let current = parse_response(
            r#"{"success": true, "title": "Breaking Bad", "season": 5, "episode": 14, "type": "tv"}"#,
        )
        .unwrap();
        let legacy = parse_response(
            r#"{"success": true, "filename": "Breaking Bad - S05E14", "type": "tv"}"#,
        )
        .unwrap();
        assert_eq!(legacy, current);
    }

    #[test]
    fn test_legacy_movie_matches_current_format() {
        let current =
            parse_response(r#"{"success": true, "title": "盗梦空间", "year": "2010", "type": "movie"}"#)
                .unwrap();
        let legacy =
            parse_response(r#"{"success": true, "filename": "盗梦空间 (2010)", "type": "movie"}"#)
                .unwrap();
        assert_eq!(legacy, current);
    }

    #[test]
    fn test_legacy_failure_matches_current_format() {
        let current =
            parse_response(r#"{"success": false, "reason": "非视频文件", "type": "unknown"}"#).unwrap();
        let legacy = parse_response(
            r#"{"success": false, "filename": "", "reason": "非视频文件", "type": "unknown"}"#,
        )
        .unwrap();
        assert_eq!(legacy, current);
    }

    #[test]
    fn test_fenced_response_is_accepted() {
        let result = parse_response(
            "```json\n{\"success\": true, \"title\": \"Dune\", \"year\": 2021, \"type\": \"movie\"}\n```",
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"success": true, "title": "Dune", "year": "2021", "type": "movie"})
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_response("I think this is a movie"),
            Err(strm_sync::SyncError::ExtractionMalformed(_))
        ));
    }
}
