//! File classification by extension
//!
//! Centralizes the extension tables and the companion-file matching rules
//! (a subtitle or NFO belongs to the video whose stem prefixes its name).

use serde::{Deserialize, Serialize};

use super::openlist::RemoteFile;

/// Video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "m2ts", "mpg", "mpeg", "rmvb",
    "iso", "vob",
];

/// Subtitle file extensions (lowercase)
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "idx", "vtt", "sup"];

/// Metadata file extensions (lowercase)
pub const METADATA_EXTENSIONS: &[&str] = &["nfo", "xml"];

/// Image file extensions (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tbn"];

/// Semantic category of a remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Video,
    Subtitle,
    Metadata,
    Image,
    Other,
}

impl FileType {
    pub const ALL: [FileType; 5] = [
        FileType::Video,
        FileType::Subtitle,
        FileType::Metadata,
        FileType::Image,
        FileType::Other,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Video => "video",
            FileType::Subtitle => "subtitle",
            FileType::Metadata => "metadata",
            FileType::Image => "image",
            FileType::Other => "other",
        }
    }

    /// Subtitles and NFOs follow a video; they are never written on their own
    pub fn is_companion(self) -> bool {
        matches!(self, FileType::Subtitle | FileType::Metadata)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase extension of a filename, without the dot
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Filename without its final extension
pub fn file_stem(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => stem,
        _ => filename,
    }
}

/// Classify a filename by its extension. Unknown or missing extensions are `Other`.
pub fn classify(filename: &str) -> FileType {
    let Some(ext) = extension(filename) else {
        return FileType::Other;
    };
    let ext = ext.as_str();
    if VIDEO_EXTENSIONS.contains(&ext) {
        FileType::Video
    } else if SUBTITLE_EXTENSIONS.contains(&ext) {
        FileType::Subtitle
    } else if METADATA_EXTENSIONS.contains(&ext) {
        FileType::Metadata
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        FileType::Image
    } else {
        FileType::Other
    }
}

/// Find the video a companion file belongs to.
///
/// `Movie.2010.zh.srt` and `Movie.2010.nfo` both belong to `Movie.2010.mkv`.
/// When several videos match, the longest stem wins; ties go to the first
/// one in listing order.
pub fn find_companion_video<'a>(
    companion: &str,
    siblings: &'a [RemoteFile],
) -> Option<&'a RemoteFile> {
    siblings
        .iter()
        .rev()
        .filter(|f| !f.is_dir && classify(&f.name) == FileType::Video)
        .filter(|video| companion_suffix(companion, &video.name).is_some())
        .max_by_key(|video| file_stem(&video.name).len())
}

/// The part of a companion name that follows its video's stem, extension excluded.
///
/// `("Movie.2010.zh.srt", "Movie.2010.mkv")` yields `Some(".zh")`,
/// `("Movie.2010.srt", "Movie.2010.mkv")` yields `Some("")`.
pub fn companion_suffix<'a>(companion: &'a str, video: &str) -> Option<&'a str> {
    let video_stem = file_stem(video);
    let companion_stem = file_stem(companion);
    let rest = companion_stem.strip_prefix(video_stem)?;
    if rest.is_empty() || rest.starts_with('.') {
        Some(rest)
    } else {
        None
    }
}
