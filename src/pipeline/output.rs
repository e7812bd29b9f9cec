//! Atomic output writes
//!
//! Content goes to a hidden temp file next to the destination and is then
//! renamed over it, so readers never observe a half-written pointer file.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use super::context::WriteOutcome;

/// Write `content` to `path` via temp file + rename. Identical existing
/// content is left in place.
pub async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<WriteOutcome> {
    match fs::read(path).await {
        Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "output path has no parent"))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(WriteOutcome::Written)
}

/// Join a remote relative directory under `root`, keeping only plain
/// components so remote names cannot escape the output root
pub fn safe_join(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return None,
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_and_skips_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/movie.strm");

        let first = write_atomic(&path, b"http://host/d/movie.mkv").await.unwrap();
        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"http://host/d/movie.mkv");

        let second = write_atomic(&path, b"http://host/d/movie.mkv").await.unwrap();
        assert_eq!(second, WriteOutcome::Unchanged);

        let third = write_atomic(&path, b"http://host/d/other.mkv").await.unwrap();
        assert_eq!(third, WriteOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"http://host/d/other.mkv");

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_safe_join() {
        let root = Path::new("/out");
        assert_eq!(safe_join(root, "a/b"), Some(PathBuf::from("/out/a/b")));
        assert_eq!(safe_join(root, ""), Some(PathBuf::from("/out")));
        assert_eq!(safe_join(root, "a//b/"), Some(PathBuf::from("/out/a/b")));
        assert_eq!(safe_join(root, "a/../../etc"), None);
        assert_eq!(safe_join(root, "."), None);
    }
}
