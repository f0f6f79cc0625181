//! Utility functions

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Utilities
// ============================================================================

/// Milliseconds since the Unix epoch for a system time
pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current time in milliseconds since the Unix epoch
pub fn current_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

/// Modification time of a file or directory in milliseconds, if readable
pub fn modified_millis(path: &Path) -> Option<i64> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(system_time_millis)
}

// ============================================================================
// Path Utilities
// ============================================================================

/// Lowercased extension of a path
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// File name as an owned string, lossy
pub fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Dot-prefixed entries are treated as hidden on every platform
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Whether `path` is `dir` itself or lies below it
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

/// Get the base data directory for mediatree
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "mediatree", "mediatree")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mediatree"))
}

/// Get the base cache directory for mediatree
pub fn cache_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "mediatree", "mediatree")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

// ============================================================================
// Image Utilities
// ============================================================================

/// Detect image MIME type from magic bytes
pub fn detect_image_mime(bytes: &[u8]) -> &'static str {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png";
    }

    // GIF: 47 49 46 38
    if bytes.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        return "image/gif";
    }

    // WebP: 52 49 46 46 ... 57 45 42 50
    if bytes.len() >= 12 && bytes.starts_with(&[0x52, 0x49, 0x46, 0x46]) && &bytes[8..12] == b"WEBP"
    {
        return "image/webp";
    }

    // BMP: 42 4D
    if bytes.starts_with(&[0x42, 0x4D]) {
        return "image/bmp";
    }

    "image/jpeg"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lowercase() {
        assert_eq!(
            extension_lowercase(Path::new("/music/Song.FLAC")),
            Some("flac".to_string())
        );
        assert_eq!(extension_lowercase(Path::new("/music/README")), None);
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/music/.sync")));
        assert!(!is_hidden(Path::new("/music/album")));
    }

    #[test]
    fn test_detect_image_mime() {
        assert_eq!(
            detect_image_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            "image/png"
        );
        assert_eq!(detect_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
    }
}
