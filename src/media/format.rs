//! Format classification by file extension

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::extension_lowercase;

/// Broad content type of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Subtitle,
    Playlist,
    Archive,
    Disc,
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Subtitle => "subtitle",
            MediaKind::Playlist => "playlist",
            MediaKind::Archive => "archive",
            MediaKind::Disc => "disc",
            MediaKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            "image" => MediaKind::Image,
            "subtitle" => MediaKind::Subtitle,
            "playlist" => MediaKind::Playlist,
            "archive" => MediaKind::Archive,
            "disc" => MediaKind::Disc,
            _ => MediaKind::Unknown,
        }
    }

    /// Audio, video or image
    pub fn is_playable(&self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Video | MediaKind::Image)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Lowercase identifier, usually the extension
    pub id: &'static str,
    pub kind: MediaKind,
    pub mime: &'static str,
}

/// Maps a path to its format
pub trait FormatClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> Option<Format>;
}

/// Extensions that can never be media, compared case-insensitively
pub const DENYLISTED_EXTENSIONS: &[&str] = &["!qb", "!ut", "1", "dmg", "exe"];

/// Image extensions considered for thumbnails, in tie-break order
pub const THUMBNAIL_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

const FORMATS: &[(&str, MediaKind, &str)] = &[
    // Audio
    ("mp3", MediaKind::Audio, "audio/mpeg"),
    ("flac", MediaKind::Audio, "audio/flac"),
    ("wav", MediaKind::Audio, "audio/wav"),
    ("m4a", MediaKind::Audio, "audio/mp4"),
    ("m4p", MediaKind::Audio, "audio/mp4"),
    ("aac", MediaKind::Audio, "audio/aac"),
    ("ogg", MediaKind::Audio, "audio/ogg"),
    ("oga", MediaKind::Audio, "audio/ogg"),
    ("opus", MediaKind::Audio, "audio/opus"),
    ("wma", MediaKind::Audio, "audio/x-ms-wma"),
    ("aiff", MediaKind::Audio, "audio/aiff"),
    ("aif", MediaKind::Audio, "audio/aiff"),
    ("ape", MediaKind::Audio, "audio/x-ape"),
    ("wv", MediaKind::Audio, "audio/x-wavpack"),
    ("mpc", MediaKind::Audio, "audio/x-musepack"),
    ("dsf", MediaKind::Audio, "audio/x-dsf"),
    // Video
    ("mkv", MediaKind::Video, "video/x-matroska"),
    ("webm", MediaKind::Video, "video/webm"),
    ("mp4", MediaKind::Video, "video/mp4"),
    ("m4v", MediaKind::Video, "video/mp4"),
    ("mov", MediaKind::Video, "video/quicktime"),
    ("avi", MediaKind::Video, "video/x-msvideo"),
    ("wmv", MediaKind::Video, "video/x-ms-wmv"),
    ("asf", MediaKind::Video, "video/x-ms-asf"),
    ("mpg", MediaKind::Video, "video/mpeg"),
    ("mpeg", MediaKind::Video, "video/mpeg"),
    ("vob", MediaKind::Video, "video/mpeg"),
    ("ts", MediaKind::Video, "video/mp2t"),
    ("m2ts", MediaKind::Video, "video/mp2t"),
    ("mts", MediaKind::Video, "video/mp2t"),
    ("flv", MediaKind::Video, "video/x-flv"),
    ("ogv", MediaKind::Video, "video/ogg"),
    ("3gp", MediaKind::Video, "video/3gpp"),
    // Images
    ("jpg", MediaKind::Image, "image/jpeg"),
    ("jpeg", MediaKind::Image, "image/jpeg"),
    ("png", MediaKind::Image, "image/png"),
    ("gif", MediaKind::Image, "image/gif"),
    ("bmp", MediaKind::Image, "image/bmp"),
    ("webp", MediaKind::Image, "image/webp"),
    ("tif", MediaKind::Image, "image/tiff"),
    ("tiff", MediaKind::Image, "image/tiff"),
    // Subtitles
    ("srt", MediaKind::Subtitle, "application/x-subrip"),
    ("ass", MediaKind::Subtitle, "text/x-ssa"),
    ("ssa", MediaKind::Subtitle, "text/x-ssa"),
    ("sub", MediaKind::Subtitle, "text/x-microdvd"),
    ("idx", MediaKind::Subtitle, "text/x-vobsub"),
    ("vtt", MediaKind::Subtitle, "text/vtt"),
    ("smi", MediaKind::Subtitle, "application/smil"),
    // Playlists
    ("m3u", MediaKind::Playlist, "audio/x-mpegurl"),
    ("m3u8", MediaKind::Playlist, "application/vnd.apple.mpegurl"),
    ("pls", MediaKind::Playlist, "audio/x-scpls"),
    ("cue", MediaKind::Playlist, "application/x-cue"),
    // Archives
    ("zip", MediaKind::Archive, "application/zip"),
    ("cbz", MediaKind::Archive, "application/vnd.comicbook+zip"),
    ("tar", MediaKind::Archive, "application/x-tar"),
    ("tgz", MediaKind::Archive, "application/gzip"),
    ("gz", MediaKind::Archive, "application/gzip"),
    ("gzip", MediaKind::Archive, "application/gzip"),
    ("rar", MediaKind::Archive, "application/vnd.rar"),
    ("cbr", MediaKind::Archive, "application/vnd.comicbook-rar"),
    ("7z", MediaKind::Archive, "application/x-7z-compressed"),
    // Disc images
    ("iso", MediaKind::Disc, "application/x-iso9660-image"),
    ("img", MediaKind::Disc, "application/x-iso9660-image"),
];

/// Table-driven classifier keyed on the lowercase extension
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionClassifier;

impl ExtensionClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Look up a format by lowercase extension
    pub fn by_extension(ext: &str) -> Option<Format> {
        FORMATS
            .iter()
            .find(|(id, _, _)| *id == ext)
            .map(|&(id, kind, mime)| Format { id, kind, mime })
    }
}

impl FormatClassifier for ExtensionClassifier {
    fn classify(&self, path: &Path) -> Option<Format> {
        let ext = extension_lowercase(path)?;
        Self::by_extension(&ext)
    }
}

/// Whether the extension is on the never-media denylist
pub fn is_denylisted(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| DENYLISTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Whether the file name carries a thumbnail image extension
pub fn is_potential_thumbnail(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| THUMBNAIL_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
