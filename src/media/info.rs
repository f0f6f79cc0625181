//! Analyzed media metadata
//!
//! This is what the metadata cache memoizes per `(path, mtime, sub track)`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::format::MediaKind;

/// Descriptive tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track: Option<u32>,
}

/// External subtitle file registered for a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub path: PathBuf,
    /// Format id, e.g. "srt"
    pub format: String,
    /// Language suffix taken from `movie.<lang>.srt`
    pub language: Option<String>,
}

/// Artwork embedded in the media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedArt {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime: String,
}

/// Result of analyzing one media file (or one sub track of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    /// Detected container, `None` when the file could not be recognized
    pub container: Option<String>,
    pub size: u64,
    pub duration_secs: Option<f64>,
    /// Bits per second
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub tags: MediaTags,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    /// DRM-protected content that cannot be served
    #[serde(default)]
    pub encrypted: bool,
    /// Whether analysis ran to completion
    pub parsed: bool,
    #[serde(default)]
    pub embedded_art: Option<EmbeddedArt>,
}

impl MediaInfo {
    /// Empty, not yet parsed info for a file of the given kind
    pub fn new(kind: MediaKind, size: u64) -> Self {
        Self {
            kind,
            container: None,
            size,
            duration_secs: None,
            bitrate: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
            width: None,
            height: None,
            tags: MediaTags::default(),
            subtitles: Vec::new(),
            encrypted: false,
            parsed: false,
            embedded_art: None,
        }
    }

    /// Analysis finished and produced something worth caching
    pub fn is_complete(&self) -> bool {
        self.parsed
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_art_is_base64_in_json() {
        let mut info = MediaInfo::new(MediaKind::Audio, 10);
        info.embedded_art = Some(EmbeddedArt {
            data: vec![0xFF, 0xD8, 0xFF],
            mime: "image/jpeg".to_string(),
        });

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"/9j/\""));

        let back: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
