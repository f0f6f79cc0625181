//! Per-format media analysis
//!
//! Uses lofty for audio tags and properties, header sniffing for video
//! containers and the image crate for picture dimensions.

use std::path::{Path, PathBuf};

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;

use super::encoding::{decode_string, normalize_string};
use super::format::{ExtensionClassifier, Format, MediaKind};
use super::info::{EmbeddedArt, MediaInfo, MediaTags, SubtitleTrack};
use super::sniff;
use crate::utils::extension_lowercase;

/// What the analyzer should collect
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Register external subtitle files found next to videos
    pub subtitles: bool,
    /// Keep embedded artwork
    pub artwork: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            subtitles: true,
            artwork: true,
        }
    }
}

/// Expensive per-file analysis; always called on a blocking worker
pub trait Analyzer: Send + Sync {
    fn analyze(
        &self,
        path: &Path,
        format: &Format,
        options: &AnalyzeOptions,
    ) -> Result<MediaInfo, AnalyzeError>;
}

/// Default analyzer backed by lofty, header sniffing and image
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaAnalyzer;

impl MediaAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for MediaAnalyzer {
    fn analyze(
        &self,
        path: &Path,
        format: &Format,
        options: &AnalyzeOptions,
    ) -> Result<MediaInfo, AnalyzeError> {
        let size = std::fs::metadata(path)
            .map_err(|e| AnalyzeError::Io(e.to_string()))?
            .len();

        match format.kind {
            MediaKind::Audio => analyze_audio(path, format, size, options),
            MediaKind::Video => analyze_video(path, size, options),
            MediaKind::Image => analyze_image(path, format, size),
            kind => {
                let mut info = MediaInfo::new(kind, size);
                info.container = Some(format.id.to_string());
                info.parsed = true;
                Ok(info)
            }
        }
    }
}

fn analyze_audio(
    path: &Path,
    format: &Format,
    size: u64,
    options: &AnalyzeOptions,
) -> Result<MediaInfo, AnalyzeError> {
    let tagged_file = Probe::open(path)
        .map_err(|e| AnalyzeError::Io(e.to_string()))?
        .read()
        .map_err(|e| AnalyzeError::Decode(e.to_string()))?;

    let properties = tagged_file.properties();
    let mut info = MediaInfo::new(MediaKind::Audio, size);
    info.container = Some(format.id.to_string());
    info.duration_secs = Some(properties.duration().as_secs_f64());
    info.bitrate = properties
        .audio_bitrate()
        .or_else(|| properties.overall_bitrate())
        .map(|kbps| kbps * 1000);
    info.sample_rate = properties.sample_rate();
    info.channels = properties.channels();
    info.bit_depth = properties.bit_depth();

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    if let Some(tag) = tag {
        let text = |value: Option<std::borrow::Cow<'_, str>>| {
            value.map(|v| normalize_string(&decode_string(v.as_bytes())))
        };

        info.tags = MediaTags {
            title: text(tag.title()),
            artist: text(tag.artist()),
            album: text(tag.album()),
            genre: text(tag.genre()),
            year: tag.year(),
            track: tag.track(),
        };

        // MP4 audio bought from stores may still carry FairPlay
        if matches!(format.id, "m4a" | "m4p") {
            info.encrypted = sniff::is_encrypted(path, "mp4").unwrap_or(false);
        }

        if options.artwork {
            if let Some(picture) = tag.pictures().first() {
                info.embedded_art = Some(EmbeddedArt {
                    data: picture.data().to_vec(),
                    mime: picture
                        .mime_type()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| crate::utils::detect_image_mime(picture.data()).to_string()),
                });
            }
        }
    }

    info.parsed = true;
    Ok(info)
}

fn analyze_video(
    path: &Path,
    size: u64,
    options: &AnalyzeOptions,
) -> Result<MediaInfo, AnalyzeError> {
    let header = sniff::read_header(path).map_err(|e| AnalyzeError::Io(e.to_string()))?;
    let mut info = MediaInfo::new(MediaKind::Video, size);
    info.parsed = true;

    let Some(container) = sniff::sniff_container(&header) else {
        return Ok(info);
    };
    info.container = Some(container.to_string());
    info.encrypted =
        sniff::is_encrypted(path, container).map_err(|e| AnalyzeError::Io(e.to_string()))?;

    // lofty understands the audio side of MP4, ASF and Ogg containers
    if let Some(tagged_file) = Probe::open(path).ok().and_then(|p| p.read().ok()) {
        let properties = tagged_file.properties();
        let duration = properties.duration();
        if !duration.is_zero() {
            info.duration_secs = Some(duration.as_secs_f64());
        }
        info.bitrate = properties.overall_bitrate().map(|kbps| kbps * 1000);
    }

    if options.subtitles {
        info.subtitles = find_external_subtitles(path);
    }

    Ok(info)
}

fn analyze_image(path: &Path, format: &Format, size: u64) -> Result<MediaInfo, AnalyzeError> {
    let mut info = MediaInfo::new(MediaKind::Image, size);
    info.container = Some(format.id.to_string());

    let dimensions = image::ImageReader::open(path)
        .map_err(|e| AnalyzeError::Io(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| AnalyzeError::Io(e.to_string()))?
        .into_dimensions();

    match dimensions {
        Ok((width, height)) => {
            info.width = Some(width);
            info.height = Some(height);
        }
        // No decoder for this image type is compiled in; dimensions stay unknown
        Err(image::ImageError::Unsupported(_)) => {}
        Err(e) => return Err(AnalyzeError::Decode(e.to_string())),
    }

    info.parsed = true;
    Ok(info)
}

/// Subtitle files named after a video, e.g. `movie.srt` or `movie.en.srt`
pub fn find_external_subtitles(video: &Path) -> Vec<SubtitleTrack> {
    let (Some(parent), Some(stem)) = (video.parent(), video.file_stem().and_then(|s| s.to_str()))
    else {
        return Vec::new();
    };

    let Ok(read_dir) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut tracks: Vec<SubtitleTrack> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter_map(|path| subtitle_for(&path, stem))
        .collect();
    tracks.sort_by(|a, b| a.path.cmp(&b.path));
    tracks
}

fn subtitle_for(candidate: &Path, video_stem: &str) -> Option<SubtitleTrack> {
    let ext = extension_lowercase(candidate)?;
    let format = ExtensionClassifier::by_extension(&ext)?;
    if format.kind != MediaKind::Subtitle {
        return None;
    }

    let candidate_stem = candidate.file_stem()?.to_str()?;
    let language = if candidate_stem == video_stem {
        None
    } else {
        let rest = candidate_stem.strip_prefix(video_stem)?.strip_prefix('.')?;
        Some(rest.to_string())
    };

    Some(SubtitleTrack {
        path: PathBuf::from(candidate),
        format: format.id.to_string(),
        language,
    })
}

/// Errors produced while analyzing a file
#[derive(Debug, Clone)]
pub enum AnalyzeError {
    Io(String),
    Decode(String),
}

impl std::fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyzeError::Io(e) => write!(f, "IO error: {}", e),
            AnalyzeError::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for AnalyzeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::FormatClassifier;

    #[test]
    fn test_external_subtitles_with_language() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Movie.mkv");
        std::fs::write(&video, b"x").unwrap();
        std::fs::write(dir.path().join("Movie.srt"), b"1").unwrap();
        std::fs::write(dir.path().join("Movie.fr.ass"), b"1").unwrap();
        std::fs::write(dir.path().join("Other.srt"), b"1").unwrap();
        std::fs::write(dir.path().join("Movie.nfo"), b"1").unwrap();

        let tracks = find_external_subtitles(&video);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].format, "ass");
        assert_eq!(tracks[0].language.as_deref(), Some("fr"));
        assert_eq!(tracks[1].format, "srt");
        assert_eq!(tracks[1].language, None);
    }

    #[test]
    fn test_unrecognized_video_has_no_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.avi");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let format = ExtensionClassifier::new().classify(&path).unwrap();
        let info = MediaAnalyzer::new()
            .analyze(&path, &format, &AnalyzeOptions::default())
            .unwrap();
        assert!(info.parsed);
        assert_eq!(info.container, None);
    }

    #[test]
    fn test_png_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        image::RgbImage::from_pixel(7, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let format = ExtensionClassifier::new().classify(&path).unwrap();
        let info = MediaAnalyzer::new()
            .analyze(&path, &format, &AnalyzeOptions::default())
            .unwrap();
        assert_eq!(info.width, Some(7));
        assert_eq!(info.height, Some(3));
        assert_eq!(info.container.as_deref(), Some("png"));
    }

    #[test]
    fn test_corrupt_audio_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, b"garbage bytes that are not flac").unwrap();

        let format = ExtensionClassifier::new().classify(&path).unwrap();
        assert!(
            MediaAnalyzer::new()
                .analyze(&path, &format, &AnalyzeOptions::default())
                .is_err()
        );
    }
}
