//! Media classification and analysis
//!
//! Handles:
//! - Format classification by extension
//! - Per-format analysis (audio tags, video containers, image dimensions)
//! - Legacy text encoding fallback
//! - Thumbnail discovery and rendering

mod analyzer;
mod artwork;
mod encoding;
mod format;
mod info;
mod sniff;
mod thumbnail;

pub use analyzer::{AnalyzeError, AnalyzeOptions, Analyzer, MediaAnalyzer, find_external_subtitles};
pub use artwork::{
    Placeholder, Thumbnail, find_file_thumbnail, find_folder_thumbnail, is_folder_thumbnail,
    thumbnail_candidates,
};
pub use encoding::{decode_string, normalize_string};
pub use format::{
    DENYLISTED_EXTENSIONS, ExtensionClassifier, Format, FormatClassifier, MediaKind,
    THUMBNAIL_EXTENSIONS, is_denylisted, is_potential_thumbnail,
};
pub use info::{EmbeddedArt, MediaInfo, MediaTags, SubtitleTrack};
pub use sniff::{is_encrypted, sniff_container};
pub use thumbnail::{THUMBNAIL_SIZE, ThumbnailCache};
