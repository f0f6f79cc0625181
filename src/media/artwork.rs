//! Thumbnail discovery
//!
//! Finds artwork for media files and folders by naming convention.

use std::path::{Path, PathBuf};

use super::format::{MediaKind, THUMBNAIL_EXTENSIONS, is_potential_thumbnail};
use super::info::EmbeddedArt;

/// Where a node's thumbnail comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    /// Image file on disk
    File(PathBuf),
    /// Artwork embedded in the media file
    Embedded(EmbeddedArt),
    /// Image referenced by a web feed
    Remote(String),
    /// Generated placeholder
    Generic(Placeholder),
}

/// Placeholder artwork categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Folder,
    Audio,
    Video,
    Image,
    Other,
}

impl Placeholder {
    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Placeholder::Audio,
            MediaKind::Video | MediaKind::Disc => Placeholder::Video,
            MediaKind::Image => Placeholder::Image,
            _ => Placeholder::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::Folder => "folder",
            Placeholder::Audio => "audio",
            Placeholder::Video => "video",
            Placeholder::Image => "image",
            Placeholder::Other => "other",
        }
    }

    /// Fill color of the generated placeholder
    pub fn color(&self) -> [u8; 3] {
        match self {
            Placeholder::Folder => [0xE0, 0xB0, 0x40],
            Placeholder::Audio => [0x40, 0x80, 0xD0],
            Placeholder::Video => [0xC0, 0x40, 0x40],
            Placeholder::Image => [0x40, 0xA0, 0x60],
            Placeholder::Other => [0x80, 0x80, 0x80],
        }
    }
}

/// `folder.*` or anything containing `albumart`, with a thumbnail extension
pub fn is_folder_thumbnail(path: &Path) -> bool {
    if !is_potential_thumbnail(path) {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.starts_with("folder.") || name.contains("albumart")
}

/// Candidate thumbnail names for a media file, in tie-break order
///
/// For each extension (`jpeg`, `jpg`, `png`): `<stem>.<ext>` then
/// `<name>.cover.<ext>`.
pub fn thumbnail_candidates(media: &Path) -> Vec<String> {
    let Some(name) = media.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let stem = media
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let mut candidates = Vec::with_capacity(THUMBNAIL_EXTENSIONS.len() * 2);
    for ext in THUMBNAIL_EXTENSIONS {
        candidates.push(format!("{}.{}", stem, ext));
        candidates.push(format!("{}.cover.{}", name, ext));
    }
    candidates
}

/// First existing convention thumbnail for `media` inside `dir`
///
/// Names match case-insensitively, the same way listings hide them.
/// Case variants of one candidate resolve to the first by name.
pub fn find_file_thumbnail(media: &Path, dir: &Path) -> Option<PathBuf> {
    let candidates = thumbnail_candidates(media);
    if candidates.is_empty() {
        return None;
    }

    let mut images: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_potential_thumbnail(path) && path.is_file())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            Some((name, path))
        })
        .collect();
    images.sort();

    candidates.iter().find_map(|candidate| {
        let candidate = candidate.to_lowercase();
        images
            .iter()
            .find(|(name, _)| name.to_lowercase() == candidate)
            .map(|(_, path)| path.clone())
    })
}

/// Folder artwork: the first name-sorted folder thumbnail in `dir`
pub fn find_folder_thumbnail(dir: &Path) -> Option<PathBuf> {
    let mut covers: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_folder_thumbnail(path))
        .collect();
    covers.sort();
    covers.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_order() {
        let candidates = thumbnail_candidates(Path::new("/m/Track 01.mp3"));
        assert_eq!(
            candidates,
            vec![
                "Track 01.jpeg",
                "Track 01.mp3.cover.jpeg",
                "Track 01.jpg",
                "Track 01.mp3.cover.jpg",
                "Track 01.png",
                "Track 01.mp3.cover.png",
            ]
        );
    }

    #[test]
    fn test_folder_thumbnail_names() {
        assert!(is_folder_thumbnail(Path::new("/m/Folder.JPG")));
        assert!(is_folder_thumbnail(Path::new("/m/AlbumArtSmall.jpg")));
        assert!(is_folder_thumbnail(Path::new("/m/AlbumArt_{id}_Large.png")));
        assert!(!is_folder_thumbnail(Path::new("/m/folder.gif")));
        assert!(!is_folder_thumbnail(Path::new("/m/cover.jpg")));
    }

    #[test]
    fn test_find_file_thumbnail_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("clip.mkv");
        std::fs::write(&media, b"x").unwrap();
        std::fs::write(dir.path().join("clip.png"), b"x").unwrap();
        std::fs::write(dir.path().join("clip.mkv.cover.jpg"), b"x").unwrap();

        // jpg beats png, whatever the naming style
        assert_eq!(
            find_file_thumbnail(&media, dir.path()),
            Some(dir.path().join("clip.mkv.cover.jpg"))
        );

        std::fs::write(dir.path().join("clip.jpg"), b"x").unwrap();
        assert_eq!(
            find_file_thumbnail(&media, dir.path()),
            Some(dir.path().join("clip.jpg"))
        );
    }

    #[test]
    fn test_find_file_thumbnail_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("Movie.mkv");
        std::fs::write(&media, b"x").unwrap();
        std::fs::write(dir.path().join("movie.JPG"), b"x").unwrap();
        std::fs::write(dir.path().join("MOVIE.png"), b"x").unwrap();

        assert_eq!(
            find_file_thumbnail(&media, dir.path()),
            Some(dir.path().join("movie.JPG"))
        );
        assert_eq!(find_file_thumbnail(&media, &dir.path().join("missing")), None);
    }

    #[test]
    fn test_find_folder_thumbnail_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("folder.png"), b"x").unwrap();
        std::fs::write(dir.path().join("AlbumArtSmall.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"x").unwrap();

        assert_eq!(
            find_folder_thumbnail(dir.path()),
            Some(dir.path().join("AlbumArtSmall.jpg"))
        );
    }
}
