//! Rendered thumbnail cache
//!
//! Resizes artwork to small JPEG files and stores them on disk, named by
//! the hash of their source so repeated requests are served from disk.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

use super::artwork::{Placeholder, Thumbnail};

/// Default thumbnail size (width and height)
pub const THUMBNAIL_SIZE: u32 = 160;

/// Thumbnail cache manager
#[derive(Debug)]
pub struct ThumbnailCache {
    cache_dir: PathBuf,
}

impl ThumbnailCache {
    /// Create a new thumbnail cache with the specified cache directory
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .context("Failed to create thumbnail cache directory")?;
        Ok(Self { cache_dir })
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Hash identifying a thumbnail source
    pub fn hash_key(data: &[u8]) -> String {
        format!("{:016x}", xxh3_64(data))
    }

    /// Get the path where a thumbnail with the given hash would be stored
    pub fn thumbnail_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.jpg", hash))
    }

    /// Render any thumbnail source to a cached JPEG file
    ///
    /// Remote thumbnails are not fetched here; they are returned as `None`.
    pub fn render(&self, thumbnail: &Thumbnail) -> Result<Option<PathBuf>> {
        match thumbnail {
            Thumbnail::File(path) => self.save_from_file(path).map(Some),
            Thumbnail::Embedded(art) => self.save_from_bytes(&art.data).map(Some),
            Thumbnail::Generic(placeholder) => self.placeholder(*placeholder).map(Some),
            Thumbnail::Remote(_) => Ok(None),
        }
    }

    /// Save a thumbnail for an image file
    ///
    /// The key includes the file's modification time so edited artwork is
    /// rendered again.
    pub fn save_from_file(&self, source: &Path) -> Result<PathBuf> {
        let modified = crate::utils::modified_millis(source).unwrap_or(0);
        let key = format!("{}:{}", source.display(), modified);
        let path = self.thumbnail_path(&Self::hash_key(key.as_bytes()));

        if path.exists() {
            return Ok(path);
        }

        let data = std::fs::read(source).context("Failed to read thumbnail source")?;
        self.write_resized(&data, &path)?;
        Ok(path)
    }

    /// Save a thumbnail for in-memory image data
    pub fn save_from_bytes(&self, data: &[u8]) -> Result<PathBuf> {
        let path = self.thumbnail_path(&Self::hash_key(data));

        // Skip if already cached
        if path.exists() {
            return Ok(path);
        }

        self.write_resized(data, &path)?;
        Ok(path)
    }

    /// Generated placeholder image for a category
    pub fn placeholder(&self, placeholder: Placeholder) -> Result<PathBuf> {
        let path = self
            .cache_dir
            .join(format!("generic-{}.jpg", placeholder.name()));

        if path.exists() {
            return Ok(path);
        }

        let image = RgbImage::from_pixel(THUMBNAIL_SIZE, THUMBNAIL_SIZE, Rgb(placeholder.color()));
        let mut output = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Jpeg)
            .context("Failed to encode placeholder")?;
        std::fs::write(&path, &output).context("Failed to write placeholder to cache")?;
        Ok(path)
    }

    fn write_resized(&self, data: &[u8], path: &Path) -> Result<()> {
        let img = image::load_from_memory(data).context("Failed to decode thumbnail image")?;

        // Resize to thumbnail, maintaining aspect ratio
        let thumbnail = img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3);

        // JPEG has no alpha channel
        let mut output = Vec::new();
        image::DynamicImage::ImageRgb8(thumbnail.to_rgb8())
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Jpeg)
            .context("Failed to encode thumbnail")?;

        std::fs::write(path, &output).context("Failed to write thumbnail to cache")?;
        Ok(())
    }

    /// Get the number of cached thumbnails
    pub fn cache_count(&self) -> Result<usize> {
        Ok(std::fs::read_dir(&self.cache_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "jpg")
                    .unwrap_or(false)
            })
            .count())
    }
}
