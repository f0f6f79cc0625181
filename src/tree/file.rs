//! File leaves and their cache-first resolve pipeline

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::CacheKey;
use crate::config::LibraryConfig;
use crate::context::LibraryContext;
use crate::media::{AnalyzeOptions, Format, MediaInfo, MediaKind};
use crate::utils::modified_millis;

/// Outcome of resolving a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Not resolved yet
    Pending,
    Valid,
    /// Analysis failed or found no usable container
    Unparseable,
    /// Content is DRM protected
    Protected,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Validity::Unparseable | Validity::Protected)
    }
}

/// Part of a file played as its own track, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start_secs: f64,
    /// `None` plays to the end of the file
    pub end_secs: Option<f64>,
}

/// Tags a cue sheet assigns to one of its tracks
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackTags {
    pub number: u32,
    pub title: Option<String>,
    pub performer: Option<String>,
}

#[derive(Debug)]
struct Resolved {
    modified: i64,
    validity: Validity,
    info: Option<Arc<MediaInfo>>,
}

/// A real file shown as a leaf
#[derive(Debug)]
pub struct FileNode {
    path: PathBuf,
    format: Format,
    sub_track: u32,
    span: Option<Span>,
    track: Option<TrackTags>,
    modified: AtomicI64,
    resolved: RwLock<Option<Resolved>>,
    resolve_lock: tokio::sync::Mutex<()>,
}

impl FileNode {
    pub fn new(path: PathBuf, format: Format, modified: i64) -> Self {
        Self {
            path,
            format,
            sub_track: 0,
            span: None,
            track: None,
            modified: AtomicI64::new(modified),
            resolved: RwLock::new(None),
            resolve_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// One track of a cue sheet, cached under its own sub track
    pub fn track(path: PathBuf, format: Format, modified: i64, tags: TrackTags, span: Span) -> Self {
        Self {
            sub_track: tags.number,
            span: Some(span),
            track: Some(tags),
            ..Self::new(path, format, modified)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn kind(&self) -> MediaKind {
        self.format.kind
    }

    pub fn sub_track(&self) -> u32 {
        self.sub_track
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// Modification time seen by the last resolution (or at creation)
    pub fn modified(&self) -> i64 {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn validity(&self) -> Validity {
        self.resolved
            .read()
            .as_ref()
            .map(|r| r.validity)
            .unwrap_or(Validity::Pending)
    }

    /// Resolved metadata, if resolution succeeded
    pub fn info(&self) -> Option<Arc<MediaInfo>> {
        self.resolved.read().as_ref().and_then(|r| r.info.clone())
    }

    pub fn cache_key(&self, modified: i64) -> CacheKey {
        CacheKey::new(&self.path, modified).with_sub_track(self.sub_track)
    }

    /// Resolve metadata, consulting the cache before analyzing
    ///
    /// A no-op when already resolved for the file's current modification
    /// time.
    pub async fn resolve(&self, ctx: &LibraryContext) -> Validity {
        let _guard = self.resolve_lock.lock().await;

        let path = self.path.clone();
        let modified = tokio::task::spawn_blocking(move || modified_millis(&path))
            .await
            .ok()
            .flatten();
        let Some(modified) = modified else {
            debug!("{:?} vanished before it could be resolved", self.path);
            self.store(0, Validity::Unparseable, None);
            return Validity::Unparseable;
        };

        let current = self
            .resolved
            .read()
            .as_ref()
            .filter(|r| r.modified == modified)
            .map(|r| r.validity);
        if let Some(validity) = current {
            return validity;
        }
        self.modified.store(modified, Ordering::SeqCst);

        let key = self.cache_key(modified);
        let use_cache = ctx.config.use_cache;

        let mut cached = None;
        if use_cache {
            match ctx.cache.get(&key).await {
                Ok(hit) => cached = hit,
                Err(e) => warn!("Metadata cache read failed for {:?}: {}", self.path, e),
            }
        }

        let mut info = match cached {
            Some(info) => Some(info),
            None => {
                let mut fresh = self.analyze(ctx).await;
                if let Some(info) = fresh.as_mut() {
                    self.apply_track(info);
                    if use_cache && info.is_complete() {
                        if let Err(e) = ctx.cache.put(&key, info).await {
                            warn!("Failed to cache metadata of {:?}: {}", self.path, e);
                        }
                    }
                }
                fresh
            }
        };

        if let Some(info) = info.as_mut() {
            post_process(info, &ctx.config);
        }

        let validity = match &info {
            None => Validity::Unparseable,
            Some(info) if info.encrypted => {
                info!("{:?} is DRM protected and will be hidden", self.path);
                Validity::Protected
            }
            Some(info) if info.container.is_none() => Validity::Unparseable,
            Some(_) => Validity::Valid,
        };

        self.store(modified, validity, info.map(Arc::new));
        validity
    }

    async fn analyze(&self, ctx: &LibraryContext) -> Option<MediaInfo> {
        let analyzer = Arc::clone(&ctx.analyzer);
        let path = self.path.clone();
        let format = self.format.clone();

        let result = tokio::task::spawn_blocking(move || {
            analyzer.analyze(&path, &format, &AnalyzeOptions::default())
        })
        .await;

        match result {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                debug!("Could not analyze {:?}: {}", self.path, e);
                None
            }
            Err(e) => {
                warn!("Analysis of {:?} did not complete: {}", self.path, e);
                None
            }
        }
    }

    /// Narrow whole-file metadata down to this node's track
    fn apply_track(&self, info: &mut MediaInfo) {
        if let Some(span) = self.span {
            let end = span.end_secs.or(info.duration_secs);
            info.duration_secs = end.map(|end| (end - span.start_secs).max(0.0));
        }
        if let Some(track) = &self.track {
            info.tags.track = Some(track.number);
            if track.title.is_some() {
                info.tags.title = track.title.clone();
            }
            if track.performer.is_some() {
                info.tags.artist = track.performer.clone();
            }
        }
    }

    fn store(&self, modified: i64, validity: Validity, info: Option<Arc<MediaInfo>>) {
        *self.resolved.write() = Some(Resolved {
            modified,
            validity,
            info,
        });
    }
}

/// Adjust metadata for the current settings
fn post_process(info: &mut MediaInfo, config: &LibraryConfig) {
    if config.disable_subtitles && info.kind == MediaKind::Video {
        info.subtitles.clear();
    }
}
