//! Shared services handed to every node of the tree

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::warn;

use crate::cache::{MemoryMetadataCache, MetadataCache};
use crate::config::LibraryConfig;
use crate::database::MediaDatabase;
use crate::media::{Analyzer, ExtensionClassifier, FormatClassifier, MediaAnalyzer, ThumbnailCache};

/// Everything the tree needs besides the filesystem
pub struct LibraryContext {
    pub config: Arc<LibraryConfig>,
    pub cache: Arc<dyn MetadataCache>,
    pub classifier: Arc<dyn FormatClassifier>,
    pub analyzer: Arc<dyn Analyzer>,
    pub thumbnails: Option<ThumbnailCache>,
    pub http: reqwest::Client,
    /// Held by latency-sensitive work; the scan yields to it
    pub realtime: RealtimeGate,
    update_id: AtomicU32,
}

impl LibraryContext {
    pub fn new(config: LibraryConfig, cache: Arc<dyn MetadataCache>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mediatree/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            config: Arc::new(config),
            cache,
            classifier: Arc::new(ExtensionClassifier::new()),
            analyzer: Arc::new(MediaAnalyzer::new()),
            thumbnails: None,
            http,
            realtime: RealtimeGate::new(),
            update_id: AtomicU32::new(1),
        }
    }

    /// Context backed by the SQLite cache and the on-disk thumbnail cache
    /// named in the configuration
    pub async fn open(config: LibraryConfig) -> Result<Self> {
        let cache: Arc<dyn MetadataCache> = if config.use_cache {
            let db = MediaDatabase::new(&config.database_file())
                .await
                .context("Failed to open metadata cache")?;
            Arc::new(db)
        } else {
            Arc::new(MemoryMetadataCache::new())
        };

        let thumbnails = match ThumbnailCache::new(config.thumbnail_dir()) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Thumbnails disabled: {}", e);
                None
            }
        };

        let mut ctx = Self::new(config, cache);
        ctx.thumbnails = thumbnails;
        Ok(ctx)
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FormatClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: ThumbnailCache) -> Self {
        self.thumbnails = Some(thumbnails);
        self
    }

    /// Current system update id
    pub fn update_id(&self) -> u32 {
        self.update_id.load(Ordering::SeqCst)
    }

    /// Signal that cached content changed, returns the new id
    pub fn bump_update_id(&self) -> u32 {
        self.update_id.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}

impl std::fmt::Debug for LibraryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryContext")
            .field("config", &self.config)
            .field("update_id", &self.update_id())
            .finish_non_exhaustive()
    }
}

/// Counting gate that lets realtime work pause background scans
///
/// Any number of holders may be inside at once. `wait_idle` returns once
/// nobody holds the gate.
#[derive(Debug, Default)]
pub struct RealtimeGate {
    holders: AtomicUsize,
    idle: Notify,
}

impl RealtimeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate; leaving happens when the guard is dropped
    pub fn enter(&self) -> RealtimeGuard<'_> {
        self.holders.fetch_add(1, Ordering::SeqCst);
        RealtimeGuard { gate: self }
    }

    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    /// Wait until no guard is alive
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a release in between is not missed
            let notified = self.idle.notified();
            if !self.is_held() {
                return;
            }
            notified.await;
        }
    }
}

/// Proof of being inside a [`RealtimeGate`]
#[derive(Debug)]
pub struct RealtimeGuard<'a> {
    gate: &'a RealtimeGate,
}

impl Drop for RealtimeGuard<'_> {
    fn drop(&mut self) {
        if self.gate.holders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}
