//! Tree root: composition, library scans and change monitoring

pub mod compose;
mod scan;
mod watcher;

pub use scan::{ProgressReceiver, ProgressSender, ScanHandle, ScanProgress, ScanState, progress_channel};
pub use watcher::{
    ChangeEvent, ChangeKind, ChangeSource, MonitorHandle, NotifySource, WatchError, WatchState,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::LibraryContext;
use crate::tree::{FileNode, Node, NodeRef};
use crate::utils::{is_hidden, is_within, modified_millis};
use scan::{Scanner, cleanup_cache};

/// Entry point to the media resource tree
pub struct TreeRoot {
    node: NodeRef,
    scan: Mutex<Option<ScanHandle>>,
}

impl TreeRoot {
    pub fn new(ctx: Arc<LibraryContext>) -> Self {
        Self {
            node: Node::root(ctx),
            scan: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<LibraryContext> {
        self.node.context()
    }

    /// The root node itself
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Top-level children, composed on first use
    pub async fn children(&self) -> Arc<Vec<NodeRef>> {
        self.node.discover().await;
        self.node.children()
    }

    /// Find a node by id, discovering along the way
    pub async fn find(&self, id: &str) -> Option<NodeRef> {
        self.node.find(id).await
    }

    pub fn update_id(&self) -> u32 {
        self.context().update_id()
    }

    /// Compose the top level again
    pub async fn recompose(&self) {
        self.node.refresh().await;
    }

    // ============ Scanning ============

    /// Scan the whole tree, analyzing and caching every file
    pub async fn scan(&self) -> Result<()> {
        self.scan_with_state(Arc::new(ScanState::new()), None).await
    }

    /// Scan with externally held state, reporting to `progress`
    pub async fn scan_with_state(
        &self,
        state: Arc<ScanState>,
        progress: Option<ProgressSender>,
    ) -> Result<()> {
        if !self.context().config.use_cache {
            bail!("Scanning requires the metadata cache to be enabled");
        }

        let scanner = Scanner::new(&state, progress.as_ref());
        scanner.report(ScanProgress::Started);
        info!("Library scan started");

        self.node.discover_analyzed().await;
        scanner.scan_children(&self.node).await;

        if state.is_cancelled() {
            info!("Library scan cancelled");
            scanner.report(ScanProgress::Cancelled);
        } else {
            let removed = cleanup_cache(&self.node).await;
            scanner.completed(removed);
        }
        state.finish();
        Ok(())
    }

    /// Start a scan in the background unless one is running
    ///
    /// Returns the handle of the running scan.
    pub fn spawn_scan(self: &Arc<Self>, progress: Option<ProgressSender>) -> ScanHandle {
        let mut current = self.scan.lock();
        if let Some(handle) = current.as_ref().filter(|h| !h.is_finished()) {
            debug!("A scan is already running");
            return handle.clone();
        }

        let state = Arc::new(ScanState::new());
        let handle = ScanHandle::new(Arc::clone(&state));
        *current = Some(handle.clone());

        let root = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = root.scan_with_state(Arc::clone(&state), progress).await {
                warn!("Library scan failed: {:#}", e);
                state.finish();
            }
        });
        handle
    }

    /// Ask the running scan to stop; returns whether one was running
    pub fn stop_scan(&self) -> bool {
        match self.scan.lock().as_ref() {
            Some(handle) if !handle.is_finished() => {
                info!("Stopping library scan");
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished() && !h.state().is_cancelled())
    }

    // ============ Monitoring ============

    /// Follow the monitored folders with the platform watcher
    pub fn start_monitoring(self: &Arc<Self>) -> Result<MonitorHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = NotifySource::new(tx).context("Failed to start monitoring")?;
        Ok(self.monitor_with(source, rx))
    }

    /// Subscribe `source` to the monitored folders and handle its events
    ///
    /// Folders that can't be subscribed stay unwatched.
    pub fn monitor_with(
        self: &Arc<Self>,
        mut source: impl ChangeSource + 'static,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> MonitorHandle {
        let config = &self.context().config;
        let mut states = Vec::new();

        for folder in &config.folders_monitored {
            let state = match source.subscribe(folder, true) {
                Ok(()) => {
                    info!("Watching {:?}", folder);
                    WatchState::Watched
                }
                Err(e) => {
                    warn!("{}", e);
                    WatchState::Unwatched
                }
            };
            states.push((folder.clone(), state));
        }

        if let Some(dir) = config.web_conf.as_deref().and_then(Path::parent) {
            if let Err(e) = source.subscribe(dir, false) {
                warn!("Web folder changes won't be noticed: {}", e);
            }
        }

        let root = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                root.handle_change(event).await;
            }
            debug!("Change monitor stopped");
        });

        MonitorHandle::new(states, task, Box::new(source))
    }

    /// Apply one filesystem change to the cache and the materialized tree
    pub async fn handle_change(&self, event: ChangeEvent) {
        let ctx = Arc::clone(self.context());

        if ctx.config.web_conf.as_deref() == Some(event.path.as_path()) {
            info!("Web folders changed, recomposing");
            self.recompose().await;
            return;
        }
        if !ctx
            .config
            .folders_monitored
            .iter()
            .any(|dir| is_within(&event.path, dir))
        {
            return;
        }

        let changed = match event.kind {
            ChangeKind::Created => self.on_created(&event.path, event.is_dir).await,
            ChangeKind::Deleted => self.on_deleted(&event.path, event.is_dir).await,
        };
        if changed {
            ctx.bump_update_id();
        }

        self.sync_tree(&event).await;
    }

    async fn on_created(&self, path: &Path, is_dir: bool) -> bool {
        if !self.context().config.use_cache {
            return false;
        }

        let files = if is_dir {
            let dir = path.to_path_buf();
            tokio::task::spawn_blocking(move || list_files(&dir))
                .await
                .unwrap_or_default()
        } else {
            vec![path.to_path_buf()]
        };

        let mut cached = false;
        for file in files {
            cached |= self.cache_file(file).await;
        }
        cached
    }

    /// Analyze one potential media file into the cache
    async fn cache_file(&self, path: PathBuf) -> bool {
        let ctx = self.context();
        let Some(format) = ctx.classifier.classify(&path) else {
            return false;
        };
        if !format.kind.is_playable() {
            return false;
        }

        let probe = path.clone();
        let modified = tokio::task::spawn_blocking(move || modified_millis(&probe))
            .await
            .ok()
            .flatten();
        let Some(modified) = modified else {
            return false;
        };

        let file = FileNode::new(path, format, modified);
        if file.resolve(ctx).await.is_valid() {
            info!("New file {:?} detected", file.path());
            true
        } else {
            false
        }
    }

    async fn on_deleted(&self, path: &Path, is_dir: bool) -> bool {
        let cache = &self.context().cache;
        let mut removed = 0;

        match cache.remove_entry(path).await {
            Ok(n) => removed += n,
            Err(e) => warn!("Failed to forget {:?}: {}", path, e),
        }
        if is_dir {
            match cache.remove_under_path(path).await {
                Ok(n) => removed += n,
                Err(e) => warn!("Failed to forget files under {:?}: {}", path, e),
            }
        }

        if removed > 0 {
            info!("{:?} removed, {} cache entries dropped", path, removed);
        }
        removed > 0
    }

    /// Mark folders listing the changed directory dirty and prune deleted children
    async fn sync_tree(&self, event: &ChangeEvent) {
        let Some(dir) = event.path.parent() else {
            return;
        };

        for node in self.materialized_folders(dir) {
            node.mark_dirty();
            if event.kind == ChangeKind::Deleted {
                let pruned = node.prune_path(&event.path).await;
                if pruned > 0 {
                    debug!("Pruned {} children of {:?}", pruned, node.name());
                }
            }
        }
    }

    /// Discovered folder nodes listing `dir`
    fn materialized_folders(&self, dir: &Path) -> Vec<NodeRef> {
        let mut found = Vec::new();
        let mut stack = vec![Arc::clone(&self.node)];

        while let Some(node) = stack.pop() {
            if !node.is_discovered() && node.children().is_empty() {
                continue;
            }
            if node.aggregator().is_some_and(|agg| agg.owns(dir)) {
                found.push(Arc::clone(&node));
            }
            stack.extend(node.children().iter().filter(|c| c.is_folder()).cloned());
        }
        found
    }
}

/// Every visible file below `dir`
fn list_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}
