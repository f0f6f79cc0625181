//! Recursive library scan and its progress tracking

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::tree::NodeRef;

/// Progress update sent during scanning
#[derive(Debug, Clone)]
pub enum ScanProgress {
    Started,
    /// A folder is being discovered
    Entered { name: String },
    Completed {
        folders: u64,
        files: u64,
        errors: u64,
        removed: u64,
        duration_secs: f64,
    },
    Cancelled,
}

/// Shared state of a running scan
#[derive(Debug, Default)]
pub struct ScanState {
    pub folders: AtomicU64,
    pub files: AtomicU64,
    /// Subtrees abandoned after a panic
    pub errors: AtomicU64,
    pub cancelled: AtomicBool,
    pub finished: AtomicBool,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Folders, files and errors so far
    pub fn get_stats(&self) -> (u64, u64, u64) {
        (
            self.folders.load(Ordering::SeqCst),
            self.files.load(Ordering::SeqCst),
            self.errors.load(Ordering::SeqCst),
        )
    }
}

/// Handle for controlling and monitoring a scan
#[derive(Debug, Clone)]
pub struct ScanHandle {
    state: Arc<ScanState>,
}

impl ScanHandle {
    pub fn new(state: Arc<ScanState>) -> Self {
        Self { state }
    }

    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn get_stats(&self) -> (u64, u64, u64) {
        self.state.get_stats()
    }

    pub(crate) fn state(&self) -> &Arc<ScanState> {
        &self.state
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ScanProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ScanProgress>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// One scan run: the walk plus where to report
pub(crate) struct Scanner<'a> {
    pub state: &'a ScanState,
    pub progress: Option<&'a ProgressSender>,
    started: Instant,
}

impl<'a> Scanner<'a> {
    pub fn new(state: &'a ScanState, progress: Option<&'a ProgressSender>) -> Self {
        Self {
            state,
            progress,
            started: Instant::now(),
        }
    }

    pub fn report(&self, update: ScanProgress) {
        if let Some(tx) = self.progress {
            let _ = tx.send(update);
        }
    }

    pub fn completed(&self, removed: u64) {
        let (folders, files, errors) = self.state.get_stats();
        let duration_secs = self.started.elapsed().as_secs_f64();
        info!(
            "Scan finished: {} folders, {} files, {} errors in {:.1}s",
            folders, files, errors, duration_secs
        );
        self.report(ScanProgress::Completed {
            folders,
            files,
            errors,
            removed,
            duration_secs,
        });
    }

    /// Walk the children of an already discovered node
    ///
    /// Every scannable child is discovered (or refreshed when its source
    /// changed), walked, then released.
    pub fn scan_children<'n>(&'n self, node: &'n NodeRef) -> BoxFuture<'n, ()> {
        async move {
            let children = node.children();
            for child in children.iter() {
                node.context().realtime.wait_idle().await;
                if self.state.is_cancelled() {
                    debug!("Scan cancelled in {:?}", node.name());
                    return;
                }

                if !child.is_folder() {
                    self.state.files.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                if !child.allow_scan() {
                    continue;
                }

                self.state.folders.fetch_add(1, Ordering::SeqCst);
                self.report(ScanProgress::Entered {
                    name: child.name().to_string(),
                });

                let walk = async {
                    child.pre_resolve().await;
                    if child.is_discovered() && child.needs_refresh().await {
                        child.refresh_analyzed().await;
                    } else {
                        child.discover_analyzed().await;
                    }
                    self.scan_children(child).await;
                };
                if AssertUnwindSafe(walk).catch_unwind().await.is_err() {
                    error!("Scan of {:?} panicked, skipping it", child.name());
                    self.state.errors.fetch_add(1, Ordering::SeqCst);
                }

                child.release_children();
            }
        }
        .boxed()
    }
}

/// Log and count a stale-row cleanup after a complete scan
pub(crate) async fn cleanup_cache(root: &NodeRef) -> u64 {
    let ctx = root.context();
    match ctx.cache.cleanup().await {
        Ok(0) => 0,
        Ok(removed) => {
            info!("Removed {} stale cache entries", removed);
            ctx.bump_update_id();
            removed
        }
        Err(e) => {
            warn!("Cache cleanup failed: {}", e);
            0
        }
    }
}
