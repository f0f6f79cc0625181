//! Filesystem change monitoring
//!
//! Uses the `notify` crate to follow monitored folders, keeping the
//! metadata cache and materialized folders in step with the disk.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Deleted,
}

/// A change reported by a change source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Deleted paths of unknown type are reported as directories
    pub is_dir: bool,
}

impl ChangeEvent {
    pub fn created(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Created,
            is_dir,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Deleted,
            is_dir,
        }
    }
}

/// Subscription state of a monitored folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watched,
}

/// Errors produced by a change source
#[derive(Debug, Clone)]
pub enum WatchError {
    Init(String),
    Subscribe { path: PathBuf, reason: String },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Init(e) => write!(f, "Failed to create file watcher: {}", e),
            WatchError::Subscribe { path, reason } => {
                write!(f, "Failed to watch {:?}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// Something that reports filesystem changes below subscribed paths
pub trait ChangeSource: Send {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError>;
}

/// Change source backed by the platform's recommended watcher
pub struct NotifySource {
    watcher: RecommendedWatcher,
}

impl NotifySource {
    /// Events are sent to the provided channel
    pub fn new(event_tx: mpsc::UnboundedSender<ChangeEvent>) -> Result<Self, WatchError> {
        let watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in process_notify_event(event) {
                        let _ = event_tx.send(change);
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            })
            .map_err(|e| WatchError::Init(e.to_string()))?;

        Ok(Self { watcher })
    }
}

impl ChangeSource for NotifySource {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher
            .watch(path, mode)
            .map_err(|e| WatchError::Subscribe {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Convert a notify event into creations and deletions
pub(crate) fn process_notify_event(event: Event) -> Vec<ChangeEvent> {
    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};

    let paths = event.paths;
    match event.kind {
        EventKind::Create(kind) => paths
            .into_iter()
            .map(|path| {
                let is_dir = kind == CreateKind::Folder || path.is_dir();
                ChangeEvent::created(path, is_dir)
            })
            .collect(),
        EventKind::Remove(kind) => paths
            .into_iter()
            .map(|path| ChangeEvent::deleted(path, kind != RemoveKind::File))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, paths.as_slice()) {
            (RenameMode::Both, [from, to]) => vec![
                ChangeEvent::deleted(from.clone(), to.is_dir()),
                ChangeEvent::created(to.clone(), to.is_dir()),
            ],
            (RenameMode::From, _) => paths
                .into_iter()
                .map(|path| ChangeEvent::deleted(path, true))
                .collect(),
            (RenameMode::To, _) => paths
                .into_iter()
                .map(|path| {
                    let is_dir = path.is_dir();
                    ChangeEvent::created(path, is_dir)
                })
                .collect(),
            // Single path renames: whichever side still exists was the target
            _ => paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        let is_dir = path.is_dir();
                        ChangeEvent::created(path, is_dir)
                    } else {
                        ChangeEvent::deleted(path, true)
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Running change monitor; stops when dropped
pub struct MonitorHandle {
    states: Vec<(PathBuf, WatchState)>,
    task: JoinHandle<()>,
    _source: Box<dyn ChangeSource>,
}

impl MonitorHandle {
    pub(crate) fn new(
        states: Vec<(PathBuf, WatchState)>,
        task: JoinHandle<()>,
        source: Box<dyn ChangeSource>,
    ) -> Self {
        Self {
            states,
            task,
            _source: source,
        }
    }

    pub fn state(&self, path: &Path) -> WatchState {
        self.states
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, state)| *state)
            .unwrap_or(WatchState::Unwatched)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.states
            .iter()
            .filter(|(_, state)| *state == WatchState::Watched)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
