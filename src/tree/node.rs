//! Tree nodes and the lazy population protocol
//!
//! A container node stages its child candidates once, then turns them into
//! nodes in batches. Children are published as immutable snapshots, so a
//! reader holding an `Arc<Vec<NodeRef>>` never sees a half-built list.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::aggregator::{Aggregator, EntryClass, classify_entry};
use super::archive::{ArchiveEntry, ArchiveSource};
use super::disc::{DiscSource, DiscTitle};
use super::feed::{FeedSource, StreamLeaf, stage_feed};
use super::file::{FileNode, TrackTags, Validity};
use super::library::{section_name, stage_section};
use super::playlist::{CueTrack, PlaylistSource};
use super::sorting::display_name;
use crate::config::VirtualFolderConf;
use crate::context::LibraryContext;
use crate::media::{
    MediaInfo, MediaKind, Placeholder, Thumbnail, find_file_thumbnail, find_folder_thumbnail,
};
use crate::utils::{current_millis, file_name_string, modified_millis};

pub type NodeRef = Arc<Node>;

/// Id of the tree root
pub const ROOT_ID: &str = "0";

/// A staged child candidate, turned into a node on population
#[derive(Debug, Clone)]
pub enum ChildSpec {
    /// Filesystem entry, classified when materialized
    Entry(PathBuf),
    /// Configured top-level directory, optionally renamed
    SharedFolder { path: PathBuf, name: Option<String> },
    /// Named bundle of folders
    Bundle(VirtualFolderConf),
    /// Letter bucket of a split folder
    Bucket {
        directories: Vec<PathBuf>,
        letter: char,
        entries: Vec<PathBuf>,
    },
    /// Fixed folder of further candidates
    Group { name: String, children: Vec<ChildSpec> },
    LibrarySection(MediaKind),
    Feed(FeedSource),
    Stream(StreamLeaf),
    Track(CueTrack),
    ArchiveEntry(ArchiveEntry),
    DiscTitle(DiscTitle),
}

/// What a node is backed by
#[derive(Debug)]
pub enum NodeKind {
    Root,
    Folder(Aggregator),
    File(FileNode),
    Group(Vec<ChildSpec>),
    LibrarySection(MediaKind),
    Archive(ArchiveSource),
    ArchiveEntry(ArchiveEntry),
    Disc(DiscSource),
    DiscTitle(DiscTitle),
    Playlist(PlaylistSource),
    Feed(FeedSource),
    Stream(StreamLeaf),
}

#[derive(Debug)]
struct NodeState {
    children: Arc<Vec<NodeRef>>,
    discovered: bool,
    /// Milliseconds since the epoch when the last completed population began staging
    last_refresh: i64,
    /// Modification times of the backing sources seen by that staging
    sources: Vec<Option<i64>>,
    /// System update id seen by the last completed population
    update_id: u32,
}

#[derive(Debug, Default)]
struct Staging {
    /// `None` until staged; emptied as candidates become nodes
    pending: Option<VecDeque<ChildSpec>>,
    next_ordinal: u64,
    started: i64,
    sources: Vec<Option<i64>>,
}

/// Coarsest modification time resolution among supported filesystems (FAT)
const MTIME_RESOLUTION_MS: i64 = 2000;

/// One element of the media resource tree
pub struct Node {
    id: String,
    name: String,
    kind: NodeKind,
    parent: Weak<Node>,
    ctx: Arc<LibraryContext>,
    state: RwLock<NodeState>,
    /// Population lock; held while staging, populating, refreshing and pruning
    staging: Mutex<Staging>,
    dirty: AtomicBool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind_name())
            .field("discovered", &self.is_discovered())
            .finish_non_exhaustive()
    }
}

impl Node {
    fn build(
        id: String,
        name: String,
        kind: NodeKind,
        parent: Weak<Node>,
        ctx: Arc<LibraryContext>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            parent,
            ctx,
            state: RwLock::new(NodeState {
                children: Arc::new(Vec::new()),
                discovered: false,
                last_refresh: 0,
                sources: Vec::new(),
                update_id: 0,
            }),
            staging: Mutex::new(Staging::default()),
            dirty: AtomicBool::new(false),
        }
    }

    /// The tree root; its children are the configured top-level sources
    pub fn root(ctx: Arc<LibraryContext>) -> NodeRef {
        Arc::new(Self::build(
            ROOT_ID.to_string(),
            "root".to_string(),
            NodeKind::Root,
            Weak::new(),
            ctx,
        ))
    }

    /// A parentless node heading its own tree
    pub fn detached(ctx: Arc<LibraryContext>, name: impl Into<String>, kind: NodeKind) -> NodeRef {
        Arc::new(Self::build(ROOT_ID.to_string(), name.into(), kind, Weak::new(), ctx))
    }

    fn spawn_child(self: &Arc<Self>, ordinal: u64, name: String, kind: NodeKind) -> NodeRef {
        Arc::new(Self::build(
            format!("{}${}", self.id, ordinal),
            name,
            kind,
            Arc::downgrade(self),
            Arc::clone(&self.ctx),
        ))
    }

    // ============ Accessors ============

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Root => "root",
            NodeKind::Folder(_) => "folder",
            NodeKind::File(_) => "file",
            NodeKind::Group(_) => "group",
            NodeKind::LibrarySection(_) => "library",
            NodeKind::Archive(_) => "archive",
            NodeKind::ArchiveEntry(_) => "archive entry",
            NodeKind::Disc(_) => "disc",
            NodeKind::DiscTitle(_) => "disc title",
            NodeKind::Playlist(_) => "playlist",
            NodeKind::Feed(_) => "feed",
            NodeKind::Stream(_) => "stream",
        }
    }

    pub fn context(&self) -> &Arc<LibraryContext> {
        &self.ctx
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.upgrade()
    }

    pub fn is_folder(&self) -> bool {
        !matches!(
            self.kind,
            NodeKind::File(_) | NodeKind::ArchiveEntry(_) | NodeKind::DiscTitle(_) | NodeKind::Stream(_)
        )
    }

    /// Current children snapshot
    pub fn children(&self) -> Arc<Vec<NodeRef>> {
        Arc::clone(&self.state.read().children)
    }

    pub fn is_discovered(&self) -> bool {
        self.state.read().discovered
    }

    pub fn last_refresh_time(&self) -> i64 {
        self.state.read().last_refresh
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Force the next `needs_refresh` to report a change
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn aggregator(&self) -> Option<&Aggregator> {
        match &self.kind {
            NodeKind::Folder(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<&FileNode> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    /// Content type of a leaf
    pub fn media_kind(&self) -> Option<MediaKind> {
        match &self.kind {
            NodeKind::File(file) => Some(file.kind()),
            NodeKind::ArchiveEntry(entry) => Some(entry.media.kind),
            NodeKind::DiscTitle(_) => Some(MediaKind::Video),
            NodeKind::Stream(stream) => Some(stream.kind),
            _ => None,
        }
    }

    /// Resolved metadata of a file leaf
    pub fn info(&self) -> Option<Arc<MediaInfo>> {
        self.file().and_then(FileNode::info)
    }

    /// Real path this node mirrors, when it mirrors exactly one
    pub fn backing_path(&self) -> Option<&Path> {
        match &self.kind {
            NodeKind::File(file) => Some(file.path()),
            NodeKind::Folder(agg) if agg.letter().is_none() && agg.directories().len() == 1 => {
                agg.directories().first().map(PathBuf::as_path)
            }
            NodeKind::Archive(archive) => Some(archive.path()),
            NodeKind::Disc(disc) => Some(disc.path()),
            NodeKind::Playlist(playlist) => Some(playlist.path()),
            _ => None,
        }
    }

    /// Size in bytes of a leaf's stream, when known
    pub fn length(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::File(file) => file
                .info()
                .map(|info| info.size)
                .or_else(|| std::fs::metadata(file.path()).ok().map(|m| m.len())),
            NodeKind::ArchiveEntry(entry) => Some(entry.size),
            NodeKind::DiscTitle(title) => Some(title.size()),
            _ => None,
        }
    }

    /// Whether the scan engine descends into this node
    pub fn allow_scan(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Root
                | NodeKind::Folder(_)
                | NodeKind::Group(_)
                | NodeKind::Archive(_)
                | NodeKind::Disc(_)
                | NodeKind::Playlist(_)
        )
    }

    // ============ Population ============

    /// Stage and populate fully, unless already discovered
    pub async fn discover(self: &Arc<Self>) {
        if self.is_discovered() {
            return;
        }
        self.populate(None).await;
    }

    /// Discover with file resolution regardless of `analyze_on_discovery`
    pub(crate) async fn discover_analyzed(self: &Arc<Self>) {
        if self.is_discovered() {
            return;
        }
        self.populate_with(None, true).await;
    }

    /// Turn up to `limit` staged candidates into children
    ///
    /// Returns whether staging is exhausted, which marks the node
    /// discovered.
    pub async fn populate(self: &Arc<Self>, limit: Option<usize>) -> bool {
        self.populate_with(limit, self.ctx.config.analyze_on_discovery)
            .await
    }

    async fn populate_with(self: &Arc<Self>, limit: Option<usize>, analyze: bool) -> bool {
        if !self.is_folder() {
            return true;
        }

        let mut staging = self.staging.lock().await;
        if self.is_discovered() {
            return true;
        }
        if staging.pending.is_none() {
            staging.started = current_millis();
            self.dirty.store(false, Ordering::SeqCst);
            let (sources, specs) = self.stage().await;
            trace!("Staged {} candidates for {:?}", specs.len(), self.name);
            staging.sources = sources;
            staging.pending = Some(specs.into());
        }

        let mut created = Vec::new();
        while limit.is_none_or(|limit| created.len() < limit) {
            let Some(spec) = staging.pending.as_mut().and_then(VecDeque::pop_front) else {
                break;
            };
            if let Some(child) = self.materialize(spec, staging.next_ordinal, analyze).await {
                staging.next_ordinal += 1;
                created.push(child);
            }
        }

        let exhausted = staging.pending.as_ref().is_none_or(VecDeque::is_empty);
        {
            let mut state = self.state.write();
            if !created.is_empty() {
                let mut children = Vec::with_capacity(state.children.len() + created.len());
                children.extend(state.children.iter().cloned());
                children.extend(created);
                state.children = Arc::new(children);
            }
            if exhausted {
                state.discovered = true;
                state.last_refresh = staging.started;
                state.sources = std::mem::take(&mut staging.sources);
                state.update_id = self.ctx.update_id();
            }
        }
        exhausted
    }

    /// Whether the backing source changed since the last population
    pub async fn needs_refresh(self: &Arc<Self>) -> bool {
        if self.is_dirty() {
            return true;
        }
        let node = Arc::clone(self);
        tokio::task::spawn_blocking(move || node.source_changed())
            .await
            .unwrap_or(false)
    }

    fn source_changed(&self) -> bool {
        let (started, seen, seen_update) = {
            let state = self.state.read();
            (state.last_refresh, state.sources.clone(), state.update_id)
        };
        if let NodeKind::LibrarySection(_) = self.kind {
            return self.ctx.update_id() != seen_update;
        }

        // A time this close to staging may hide a later change in the same tick
        let ambiguous = seen
            .iter()
            .flatten()
            .any(|m| *m >= started - MTIME_RESOLUTION_MS);
        if ambiguous || self.source_times() != seen {
            return true;
        }

        match &self.kind {
            NodeKind::Folder(agg) => agg.needs_refresh(&self.ctx),
            _ => false,
        }
    }

    /// Paths whose modification invalidates the staged children
    fn source_paths(&self) -> Vec<&Path> {
        match &self.kind {
            NodeKind::Folder(agg) => agg.directories().iter().map(PathBuf::as_path).collect(),
            NodeKind::Archive(archive) => vec![archive.path()],
            NodeKind::Disc(disc) => vec![disc.path()],
            NodeKind::Playlist(playlist) => vec![playlist.path()],
            NodeKind::Root => self.ctx.config.web_conf.as_deref().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn source_times(&self) -> Vec<Option<i64>> {
        self.source_paths()
            .into_iter()
            .map(modified_millis)
            .collect()
    }

    /// Rebuild the children off to the side and swap them in
    pub async fn refresh(self: &Arc<Self>) {
        self.refresh_with(self.ctx.config.analyze_on_discovery)
            .await
    }

    /// Refresh with file resolution regardless of `analyze_on_discovery`
    pub(crate) async fn refresh_analyzed(self: &Arc<Self>) {
        self.refresh_with(true).await
    }

    async fn refresh_with(self: &Arc<Self>, analyze: bool) {
        if !self.is_folder() {
            return;
        }

        let mut staging = self.staging.lock().await;
        let started = current_millis();
        self.dirty.store(false, Ordering::SeqCst);
        let (sources, specs) = self.stage().await;

        let mut children = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(child) = self.materialize(spec, children.len() as u64, analyze).await {
                children.push(child);
            }
        }

        staging.pending = Some(VecDeque::new());
        staging.next_ordinal = children.len() as u64;
        {
            let mut state = self.state.write();
            state.children = Arc::new(children);
            state.discovered = true;
            state.last_refresh = started;
            state.sources = sources;
            state.update_id = self.ctx.update_id();
        }
        debug!("Refreshed {:?}", self.name);
    }

    /// Forget the children so their memory can be reclaimed
    ///
    /// The next discovery stages again. Skipped while a population holds
    /// the node.
    pub fn release_children(&self) {
        let Ok(mut staging) = self.staging.try_lock() else {
            trace!("{:?} is busy, keeping its children", self.name);
            return;
        };
        staging.pending = None;
        staging.next_ordinal = 0;

        let mut state = self.state.write();
        state.children = Arc::new(Vec::new());
        state.discovered = false;
    }

    /// Remove the child with `id`, returns whether it was present
    pub async fn remove_child(&self, id: &str) -> bool {
        self.retain_children(|child| child.id != id).await > 0
    }

    /// Remove children backed by `path` or anything below it
    pub async fn prune_path(&self, path: &Path) -> usize {
        self.retain_children(|child| {
            !child
                .backing_path()
                .is_some_and(|backing| backing.starts_with(path))
        })
        .await
    }

    async fn retain_children(&self, keep: impl Fn(&NodeRef) -> bool) -> usize {
        let _staging = self.staging.lock().await;
        let mut state = self.state.write();
        let kept: Vec<NodeRef> = state.children.iter().filter(|c| keep(c)).cloned().collect();
        let removed = state.children.len() - kept.len();
        if removed > 0 {
            state.children = Arc::new(kept);
        }
        removed
    }

    // ============ Staging ============

    /// Source modification times, read before listing, and the candidates
    async fn stage(self: &Arc<Self>) -> (Vec<Option<i64>>, Vec<ChildSpec>) {
        match &self.kind {
            NodeKind::Group(children) => (Vec::new(), children.clone()),
            NodeKind::LibrarySection(kind) => (Vec::new(), stage_section(&self.ctx, *kind).await),
            NodeKind::Feed(feed) => (Vec::new(), stage_feed(&self.ctx, feed).await),
            NodeKind::Root
            | NodeKind::Folder(_)
            | NodeKind::Archive(_)
            | NodeKind::Disc(_)
            | NodeKind::Playlist(_) => {
                let node = Arc::clone(self);
                let staged = tokio::task::spawn_blocking(move || {
                    let sources = node.source_times();
                    (sources, node.stage_blocking())
                })
                .await;
                match staged {
                    Ok(staged) => staged,
                    Err(e) => {
                        warn!("Staging {:?} failed: {}", self.name, e);
                        (Vec::new(), Vec::new())
                    }
                }
            }
            _ => (Vec::new(), Vec::new()),
        }
    }

    fn stage_blocking(&self) -> Vec<ChildSpec> {
        match &self.kind {
            NodeKind::Root => crate::root::compose::top_level_specs(&self.ctx),
            NodeKind::Folder(agg) => agg.stage(&self.ctx),
            NodeKind::Archive(archive) => archive.stage(),
            NodeKind::Disc(disc) => disc.stage(),
            NodeKind::Playlist(playlist) => playlist.stage(),
            _ => Vec::new(),
        }
    }

    async fn materialize(self: &Arc<Self>, spec: ChildSpec, ordinal: u64, analyze: bool) -> Option<NodeRef> {
        let (name, kind) = match spec {
            ChildSpec::Entry(path) => return self.materialize_entry(path, ordinal, analyze).await,
            ChildSpec::Track(track) => return self.materialize_track(track, ordinal, analyze).await,
            ChildSpec::SharedFolder { path, name } => (
                name.unwrap_or_else(|| file_name_string(&path)),
                NodeKind::Folder(Aggregator::new(vec![path])),
            ),
            ChildSpec::Bundle(conf) => (conf.name.clone(), NodeKind::Folder(Aggregator::bundle(&conf))),
            ChildSpec::Bucket {
                directories,
                letter,
                entries,
            } => (
                letter.to_string(),
                NodeKind::Folder(Aggregator::bucket(directories, letter, entries)),
            ),
            ChildSpec::Group { name, children } => (name, NodeKind::Group(children)),
            ChildSpec::LibrarySection(kind) => {
                (section_name(kind).to_string(), NodeKind::LibrarySection(kind))
            }
            ChildSpec::Feed(feed) => (feed.name.clone(), NodeKind::Feed(feed)),
            ChildSpec::Stream(stream) => (stream.name.clone(), NodeKind::Stream(stream)),
            ChildSpec::ArchiveEntry(entry) => (entry.display_name(), NodeKind::ArchiveEntry(entry)),
            ChildSpec::DiscTitle(title) => (title.name(), NodeKind::DiscTitle(title)),
        };
        Some(self.spawn_child(ordinal, name, kind))
    }

    async fn materialize_entry(self: &Arc<Self>, path: PathBuf, ordinal: u64, analyze: bool) -> Option<NodeRef> {
        let ctx = Arc::clone(&self.ctx);
        let probe = path.clone();
        let class = match tokio::task::spawn_blocking(move || classify_entry(&probe, &ctx)).await {
            Ok(class) => class,
            Err(e) => {
                warn!("Failed to inspect {:?}: {}", path, e);
                return None;
            }
        };

        let (name, kind) = match class {
            EntryClass::Skip => return None,
            EntryClass::Empty => {
                if let Some(agg) = self.aggregator() {
                    agg.note_empty(path);
                }
                return None;
            }
            EntryClass::Archive(archive) => {
                (display_name(&file_name_string(&path)), NodeKind::Archive(archive))
            }
            EntryClass::Disc(disc) => (disc.display_name(), NodeKind::Disc(disc)),
            EntryClass::Playlist(playlist) => (file_name_string(&path), NodeKind::Playlist(playlist)),
            EntryClass::Folder { name } => (name, NodeKind::Folder(Aggregator::new(vec![path]))),
            EntryClass::File { format, modified } => {
                if self.aggregator().is_some_and(|a| a.is_rejected(&path, modified)) {
                    trace!("Skipping {:?}, it was found invalid before", path);
                    return None;
                }
                let file = FileNode::new(path.clone(), format, modified);
                if analyze && !self.admit(&file).await {
                    return None;
                }
                (display_name(&file_name_string(&path)), NodeKind::File(file))
            }
        };
        Some(self.spawn_child(ordinal, name, kind))
    }

    async fn materialize_track(self: &Arc<Self>, track: CueTrack, ordinal: u64, analyze: bool) -> Option<NodeRef> {
        let Some(format) = self.ctx.classifier.classify(&track.file) else {
            debug!("Cue sheet refers to unsupported file {:?}", track.file);
            return None;
        };
        let probe = track.file.clone();
        let modified = tokio::task::spawn_blocking(move || modified_millis(&probe))
            .await
            .ok()
            .flatten();
        let Some(modified) = modified else {
            debug!("Cue sheet refers to missing file {:?}", track.file);
            return None;
        };

        let name = track.display_name();
        let tags = TrackTags {
            number: track.number,
            title: track.title,
            performer: track.performer,
        };
        let file = FileNode::track(track.file, format, modified, tags, track.span);
        if analyze && !self.admit(&file).await {
            return None;
        }
        Some(self.spawn_child(ordinal, name, NodeKind::File(file)))
    }

    /// Resolve a file about to be added; invalid files are remembered and left out
    async fn admit(&self, file: &FileNode) -> bool {
        if file.resolve(&self.ctx).await.is_invalid() {
            info!("{:?} is not a valid media file and was left out", file.path());
            if let Some(agg) = self.aggregator() {
                agg.reject(file.path().to_path_buf(), file.modified());
            }
            return false;
        }
        true
    }

    // ============ Leaves ============

    /// Resolve a file leaf; an invalid leaf is removed from its parent
    pub async fn resolve(self: &Arc<Self>) -> Validity {
        let NodeKind::File(file) = &self.kind else {
            return Validity::Valid;
        };

        let validity = file.resolve(&self.ctx).await;
        if validity.is_invalid() {
            if let Some(parent) = self.parent() {
                info!("{:?} is not a valid media file and was removed", file.path());
                if let Some(agg) = parent.aggregator() {
                    agg.reject(file.path().to_path_buf(), file.modified());
                }
                parent.remove_child(&self.id).await;
            }
        }
        validity
    }

    /// Load what a scan needs up front; reads disc structures
    pub async fn pre_resolve(self: &Arc<Self>) {
        if !matches!(self.kind, NodeKind::Disc(_)) {
            return;
        }
        let node = Arc::clone(self);
        let loaded = tokio::task::spawn_blocking(move || match &node.kind {
            NodeKind::Disc(disc) => disc.titles().len(),
            _ => 0,
        })
        .await;
        if let Ok(count) = loaded {
            debug!("{:?} has {} titles", self.name, count);
        }
    }

    /// Byte stream of a leaf
    pub fn open_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.kind {
            NodeKind::File(file) => Ok(Box::new(File::open(file.path())?)),
            NodeKind::ArchiveEntry(entry) => entry.open(),
            NodeKind::DiscTitle(title) => title.open(),
            NodeKind::Stream(stream) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is served remotely", stream.url),
            )),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is a folder", self.name),
            )),
        }
    }

    // ============ Thumbnails ============

    /// Where this node's artwork comes from
    pub async fn thumbnail(self: &Arc<Self>) -> Thumbnail {
        if self.file().is_some_and(|f| f.validity() == Validity::Pending) {
            self.resolve().await;
        }
        let node = Arc::clone(self);
        tokio::task::spawn_blocking(move || node.lookup_thumbnail())
            .await
            .unwrap_or(Thumbnail::Generic(Placeholder::Other))
    }

    /// Rendered JPEG of the thumbnail, when a thumbnail cache is configured
    pub async fn thumbnail_file(self: &Arc<Self>) -> Option<PathBuf> {
        let thumbnail = self.thumbnail().await;
        let fallback = Placeholder::for_kind(self.media_kind().unwrap_or(MediaKind::Unknown));
        let ctx = Arc::clone(&self.ctx);

        tokio::task::spawn_blocking(move || {
            let cache = ctx.thumbnails.as_ref()?;
            match cache.render(&thumbnail) {
                Ok(path) => path,
                Err(e) => {
                    debug!("Can't render thumbnail: {:#}", e);
                    cache.placeholder(fallback).ok()
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    fn lookup_thumbnail(&self) -> Thumbnail {
        match &self.kind {
            NodeKind::File(file) => self.file_thumbnail(file),
            NodeKind::Folder(agg) => agg
                .directories()
                .first()
                .and_then(|dir| find_folder_thumbnail(dir))
                .map(Thumbnail::File)
                .unwrap_or(Thumbnail::Generic(Placeholder::Folder)),
            NodeKind::Feed(feed) => feed
                .thumbnail
                .clone()
                .map(Thumbnail::Remote)
                .unwrap_or(Thumbnail::Generic(Placeholder::Folder)),
            NodeKind::Stream(stream) => stream
                .thumbnail
                .clone()
                .map(Thumbnail::Remote)
                .unwrap_or(Thumbnail::Generic(Placeholder::for_kind(stream.kind))),
            NodeKind::ArchiveEntry(entry) => {
                Thumbnail::Generic(Placeholder::for_kind(entry.media.kind))
            }
            NodeKind::Disc(_) | NodeKind::DiscTitle(_) => Thumbnail::Generic(Placeholder::Video),
            _ => Thumbnail::Generic(Placeholder::Folder),
        }
    }

    fn file_thumbnail(&self, file: &FileNode) -> Thumbnail {
        let path = file.path();

        if let Some(alt) = &self.ctx.config.alternate_thumb_folder {
            if let Some(found) = find_file_thumbnail(path, alt) {
                return Thumbnail::File(found);
            }
        }
        if let Some(found) = path.parent().and_then(|dir| find_file_thumbnail(path, dir)) {
            return Thumbnail::File(found);
        }
        if file.kind() == MediaKind::Audio {
            let cover = self
                .parent()
                .and_then(|parent| parent.aggregator().and_then(Aggregator::potential_cover));
            if let Some(cover) = cover {
                return Thumbnail::File(cover);
            }
        }
        if let Some(art) = file.info().and_then(|info| info.embedded_art.clone()) {
            return Thumbnail::Embedded(art);
        }
        if file.kind() == MediaKind::Image {
            return Thumbnail::File(path.to_path_buf());
        }
        Thumbnail::Generic(Placeholder::for_kind(file.kind()))
    }

    // ============ Lookup ============

    /// Find a descendant by id, discovering intermediate nodes
    pub async fn find(self: &Arc<Self>, id: &str) -> Option<NodeRef> {
        if id == self.id {
            return Some(Arc::clone(self));
        }
        let rest = id.strip_prefix(self.id.as_str())?.strip_prefix('$')?;

        let mut node = Arc::clone(self);
        let mut current = self.id.clone();
        for ordinal in rest.split('$') {
            node.discover().await;
            current = format!("{}${}", current, ordinal);
            let next = node.children().iter().find(|c| c.id == current).cloned()?;
            node = next;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryMetadataCache;
    use crate::config::LibraryConfig;
    use crate::testing::{CountingAnalyzer, context_with, folder_node, memory_context, touch};
    use filetime::{FileTime, set_file_mtime};

    fn names(node: &Node) -> Vec<String> {
        node.children().iter().map(|c| c.name().to_string()).collect()
    }

    fn past(path: &Path) {
        set_file_mtime(path, FileTime::from_unix_time(1_500_000_000, 0)).unwrap();
    }

    #[tokio::test]
    async fn test_discover_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("b.mp3"));

        let analyzer = Arc::new(CountingAnalyzer::new());
        let ctx = context_with(
            LibraryConfig::default(),
            Arc::new(MemoryMetadataCache::new()),
            analyzer.clone(),
        );
        let node = folder_node(&ctx, dir.path());

        node.discover().await;
        let first = node.children();
        node.discover().await;

        assert!(node.is_discovered());
        assert!(Arc::ptr_eq(&first, &node.children()));
        assert_eq!(analyzer.calls(), 2);
        assert_eq!(names(&node), vec!["a.mp3", "b.mp3"]);
        assert_eq!(first[1].id(), "0$1");
    }

    #[tokio::test]
    async fn test_pagination_matches_full_population() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=7 {
            touch(&dir.path().join(format!("track {}.mp3", i)));
        }
        touch(&dir.path().join("sub/inner.mp3"));
        std::fs::write(dir.path().join("zero.mp3"), b"").unwrap();

        let ctx = memory_context(LibraryConfig::default());
        let paged = folder_node(&ctx, dir.path());
        let mut rounds = 0;
        while !paged.populate(Some(3)).await {
            rounds += 1;
            assert!(!paged.is_discovered());
        }
        assert!(rounds >= 2);

        let full = folder_node(&ctx, dir.path());
        full.discover().await;

        assert_eq!(names(&paged), names(&full));
        assert_eq!(names(&full)[0], "sub");
        assert_eq!(full.children().len(), 8);
        let ids: Vec<_> = paged.children().iter().map(|c| c.id().to_string()).collect();
        let expected: Vec<_> = (0..8).map(|i| format!("0${}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_concurrent_discovery_populates_once() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            touch(&dir.path().join(format!("{}.mp3", i)));
        }
        let analyzer = Arc::new(CountingAnalyzer::new());
        let ctx = context_with(
            LibraryConfig::default(),
            Arc::new(MemoryMetadataCache::new()),
            analyzer.clone(),
        );
        let node = folder_node(&ctx, dir.path());

        let a = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.discover().await }
        });
        let b = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.discover().await }
        });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(node.children().len(), 20);
        assert_eq!(analyzer.calls(), 20);
    }

    #[tokio::test]
    async fn test_empty_folder_recheck() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("song.mp3"));
        std::fs::create_dir(dir.path().join("later")).unwrap();
        touch(&dir.path().join("later/notes.txt"));
        past(&dir.path().join("later"));
        past(dir.path());

        let ctx = memory_context(LibraryConfig::default());
        let node = folder_node(&ctx, dir.path());
        node.discover().await;

        assert_eq!(names(&node), vec!["song.mp3"]);
        let agg = node.aggregator().unwrap();
        assert_eq!(agg.pending_recheck(), vec![dir.path().join("later")]);
        assert!(!node.needs_refresh().await);

        touch(&dir.path().join("later/found.mp3"));
        assert!(node.needs_refresh().await);

        node.refresh().await;
        assert_eq!(names(&node), vec!["later", "song.mp3"]);
        assert!(agg.pending_recheck().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_swaps_children() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        past(dir.path());

        let ctx = memory_context(LibraryConfig::default());
        let node = folder_node(&ctx, dir.path());
        node.discover().await;
        let before = node.children();
        assert!(!node.needs_refresh().await);

        touch(&dir.path().join("b.mp3"));
        assert!(node.needs_refresh().await);
        node.refresh().await;

        assert_eq!(before.len(), 1);
        assert_eq!(names(&node), vec!["a.mp3", "b.mp3"]);
        assert!(!Arc::ptr_eq(&before, &node.children()));

        node.mark_dirty();
        assert!(node.needs_refresh().await);
    }

    #[tokio::test]
    async fn test_change_during_population_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        past(dir.path());

        let slot: Arc<std::sync::OnceLock<NodeRef>> = Arc::new(std::sync::OnceLock::new());
        let added = dir.path().join("b.mp3");
        let analyzer = Arc::new(CountingAnalyzer::new().on_call({
            let slot = Arc::clone(&slot);
            move |count| {
                if count == 1 {
                    touch(&added);
                    if let Some(node) = slot.get() {
                        node.mark_dirty();
                    }
                }
            }
        }));
        let ctx = context_with(
            LibraryConfig::default(),
            Arc::new(MemoryMetadataCache::new()),
            analyzer,
        );
        let node = folder_node(&ctx, dir.path());
        slot.set(Arc::clone(&node)).unwrap();

        node.discover_analyzed().await;
        assert_eq!(names(&node), vec!["a.mp3"]);
        assert!(node.is_dirty());
        assert!(node.needs_refresh().await);

        node.refresh().await;
        assert_eq!(names(&node), vec!["a.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_source_time_near_staging_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        assert!(!node.is_dirty());
        assert!(node.needs_refresh().await);

        past(dir.path());
        assert!(node.needs_refresh().await);
        node.refresh().await;
        assert!(!node.needs_refresh().await);
    }

    #[tokio::test]
    async fn test_random_order_always_needs_refresh() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        past(dir.path());

        let config = LibraryConfig {
            sort_method: 5,
            ..Default::default()
        };
        let node = folder_node(&memory_context(config), dir.path());
        node.discover().await;
        assert!(node.needs_refresh().await);
    }

    #[tokio::test]
    async fn test_invalid_files_are_left_out_and_remembered() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("good.mp3"));
        touch(&dir.path().join("locked.mp3"));

        let analyzer = Arc::new(CountingAnalyzer::new().encrypted("locked.mp3"));
        let ctx = context_with(
            LibraryConfig {
                use_cache: false,
                ..Default::default()
            },
            Arc::new(MemoryMetadataCache::new()),
            analyzer.clone(),
        );
        let node = folder_node(&ctx, dir.path());
        node.discover().await;
        assert_eq!(names(&node), vec!["good.mp3"]);
        assert_eq!(analyzer.calls(), 2);

        // Unchanged invalid files are not analyzed again
        node.refresh().await;
        assert_eq!(names(&node), vec!["good.mp3"]);
        assert_eq!(analyzer.calls(), 3);
    }

    #[tokio::test]
    async fn test_browse_time_resolution_prunes_invalid_leaf() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("good.mp3"));
        touch(&dir.path().join("locked.mp3"));

        let analyzer = Arc::new(CountingAnalyzer::new().encrypted("locked.mp3"));
        let ctx = context_with(
            LibraryConfig {
                analyze_on_discovery: false,
                ..Default::default()
            },
            Arc::new(MemoryMetadataCache::new()),
            analyzer.clone(),
        );
        let node = folder_node(&ctx, dir.path());
        node.discover().await;
        assert_eq!(node.children().len(), 2);
        assert_eq!(analyzer.calls(), 0);

        let locked = Arc::clone(&node.children()[1]);
        assert_eq!(locked.resolve().await, Validity::Protected);
        assert_eq!(names(&node), vec!["good.mp3"]);
    }

    #[tokio::test]
    async fn test_release_children_allows_rediscovery() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        node.release_children();
        assert!(!node.is_discovered());
        assert!(node.children().is_empty());

        node.discover().await;
        assert_eq!(names(&node), vec!["a.mp3"]);
    }

    #[tokio::test]
    async fn test_prune_path_removes_file_and_folder_children() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("b.mp3"));
        touch(&dir.path().join("sub/c.mp3"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        assert_eq!(node.prune_path(&dir.path().join("a.mp3")).await, 1);
        assert_eq!(node.prune_path(&dir.path().join("sub")).await, 1);
        assert_eq!(names(&node), vec!["b.mp3"]);
    }

    #[tokio::test]
    async fn test_find_by_id_discovers_lazily() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Album/01.mp3"));
        touch(&dir.path().join("Album/02.mp3"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        let found = node.find("0$0$1").await.unwrap();
        assert_eq!(found.name(), "02.mp3");
        assert_eq!(found.parent().unwrap().name(), "Album");
        assert!(node.find("0$5").await.is_none());
        assert!(node.find("1$0").await.is_none());
        assert_eq!(node.find("0").await.unwrap().id(), "0");
    }

    #[tokio::test]
    async fn test_file_thumbnail_chain() {
        let dir = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one.mp3"));
        touch(&dir.path().join("one.jpg"));
        touch(&dir.path().join("two.mp3"));
        touch(&dir.path().join("three.mp3"));
        touch(&dir.path().join("folder.png"));
        touch(&alt.path().join("three.png"));

        let config = LibraryConfig {
            alternate_thumb_folder: Some(alt.path().to_path_buf()),
            ..Default::default()
        };
        let node = folder_node(&memory_context(config), dir.path());
        node.discover().await;
        assert_eq!(names(&node), vec!["one.mp3", "three.mp3", "two.mp3"]);

        let children = node.children();
        assert_eq!(
            children[0].thumbnail().await,
            Thumbnail::File(dir.path().join("one.jpg"))
        );
        assert_eq!(
            children[1].thumbnail().await,
            Thumbnail::File(alt.path().join("three.png"))
        );
        assert_eq!(
            children[2].thumbnail().await,
            Thumbnail::File(dir.path().join("folder.png"))
        );
        assert_eq!(
            node.thumbnail().await,
            Thumbnail::File(dir.path().join("folder.png"))
        );
    }

    #[tokio::test]
    async fn test_hidden_thumbnail_is_served_whatever_its_case() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Movie.mkv"));
        touch(&dir.path().join("movie.jpg"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        assert_eq!(names(&node), vec!["Movie.mkv"]);
        assert_eq!(
            node.children()[0].thumbnail().await,
            Thumbnail::File(dir.path().join("movie.jpg"))
        );
    }

    #[tokio::test]
    async fn test_video_without_artwork_gets_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("clip.mkv"));
        touch(&dir.path().join("folder.jpg"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        assert_eq!(
            node.children()[0].thumbnail().await,
            Thumbnail::Generic(Placeholder::Video)
        );
    }

    #[tokio::test]
    async fn test_disc_image_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        crate::tree::disc::tests::build_iso(&dir.path().join("movie.iso"));

        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        node.discover().await;
        let disc = Arc::clone(&node.children()[0]);
        assert_eq!(disc.kind_name(), "disc");
        assert_eq!(disc.name(), "movie.iso");

        disc.pre_resolve().await;
        disc.discover().await;
        let title = Arc::clone(&disc.children()[0]);
        assert_eq!(title.name(), "Title 1");
        assert_eq!(title.length(), Some(8));

        let mut data = Vec::new();
        title.open_stream().unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hello!!!");
    }

    #[tokio::test]
    async fn test_cue_sheet_tracks_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("live.flac"));
        std::fs::write(
            dir.path().join("live.cue"),
            "FILE \"live.flac\" WAVE\nTRACK 01 AUDIO\nTITLE \"One\"\nINDEX 01 00:00:00\nTRACK 02 AUDIO\nINDEX 01 01:00:00\n",
        )
        .unwrap();

        let analyzer = Arc::new(CountingAnalyzer::new().with_duration(100.0));
        let ctx = context_with(
            LibraryConfig::default(),
            Arc::new(MemoryMetadataCache::new()),
            analyzer,
        );
        let node = folder_node(&ctx, dir.path());
        node.discover().await;
        assert_eq!(names(&node), vec!["live.cue", "live.flac"]);

        let playlist = Arc::clone(&node.children()[0]);
        playlist.discover().await;
        assert_eq!(names(&playlist), vec!["01 - One", "Track 02"]);

        let second = playlist.children()[1].file().unwrap().info().unwrap();
        assert_eq!(second.duration_secs, Some(40.0));
        assert_eq!(playlist.children()[1].file().unwrap().sub_track(), 2);
    }

    #[tokio::test]
    async fn test_archive_entries_in_folder() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let mut zip = zip::ZipWriter::new(File::create(dir.path().join("songs.zip")).unwrap());
        zip.start_file("one.mp3", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"mp3 bytes").unwrap();
        zip.finish().unwrap();

        let config = LibraryConfig {
            enable_archive_browsing: true,
            ..Default::default()
        };
        let node = folder_node(&memory_context(config), dir.path());
        node.discover().await;
        let archive = Arc::clone(&node.children()[0]);
        assert_eq!(archive.kind_name(), "archive");

        archive.discover().await;
        let entry = Arc::clone(&archive.children()[0]);
        assert_eq!(entry.name(), "one.mp3");
        assert_eq!(entry.length(), Some(9));
        assert!(!entry.is_folder());
    }

    #[tokio::test]
    async fn test_open_stream_on_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let node = folder_node(&memory_context(LibraryConfig::default()), dir.path());
        assert!(node.open_stream().is_err());
    }
}
