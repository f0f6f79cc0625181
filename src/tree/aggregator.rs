//! Directory aggregation
//!
//! Merges one or more real directories into one logical folder and decides
//! which of their entries become children:
//! - Denylisted, hidden and unclassified entries are dropped
//! - Folder artwork is set aside as the folder's cover
//! - Images named after a sibling media file are hidden
//! - Oversized folders are split into letter buckets
//! - Remaining entries are ordered, directories first

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::archive::ArchiveSource;
use super::disc::DiscSource;
use super::node::ChildSpec;
use super::playlist::PlaylistSource;
use super::sorting::{SortMethod, bucket_letter, sort_items};
use crate::config::VirtualFolderConf;
use crate::context::LibraryContext;
use crate::media::{
    Format, FormatClassifier, MediaKind, is_denylisted, is_folder_thumbnail,
    is_potential_thumbnail, thumbnail_candidates,
};
use crate::utils::{extension_lowercase, file_name_string, is_hidden, system_time_millis};

/// A directory entry with the metadata staging needs
#[derive(Debug, Clone)]
struct Listed {
    path: PathBuf,
    name: String,
    is_dir: bool,
    modified: i64,
}

#[derive(Debug, Default)]
struct AggregatorState {
    /// Folder artwork found by the last staging
    potential_cover: Option<PathBuf>,
    /// Subdirectories skipped as empty, checked again by `needs_refresh`
    pending_recheck: Vec<PathBuf>,
    /// Files found invalid, by the modification time they had then
    rejected: HashMap<PathBuf, i64>,
}

/// One logical folder backed by real directories
#[derive(Debug)]
pub struct Aggregator {
    directories: Vec<PathBuf>,
    bundles: Vec<VirtualFolderConf>,
    /// Set on letter buckets of a split folder
    letter: Option<char>,
    /// Entries handed over by the folder that created this bucket
    preset: Mutex<Option<Vec<PathBuf>>>,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            bundles: Vec::new(),
            letter: None,
            preset: Mutex::new(None),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Virtual folder: its nested bundles come before the merged entries
    pub fn bundle(conf: &VirtualFolderConf) -> Self {
        Self {
            bundles: conf.children.clone(),
            ..Self::new(conf.files.clone())
        }
    }

    /// Letter bucket of a split folder
    pub(crate) fn bucket(directories: Vec<PathBuf>, letter: char, entries: Vec<PathBuf>) -> Self {
        Self {
            letter: Some(letter),
            preset: Mutex::new(Some(entries)),
            ..Self::new(directories)
        }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn letter(&self) -> Option<char> {
        self.letter
    }

    /// Whether `dir` is one of the backing directories
    pub fn owns(&self, dir: &Path) -> bool {
        self.directories.iter().any(|d| d == dir)
    }

    pub fn potential_cover(&self) -> Option<PathBuf> {
        self.state.lock().potential_cover.clone()
    }

    pub fn pending_recheck(&self) -> Vec<PathBuf> {
        self.state.lock().pending_recheck.clone()
    }

    pub(crate) fn note_empty(&self, dir: PathBuf) {
        self.state.lock().pending_recheck.push(dir);
    }

    pub(crate) fn reject(&self, path: PathBuf, modified: i64) {
        self.state.lock().rejected.insert(path, modified);
    }

    /// Whether the file was found invalid at this modification time
    pub(crate) fn is_rejected(&self, path: &Path, modified: i64) -> bool {
        self.state.lock().rejected.get(path) == Some(&modified)
    }

    /// Compute the ordered child candidates; blocking
    pub(crate) fn stage(&self, ctx: &LibraryContext) -> Vec<ChildSpec> {
        let config = &ctx.config;
        let ignore_articles = config.ignore_the_word_a_and_the;
        let method = config.sort_method_for(self.directories.first().map(PathBuf::as_path));

        self.state.lock().pending_recheck.clear();

        let mut specs: Vec<ChildSpec> = self.bundles.iter().cloned().map(ChildSpec::Bundle).collect();

        let preset = self.preset.lock().take();
        let listed = match preset {
            Some(paths) => describe(paths),
            None => {
                let mut listed = self.list_entries(ctx);
                if let Some(letter) = self.letter {
                    listed.retain(|e| bucket_letter(&e.name, ignore_articles) == letter);
                }
                listed
            }
        };

        let (entries, cover) = set_aside_thumbnails(listed, ctx.classifier.as_ref());
        self.state.lock().potential_cover = cover;

        if self.letter.is_none() && entries.len() > config.effective_atz_limit() {
            debug!(
                "Splitting {:?} into letter buckets ({} entries)",
                self.directories,
                entries.len()
            );
            specs.extend(self.buckets(entries, ctx, method));
            return specs;
        }

        let (mut dirs, mut files): (Vec<Listed>, Vec<Listed>) =
            entries.into_iter().partition(|e| e.is_dir);

        let dir_method = match method {
            SortMethod::Random => SortMethod::Natural,
            other => other,
        };
        sort_items(&mut dirs, dir_method, ignore_articles, |e| &e.name, |e| e.modified);
        sort_items(&mut files, method, ignore_articles, |e| &e.name, |e| e.modified);

        specs.extend(dirs.into_iter().chain(files).map(|e| ChildSpec::Entry(e.path)));
        specs
    }

    fn list_entries(&self, ctx: &LibraryContext) -> Vec<Listed> {
        let mut paths = Vec::new();
        for dir in &self.directories {
            if !dir.is_dir() {
                trace!("Ignoring {:?} because it is not a valid directory", dir);
                continue;
            }
            if ctx.config.is_ignored_name(&file_name_string(dir)) {
                debug!("Ignoring {:?} because its name is on the ignore list", dir);
                continue;
            }
            match fs::read_dir(dir) {
                Ok(read_dir) => paths.extend(read_dir.flatten().map(|e| e.path())),
                Err(e) => warn!("Can't read directory {:?}: {}", dir, e),
            }
        }

        describe(paths)
            .into_iter()
            .filter(|e| {
                if is_hidden(&e.path) {
                    trace!("Ignoring hidden entry {:?}", e.path);
                    return false;
                }
                if e.is_dir {
                    return true;
                }
                if is_denylisted(&e.path) {
                    trace!("Ignoring denylisted file {:?}", e.path);
                    return false;
                }
                ctx.classifier.classify(&e.path).is_some()
            })
            .collect()
    }

    fn buckets(&self, entries: Vec<Listed>, ctx: &LibraryContext, method: SortMethod) -> Vec<ChildSpec> {
        let ignore_articles = ctx.config.ignore_the_word_a_and_the;
        let mut map: BTreeMap<char, Vec<Listed>> = BTreeMap::new();

        for entry in entries {
            if entry.is_dir && is_elided_dir(&entry.path, ctx) {
                self.note_empty(entry.path);
                continue;
            }
            map.entry(bucket_letter(&entry.name, ignore_articles))
                .or_default()
                .push(entry);
        }

        map.into_iter()
            .map(|(letter, mut list)| {
                sort_items(&mut list, method, ignore_articles, |e| &e.name, |e| e.modified);
                ChildSpec::Bucket {
                    directories: self.directories.clone(),
                    letter,
                    entries: list.into_iter().map(|e| e.path).collect(),
                }
            })
            .collect()
    }

    /// Changes the directory times do not show
    ///
    /// True for random ordering and when a directory skipped as empty now
    /// has media.
    pub(crate) fn needs_refresh(&self, ctx: &LibraryContext) -> bool {
        let method = ctx
            .config
            .sort_method_for(self.directories.first().map(PathBuf::as_path));
        if method == SortMethod::Random {
            return true;
        }

        let pending = self.pending_recheck();
        pending.iter().any(|dir| is_folder_relevant(dir, ctx))
    }
}

fn describe(paths: Vec<PathBuf>) -> Vec<Listed> {
    paths
        .into_par_iter()
        .filter_map(|path| {
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping {:?}: {}", path, e);
                    return None;
                }
            };
            Some(Listed {
                name: file_name_string(&path),
                is_dir: meta.is_dir(),
                modified: meta.modified().map(system_time_millis).unwrap_or(0),
                path,
            })
        })
        .collect()
}

/// Remove thumbnail images from a listing
///
/// Folder artwork is returned as the cover (first by name). Images named
/// after a sibling audio or video file are dropped.
fn set_aside_thumbnails(
    entries: Vec<Listed>,
    classifier: &dyn FormatClassifier,
) -> (Vec<Listed>, Option<PathBuf>) {
    let mut covers = Vec::new();
    let mut matched = HashSet::new();

    for entry in entries.iter().filter(|e| !e.is_dir) {
        if is_potential_thumbnail(&entry.path) {
            if is_folder_thumbnail(&entry.path) {
                covers.push(entry.path.clone());
            }
            continue;
        }
        let is_av = classifier
            .classify(&entry.path)
            .is_some_and(|f| matches!(f.kind, MediaKind::Audio | MediaKind::Video));
        if is_av {
            matched.extend(
                thumbnail_candidates(&entry.path)
                    .into_iter()
                    .map(|c| c.to_lowercase()),
            );
        }
    }

    covers.sort();
    let cover = covers.into_iter().next();

    let kept = entries
        .into_iter()
        .filter(|e| {
            if e.is_dir || !is_potential_thumbnail(&e.path) {
                return true;
            }
            !(is_folder_thumbnail(&e.path) || matched.contains(&e.name.to_lowercase()))
        })
        .collect();

    (kept, cover)
}

/// How one staged path becomes a node
#[derive(Debug)]
pub(crate) enum EntryClass {
    Skip,
    /// Directory without media, worth checking again later
    Empty,
    Archive(ArchiveSource),
    Disc(DiscSource),
    Playlist(PlaylistSource),
    Folder { name: String },
    File { format: Format, modified: i64 },
}

/// Decide what a filesystem entry becomes; blocking
pub(crate) fn classify_entry(path: &Path, ctx: &LibraryContext) -> EntryClass {
    let config = &ctx.config;

    if is_hidden(path) {
        trace!("Ignoring hidden entry {:?}", path);
        return EntryClass::Skip;
    }

    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            debug!("Skipping {:?}: {}", path, e);
            return EntryClass::Skip;
        }
    };

    if meta.is_dir() {
        if is_video_ts(path) {
            return EntryClass::Disc(DiscSource::video_ts(path.to_path_buf()));
        }
        let name = file_name_string(path);
        if config.is_ignored_name(&name) {
            debug!("Ignoring {:?} because its name is on the ignore list", path);
            return EntryClass::Skip;
        }
        if is_elided_dir(path, ctx) {
            debug!("Ignoring {:?} because it holds no media", path);
            return EntryClass::Empty;
        }
        return EntryClass::Folder { name };
    }

    match extension_lowercase(path).as_deref() {
        Some("zip" | "cbz" | "tar" | "tgz" | "gz" | "gzip") if config.enable_archive_browsing => {
            if let Some(archive) = ArchiveSource::new(path.to_path_buf()) {
                return EntryClass::Archive(archive);
            }
        }
        Some("rar" | "cbr" | "7z") if config.enable_archive_browsing => {
            debug!("No decoder available for {:?}, skipping", path);
            return EntryClass::Skip;
        }
        Some("iso" | "img") => return EntryClass::Disc(DiscSource::iso(path.to_path_buf())),
        Some("m3u" | "m3u8" | "pls" | "cue") => {
            return EntryClass::Playlist(PlaylistSource::new(path.to_path_buf()));
        }
        _ => {}
    }

    if meta.len() == 0 {
        debug!("Ignoring {:?} because it is empty and probably corrupted", path);
        return EntryClass::Skip;
    }

    let Some(format) = ctx.classifier.classify(path) else {
        trace!("Ignoring {:?} because its format is unknown", path);
        return EntryClass::Skip;
    };
    if !format.kind.is_playable() {
        trace!("Ignoring {:?} ({} files are not listed)", path, format.kind);
        return EntryClass::Skip;
    }

    EntryClass::File {
        format,
        modified: meta.modified().map(system_time_millis).unwrap_or(0),
    }
}

pub(crate) fn is_video_ts(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case("VIDEO_TS"))
}

/// Whether empty-folder hiding excludes this directory
fn is_elided_dir(dir: &Path, ctx: &LibraryContext) -> bool {
    ctx.config.hide_empty_folders && !is_video_ts(dir) && !is_folder_relevant(dir, ctx)
}

/// Whether a directory contains anything worth listing, recursively
pub(crate) fn is_folder_relevant(dir: &Path, ctx: &LibraryContext) -> bool {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .any(|e| {
            if e.file_type().is_dir() {
                return e.depth() > 0 && is_video_ts(e.path());
            }
            is_relevant_file(e.path(), ctx)
        })
}

fn is_relevant_file(path: &Path, ctx: &LibraryContext) -> bool {
    if is_denylisted(path) {
        return false;
    }
    match ctx.classifier.classify(path) {
        Some(format) => match format.kind {
            MediaKind::Subtitle | MediaKind::Unknown => false,
            MediaKind::Archive => ctx.config.enable_archive_browsing,
            _ => true,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::testing::{memory_context, touch};

    fn entry_names(specs: &[ChildSpec]) -> Vec<String> {
        specs
            .iter()
            .map(|spec| match spec {
                ChildSpec::Entry(path) => file_name_string(path),
                ChildSpec::Bucket { letter, .. } => letter.to_string(),
                ChildSpec::Bundle(conf) => conf.name.clone(),
                other => format!("{:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_dirs_first_then_files_naturally() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("track 10.mp3"));
        touch(&dir.path().join("track 2.mp3"));
        touch(&dir.path().join("Zeta/a.mp3"));
        touch(&dir.path().join("alpha/b.mp3"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("setup.exe"));

        let ctx = memory_context(LibraryConfig::default());
        let agg = Aggregator::new(vec![dir.path().to_path_buf()]);
        assert_eq!(
            entry_names(&agg.stage(&ctx)),
            vec!["alpha", "Zeta", "track 2.mp3", "track 10.mp3"]
        );
    }

    #[test]
    fn test_thumbnails_are_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("song.mp3"));
        touch(&dir.path().join("song.jpg"));
        touch(&dir.path().join("song.mp3.cover.png"));
        touch(&dir.path().join("Folder.jpg"));
        touch(&dir.path().join("AlbumArtSmall.jpg"));
        touch(&dir.path().join("holiday.jpg"));

        let ctx = memory_context(LibraryConfig::default());
        let agg = Aggregator::new(vec![dir.path().to_path_buf()]);
        let specs = agg.stage(&ctx);

        assert_eq!(entry_names(&specs), vec!["holiday.jpg", "song.mp3"]);
        assert_eq!(agg.potential_cover(), Some(dir.path().join("AlbumArtSmall.jpg")));
    }

    #[test]
    fn test_atz_split_into_buckets() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["apple.mp3", "avocado.mp3", "banana.mp3", "9 lives.mp3", "Éclair.mp3"] {
            touch(&dir.path().join(name));
        }

        let config = LibraryConfig {
            atz_limit: 3,
            ..Default::default()
        };
        let ctx = memory_context(config);
        let agg = Aggregator::new(vec![dir.path().to_path_buf()]);
        let specs = agg.stage(&ctx);

        assert_eq!(entry_names(&specs), vec!["#", "A", "B", "E"]);
        match &specs[1] {
            ChildSpec::Bucket { entries, .. } => {
                let names: Vec<_> = entries.iter().map(|p| file_name_string(p)).collect();
                assert_eq!(names, vec!["apple.mp3", "avocado.mp3"]);
            }
            other => panic!("expected a bucket, got {:?}", other),
        }
    }

    #[test]
    fn test_small_atz_limit_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp3", "b.mp3", "c.mp3", "d.mp3"] {
            touch(&dir.path().join(name));
        }
        let config = LibraryConfig {
            atz_limit: 2,
            ..Default::default()
        };
        let ctx = memory_context(config);
        let agg = Aggregator::new(vec![dir.path().to_path_buf()]);
        assert_eq!(agg.stage(&ctx).len(), 4);
    }

    #[test]
    fn test_bucket_relists_its_letter_after_preset_is_used() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("apple.mp3"));
        touch(&dir.path().join("banana.mp3"));

        let ctx = memory_context(LibraryConfig::default());
        let bucket = Aggregator::bucket(
            vec![dir.path().to_path_buf()],
            'A',
            vec![dir.path().join("apple.mp3")],
        );
        assert_eq!(entry_names(&bucket.stage(&ctx)), vec!["apple.mp3"]);

        touch(&dir.path().join("apricot.mp3"));
        assert_eq!(
            entry_names(&bucket.stage(&ctx)),
            vec!["apple.mp3", "apricot.mp3"]
        );
    }

    #[test]
    fn test_bundles_come_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mp3"));
        let conf = VirtualFolderConf {
            name: "Mix".to_string(),
            files: vec![dir.path().to_path_buf()],
            children: vec![VirtualFolderConf {
                name: "Nested".to_string(),
                files: Vec::new(),
                children: Vec::new(),
            }],
        };

        let ctx = memory_context(LibraryConfig::default());
        let agg = Aggregator::bundle(&conf);
        assert_eq!(entry_names(&agg.stage(&ctx)), vec!["Nested", "b.mp3"]);
    }

    #[test]
    fn test_classify_entry_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("empty.mp3"), b"").unwrap();
        touch(&root.join("movie.srt"));
        touch(&root.join("song.mp3"));
        touch(&root.join("list.m3u"));
        touch(&root.join("disc.iso"));
        touch(&root.join("comics.cbz"));
        touch(&root.join("comics.rar"));
        touch(&root.join(".hidden.mp3"));
        std::fs::create_dir_all(root.join("Film/VIDEO_TS")).unwrap();
        std::fs::create_dir_all(root.join("nothing/deeper")).unwrap();
        touch(&root.join(".unwanted/a.mp3"));

        let ctx = memory_context(LibraryConfig::default());
        let class = |name: &str| classify_entry(&root.join(name), &ctx);

        assert!(matches!(class("empty.mp3"), EntryClass::Skip));
        assert!(matches!(class("movie.srt"), EntryClass::Skip));
        assert!(matches!(class(".hidden.mp3"), EntryClass::Skip));
        assert!(matches!(class(".unwanted"), EntryClass::Skip));
        assert!(matches!(class("song.mp3"), EntryClass::File { .. }));
        assert!(matches!(class("list.m3u"), EntryClass::Playlist(_)));
        assert!(matches!(class("disc.iso"), EntryClass::Disc(_)));
        assert!(matches!(class("Film/VIDEO_TS"), EntryClass::Disc(_)));
        assert!(matches!(class("Film"), EntryClass::Folder { .. }));
        assert!(matches!(class("nothing"), EntryClass::Empty));
        // Archives are plain unlisted files unless browsing is enabled
        assert!(matches!(class("comics.cbz"), EntryClass::Skip));

        let browsing = memory_context(LibraryConfig {
            enable_archive_browsing: true,
            ..Default::default()
        });
        assert!(matches!(
            classify_entry(&root.join("comics.cbz"), &browsing),
            EntryClass::Archive(_)
        ));
        assert!(matches!(
            classify_entry(&root.join("comics.rar"), &browsing),
            EntryClass::Skip
        ));
    }

    #[test]
    fn test_folder_relevance() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("subs/movie.srt"));
        touch(&dir.path().join("deep/er/still/song.flac"));
        touch(&dir.path().join("hidden/.secret/song.flac"));

        let ctx = memory_context(LibraryConfig::default());
        assert!(!is_folder_relevant(&dir.path().join("subs"), &ctx));
        assert!(is_folder_relevant(&dir.path().join("deep"), &ctx));
        assert!(!is_folder_relevant(&dir.path().join("hidden"), &ctx));
    }

    #[test]
    fn test_rejections_are_keyed_by_mtime() {
        let agg = Aggregator::new(Vec::new());
        agg.reject(PathBuf::from("/m/bad.mp3"), 5);
        assert!(agg.is_rejected(Path::new("/m/bad.mp3"), 5));
        assert!(!agg.is_rejected(Path::new("/m/bad.mp3"), 6));
    }
}
