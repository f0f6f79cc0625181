//! Test doubles shared by the unit tests

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::{MemoryMetadataCache, MetadataCache};
use crate::config::LibraryConfig;
use crate::context::LibraryContext;
use crate::media::{AnalyzeError, AnalyzeOptions, Analyzer, Format, MediaInfo};
use crate::tree::{Aggregator, Node, NodeKind, NodeRef};
use crate::utils::file_name_string;

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// Analyzer that accepts everything and counts its calls
///
/// Files can be singled out by name to look protected, unparseable or
/// broken.
#[derive(Default)]
pub struct CountingAnalyzer {
    calls: AtomicUsize,
    encrypted: HashSet<String>,
    without_container: HashSet<String>,
    failing: HashSet<String>,
    duration: Option<f64>,
    hook: Option<Hook>,
}

impl CountingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encrypted(mut self, name: &str) -> Self {
        self.encrypted.insert(name.to_string());
        self
    }

    pub fn without_container(mut self, name: &str) -> Self {
        self.without_container.insert(name.to_string());
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Run `hook` with the call count after every call
    pub fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for CountingAnalyzer {
    fn analyze(
        &self,
        path: &Path,
        format: &Format,
        _options: &AnalyzeOptions,
    ) -> Result<MediaInfo, AnalyzeError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(count);
        }

        let name = file_name_string(path);
        if self.failing.contains(&name) {
            return Err(AnalyzeError::Decode(format!("{} is broken", name)));
        }

        let size = std::fs::metadata(path)
            .map_err(|e| AnalyzeError::Io(e.to_string()))?
            .len();
        let mut info = MediaInfo::new(format.kind, size);
        info.parsed = true;
        info.duration_secs = self.duration;
        if !self.without_container.contains(&name) {
            info.container = Some(format.id.to_string());
        }
        info.encrypted = self.encrypted.contains(&name);
        Ok(info)
    }
}

pub fn context_with(
    config: LibraryConfig,
    cache: Arc<dyn MetadataCache>,
    analyzer: Arc<dyn Analyzer>,
) -> Arc<LibraryContext> {
    Arc::new(LibraryContext::new(config, cache).with_analyzer(analyzer))
}

/// In-memory cache and a counting analyzer
pub fn memory_context(config: LibraryConfig) -> Arc<LibraryContext> {
    context_with(
        config,
        Arc::new(MemoryMetadataCache::new()),
        Arc::new(CountingAnalyzer::new()),
    )
}

/// Folder node over one directory, heading its own tree
pub fn folder_node(ctx: &Arc<LibraryContext>, dir: &Path) -> NodeRef {
    Node::detached(
        Arc::clone(ctx),
        file_name_string(dir),
        NodeKind::Folder(Aggregator::new(vec![dir.to_path_buf()])),
    )
}

/// Create a small non-empty file, with parent directories
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"data").unwrap();
}
