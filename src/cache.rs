//! Metadata cache
//!
//! Memoizes analyzed metadata keyed by path, modification time and sub
//! track. An entry is only valid while the file's modification time is
//! unchanged; any mismatch is reported as a miss and the next `put`
//! overwrites it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::media::{MediaInfo, MediaKind};
use crate::utils::{is_within, modified_millis};

/// Cache lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    /// Modification time in milliseconds since the epoch
    pub modified: i64,
    /// 0 for the whole file, 1.. for tracks of a cue sheet
    pub sub_track: u32,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, modified: i64) -> Self {
        Self {
            path: path.into(),
            modified,
            sub_track: 0,
        }
    }

    pub fn with_sub_track(mut self, sub_track: u32) -> Self {
        self.sub_track = sub_track;
        self
    }
}

/// One stored cache row
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub sub_track: u32,
    pub modified: i64,
    pub info: Arc<MediaInfo>,
}

/// Keyed store of analyzed metadata
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Cached metadata, `None` when absent or stale for `key.modified`
    async fn get(&self, key: &CacheKey) -> Result<Option<MediaInfo>, CacheError>;

    /// Insert or overwrite the entry for `(path, sub_track)`
    async fn put(&self, key: &CacheKey, info: &MediaInfo) -> Result<(), CacheError>;

    /// Remove every sub track of one file, returns rows removed
    async fn remove_entry(&self, path: &Path) -> Result<u64, CacheError>;

    /// Remove every entry below a directory, returns rows removed
    async fn remove_under_path(&self, dir: &Path) -> Result<u64, CacheError>;

    /// Drop entries whose file vanished or whose modification time changed
    async fn cleanup(&self) -> Result<u64, CacheError>;

    /// All entries, optionally restricted to one kind, ordered by path
    async fn entries(&self, kind: Option<MediaKind>) -> Result<Vec<CacheEntry>, CacheError>;
}

/// Cache operation errors
#[derive(Debug, Clone)]
pub enum CacheError {
    Io(String),
    Database(String),
    Serialize(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Cache IO error: {}", e),
            CacheError::Database(e) => write!(f, "Cache database error: {}", e),
            CacheError::Serialize(e) => write!(f, "Cache serialization error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

const SHARD_COUNT: usize = 16;

type ShardMap = HashMap<(PathBuf, u32), (i64, Arc<MediaInfo>)>;

/// In-process cache sharded by path hash
///
/// Writers only lock the shard owning their key.
#[derive(Debug)]
pub struct MemoryMetadataCache {
    shards: Vec<RwLock<ShardMap>>,
}

impl Default for MemoryMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMetadataCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, path: &Path) -> &RwLock<ShardMap> {
        let hash = xxh3_64(path.as_os_str().as_encoded_bytes());
        &self.shards[(hash % SHARD_COUNT as u64) as usize]
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_where(&self, predicate: impl Fn(&Path) -> bool) -> u64 {
        let mut removed = 0u64;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|(path, _), _| !predicate(path));
            removed += (before - map.len()) as u64;
        }
        removed
    }
}

#[async_trait]
impl MetadataCache for MemoryMetadataCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<MediaInfo>, CacheError> {
        let shard = self.shard(&key.path).read();
        Ok(shard
            .get(&(key.path.clone(), key.sub_track))
            .filter(|(modified, _)| *modified == key.modified)
            .map(|(_, info)| info.as_ref().clone()))
    }

    async fn put(&self, key: &CacheKey, info: &MediaInfo) -> Result<(), CacheError> {
        self.shard(&key.path).write().insert(
            (key.path.clone(), key.sub_track),
            (key.modified, Arc::new(info.clone())),
        );
        Ok(())
    }

    async fn remove_entry(&self, path: &Path) -> Result<u64, CacheError> {
        let mut shard = self.shard(path).write();
        let before = shard.len();
        shard.retain(|(p, _), _| p != path);
        Ok((before - shard.len()) as u64)
    }

    async fn remove_under_path(&self, dir: &Path) -> Result<u64, CacheError> {
        Ok(self.remove_where(|path| path != dir && is_within(path, dir)))
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        // Stat outside the shard locks
        let rows: Vec<(PathBuf, i64)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .iter()
                    .map(|((path, _), (modified, _))| (path.clone(), *modified))
                    .collect::<Vec<_>>()
            })
            .collect();

        let stale: Vec<PathBuf> = rows
            .into_iter()
            .filter(|(path, modified)| modified_millis(path) != Some(*modified))
            .map(|(path, _)| path)
            .collect();

        let mut removed = 0u64;
        for path in stale {
            debug!("Removing stale cache entry {:?}", path);
            let mut shard = self.shard(&path).write();
            let before = shard.len();
            shard.retain(|(p, _), (modified, _)| {
                p != &path || modified_millis(p) == Some(*modified)
            });
            removed += (before - shard.len()) as u64;
        }
        Ok(removed)
    }

    async fn entries(&self, kind: Option<MediaKind>) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries: Vec<CacheEntry> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .iter()
                    .filter(|(_, (_, info))| kind.is_none_or(|k| info.kind == k))
                    .map(|((path, sub_track), (modified, info))| CacheEntry {
                        path: path.clone(),
                        sub_track: *sub_track,
                        modified: *modified,
                        info: Arc::clone(info),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path).then(a.sub_track.cmp(&b.sub_track)));
        Ok(entries)
    }
}
