//! Media library overview built from the metadata cache

use tracing::warn;

use super::node::ChildSpec;
use crate::context::LibraryContext;
use crate::media::MediaKind;

pub const LIBRARY_FOLDER_NAME: &str = "Media Library";

/// Kinds listed by the overview, in display order
pub const LIBRARY_SECTIONS: [MediaKind; 3] = [MediaKind::Audio, MediaKind::Video, MediaKind::Image];

pub fn section_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "Audio",
        MediaKind::Video => "Video",
        MediaKind::Image => "Images",
        _ => "Other",
    }
}

/// The overview folder with one section per kind
pub fn library_spec() -> ChildSpec {
    ChildSpec::Group {
        name: LIBRARY_FOLDER_NAME.to_string(),
        children: LIBRARY_SECTIONS.into_iter().map(ChildSpec::LibrarySection).collect(),
    }
}

/// Every cached whole file of one kind
pub(crate) async fn stage_section(ctx: &LibraryContext, kind: MediaKind) -> Vec<ChildSpec> {
    match ctx.cache.entries(Some(kind)).await {
        Ok(entries) => entries
            .into_iter()
            .filter(|e| e.sub_track == 0)
            .map(|e| ChildSpec::Entry(e.path))
            .collect(),
        Err(e) => {
            warn!("Can't list cached {} files: {}", kind, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheKey, MemoryMetadataCache, MetadataCache};
    use crate::config::LibraryConfig;
    use crate::media::MediaInfo;
    use crate::testing::{CountingAnalyzer, context_with};
    use crate::tree::{Node, NodeKind};

    fn staged_paths(specs: Vec<ChildSpec>) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = specs
            .into_iter()
            .filter_map(|spec| match spec {
                ChildSpec::Entry(path) => Some(path),
                _ => None,
            })
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_sections_list_cached_whole_files_by_kind() {
        let cache = Arc::new(MemoryMetadataCache::new());
        let audio = MediaInfo::new(MediaKind::Audio, 10);
        let video = MediaInfo::new(MediaKind::Video, 20);
        cache.put(&CacheKey::new("/m/song.mp3", 1), &audio).await.unwrap();
        cache.put(&CacheKey::new("/m/live.flac", 1), &audio).await.unwrap();
        cache
            .put(&CacheKey::new("/m/live.flac", 1).with_sub_track(2), &audio)
            .await
            .unwrap();
        cache.put(&CacheKey::new("/m/clip.mkv", 1), &video).await.unwrap();

        let ctx = context_with(
            LibraryConfig::default(),
            cache,
            Arc::new(CountingAnalyzer::new()),
        );

        assert_eq!(
            staged_paths(stage_section(&ctx, MediaKind::Audio).await),
            vec![PathBuf::from("/m/live.flac"), PathBuf::from("/m/song.mp3")]
        );
        assert_eq!(
            staged_paths(stage_section(&ctx, MediaKind::Video).await),
            vec![PathBuf::from("/m/clip.mkv")]
        );
        assert!(stage_section(&ctx, MediaKind::Image).await.is_empty());
    }

    #[tokio::test]
    async fn test_section_refreshes_after_cache_mutation() {
        let ctx = context_with(
            LibraryConfig::default(),
            Arc::new(MemoryMetadataCache::new()),
            Arc::new(CountingAnalyzer::new()),
        );
        let section = Node::detached(
            Arc::clone(&ctx),
            section_name(MediaKind::Audio),
            NodeKind::LibrarySection(MediaKind::Audio),
        );

        section.discover().await;
        assert!(section.children().is_empty());
        assert!(!section.needs_refresh().await);

        ctx.bump_update_id();
        assert!(section.needs_refresh().await);
    }
}
