//! Top-level composition of the tree

use std::path::Path;

use tracing::{debug, warn};

use crate::context::LibraryContext;
use crate::media::MediaKind;
use crate::media::decode_string;
use crate::tree::{ChildSpec, FeedSource, StreamLeaf, library_spec, youtube_feed_url};

pub const SAVED_PLAYLISTS_NAME: &str = "Saved Playlists";

/// Top-level candidates in display order; blocking
///
/// Library overview, shared folders, saved playlists, virtual folders,
/// then web folders.
pub fn top_level_specs(ctx: &LibraryContext) -> Vec<ChildSpec> {
    let config = &ctx.config;
    let mut specs = Vec::new();

    if config.show_media_library_folder && config.use_cache {
        specs.push(library_spec());
    }

    for folder in &config.folders {
        if config.is_ignored_path(folder) {
            debug!("Shared folder {:?} is ignored", folder);
            continue;
        }
        if !folder.is_dir() {
            warn!("Shared folder {:?} is not a directory", folder);
            continue;
        }
        specs.push(ChildSpec::SharedFolder {
            path: folder.clone(),
            name: None,
        });
    }

    if let Some(dir) = &config.saved_playlists_folder {
        if dir.is_dir() {
            specs.push(ChildSpec::SharedFolder {
                path: dir.clone(),
                name: Some(SAVED_PLAYLISTS_NAME.to_string()),
            });
        } else {
            warn!("Saved playlists folder {:?} does not exist", dir);
        }
    }

    specs.extend(config.virtual_folders.iter().cloned().map(ChildSpec::Bundle));

    if config.external_network {
        if let Some(path) = &config.web_conf {
            specs.extend(load_web_conf(path));
        }
    }

    specs
}

fn load_web_conf(path: &Path) -> Vec<ChildSpec> {
    match std::fs::read(path) {
        Ok(bytes) => parse_web_conf(&decode_string(&bytes)),
        Err(e) => {
            debug!("No web folders from {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Parse web folder lines of the form `type.folder1,folder2=uri,name,thumb`
///
/// Folders nest in the order given. Lines starting with `#` and lines
/// without `=` are ignored.
pub fn parse_web_conf(text: &str) -> Vec<ChildSpec> {
    let mut specs = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let (kind, folders) = key.split_once('.').unwrap_or((key, ""));
        let folders: Vec<String> = folders
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        let mut fields = value.splitn(3, ',').map(str::trim);
        let uri = fields.next().unwrap_or_default();
        if uri.is_empty() {
            continue;
        }
        let name = fields
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(uri)
            .to_string();
        let thumbnail = fields.next().filter(|t| !t.is_empty()).map(str::to_string);

        let leaf = match kind.trim() {
            "imagefeed" | "audiofeed" | "videofeed" => ChildSpec::Feed(FeedSource {
                name,
                url: youtube_feed_url(uri),
                kind: web_kind(kind),
                thumbnail,
            }),
            "audiostream" | "videostream" => ChildSpec::Stream(StreamLeaf {
                name,
                url: uri.to_string(),
                kind: web_kind(kind),
                thumbnail,
            }),
            other => {
                debug!("Unknown web folder type {:?}", other);
                continue;
            }
        };

        insert(&mut specs, &folders, leaf);
    }

    specs
}

fn web_kind(kind: &str) -> MediaKind {
    if kind.starts_with("image") {
        MediaKind::Image
    } else if kind.starts_with("audio") {
        MediaKind::Audio
    } else {
        MediaKind::Video
    }
}

fn insert(specs: &mut Vec<ChildSpec>, folders: &[String], leaf: ChildSpec) {
    let Some((first, rest)) = folders.split_first() else {
        specs.push(leaf);
        return;
    };

    let existing = specs
        .iter()
        .position(|s| matches!(s, ChildSpec::Group { name, .. } if name == first));
    let index = match existing {
        Some(index) => index,
        None => {
            specs.push(ChildSpec::Group {
                name: first.clone(),
                children: Vec::new(),
            });
            specs.len() - 1
        }
    };

    if let ChildSpec::Group { children, .. } = &mut specs[index] {
        insert(children, rest, leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LibraryConfig, VirtualFolderConf};
    use crate::testing::memory_context;

    fn labels(specs: &[ChildSpec]) -> Vec<String> {
        specs
            .iter()
            .map(|spec| match spec {
                ChildSpec::Group { name, .. } => format!("group:{}", name),
                ChildSpec::SharedFolder { path, name } => format!(
                    "shared:{}",
                    name.clone()
                        .unwrap_or_else(|| crate::utils::file_name_string(path))
                ),
                ChildSpec::Bundle(conf) => format!("bundle:{}", conf.name),
                ChildSpec::Feed(feed) => format!("feed:{}", feed.name),
                ChildSpec::Stream(stream) => format!("stream:{}", stream.name),
                other => format!("{:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_parse_web_conf_nests_folders() {
        let text = "\
# web folders
audiostream.Radio=http://radio.example.com/live.mp3,Live Radio,http://radio.example.com/logo.png
audiofeed.Podcasts,Tech=https://example.com/tech.xml,Tech Talk
videofeed.Podcasts,Video=https://www.youtube.com/channel/UCabc,Channel
imagefeed.Photos=https://example.com/photos.xml
not a web folder line
bogus.Radio=http://x
";
        let specs = parse_web_conf(text);
        assert_eq!(labels(&specs), vec!["group:Radio", "group:Podcasts", "group:Photos"]);

        let ChildSpec::Group { children, .. } = &specs[0] else {
            panic!("expected a group");
        };
        let ChildSpec::Stream(stream) = &children[0] else {
            panic!("expected a stream");
        };
        assert_eq!(
            *stream,
            StreamLeaf {
                name: "Live Radio".to_string(),
                url: "http://radio.example.com/live.mp3".to_string(),
                kind: MediaKind::Audio,
                thumbnail: Some("http://radio.example.com/logo.png".to_string()),
            }
        );

        let ChildSpec::Group { children, .. } = &specs[1] else {
            panic!("expected a group");
        };
        assert_eq!(labels(children), vec!["group:Tech", "group:Video"]);
        let ChildSpec::Group { children: video, .. } = &children[1] else {
            panic!("expected a group");
        };
        let ChildSpec::Feed(feed) = &video[0] else {
            panic!("expected a feed");
        };
        assert_eq!(
            feed.url,
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCabc"
        );
        assert_eq!(feed.kind, MediaKind::Video);

        let ChildSpec::Group { children: photos, .. } = &specs[2] else {
            panic!("expected a group");
        };
        assert_eq!(labels(photos), vec!["feed:https://example.com/photos.xml"]);
    }

    #[test]
    fn test_composition_order() {
        let music = tempfile::tempdir().unwrap();
        let skipped = tempfile::tempdir().unwrap();
        let playlists = tempfile::tempdir().unwrap();
        let web = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(web.path(), "audiostream=http://radio.example.com/live,Radio\n").unwrap();

        let config = LibraryConfig {
            folders: vec![
                music.path().to_path_buf(),
                skipped.path().to_path_buf(),
                music.path().join("missing"),
            ],
            folders_ignored: vec![skipped.path().to_path_buf()],
            saved_playlists_folder: Some(playlists.path().to_path_buf()),
            virtual_folders: vec![VirtualFolderConf {
                name: "Mix".to_string(),
                files: Vec::new(),
                children: Vec::new(),
            }],
            web_conf: Some(web.path().to_path_buf()),
            ..Default::default()
        };
        let ctx = memory_context(config);

        let music_name = crate::utils::file_name_string(music.path());
        assert_eq!(
            labels(&top_level_specs(&ctx)),
            vec![
                "group:Media Library".to_string(),
                format!("shared:{}", music_name),
                "shared:Saved Playlists".to_string(),
                "bundle:Mix".to_string(),
                "stream:Radio".to_string(),
            ]
        );
    }

    #[test]
    fn test_optional_sources_can_be_disabled() {
        let web = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(web.path(), "audiostream=http://radio.example.com/live,Radio\n").unwrap();

        let config = LibraryConfig {
            show_media_library_folder: false,
            external_network: false,
            web_conf: Some(web.path().to_path_buf()),
            ..Default::default()
        };
        assert!(top_level_specs(&memory_context(config)).is_empty());

        let config = LibraryConfig {
            use_cache: false,
            ..Default::default()
        };
        assert!(top_level_specs(&memory_context(config)).is_empty());
    }
}
