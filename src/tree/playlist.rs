//! Playlist files: m3u, pls and cue sheets

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::feed::StreamLeaf;
use super::file::Span;
use super::node::ChildSpec;
use crate::media::{ExtensionClassifier, MediaKind, decode_string};
use crate::utils::extension_lowercase;

/// URL schemes served by the transport layer instead of the filesystem
const REMOTE_SCHEMES: &[&str] = &["http://", "https://", "mms://", "rtsp://", "rtmp://"];

/// CD frames per second in cue sheet timestamps
const CUE_FRAMES_PER_SEC: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    M3u,
    Pls,
    Cue,
}

/// A playlist file shown as a folder
#[derive(Debug, Clone)]
pub struct PlaylistSource {
    path: PathBuf,
    format: PlaylistFormat,
}

/// One line item of an m3u or pls playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub location: String,
    pub title: Option<String>,
}

/// One track of a cue sheet
#[derive(Debug, Clone, PartialEq)]
pub struct CueTrack {
    /// Audio file the track is cut from
    pub file: PathBuf,
    pub number: u32,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub span: Span,
}

impl CueTrack {
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => format!("{:02} - {}", self.number, title),
            None => format!("Track {:02}", self.number),
        }
    }
}

impl PlaylistSource {
    pub fn new(path: PathBuf) -> Self {
        let format = match extension_lowercase(&path).as_deref() {
            Some("pls") => PlaylistFormat::Pls,
            Some("cue") => PlaylistFormat::Cue,
            _ => PlaylistFormat::M3u,
        };
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> PlaylistFormat {
        self.format
    }

    /// Read the playlist into child candidates; blocking
    pub(crate) fn stage(&self) -> Vec<ChildSpec> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Can't read playlist {:?}: {}", self.path, e);
                return Vec::new();
            }
        };
        let text = decode_string(&bytes);
        let base = self.path.parent().unwrap_or(Path::new("."));

        match self.format {
            PlaylistFormat::Cue => parse_cue(&text, base)
                .into_iter()
                .map(ChildSpec::Track)
                .collect(),
            PlaylistFormat::M3u => entries_to_specs(parse_m3u(&text), base),
            PlaylistFormat::Pls => entries_to_specs(parse_pls(&text), base),
        }
    }
}

fn entries_to_specs(entries: Vec<PlaylistEntry>, base: &Path) -> Vec<ChildSpec> {
    entries
        .into_iter()
        .filter_map(|entry| {
            if is_remote(&entry.location) {
                return Some(ChildSpec::Stream(remote_leaf(entry)));
            }
            let path = local_path(&entry.location, base);
            if path.exists() {
                Some(ChildSpec::Entry(path))
            } else {
                debug!("Playlist entry {:?} does not exist", path);
                None
            }
        })
        .collect()
}

pub fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    REMOTE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn remote_leaf(entry: PlaylistEntry) -> StreamLeaf {
    let kind = Path::new(&entry.location)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| ExtensionClassifier::by_extension(&e.to_lowercase()))
        .map(|f| f.kind)
        .filter(|k| *k == MediaKind::Video)
        .unwrap_or(MediaKind::Audio);

    StreamLeaf {
        name: entry.title.unwrap_or_else(|| entry.location.clone()),
        url: entry.location,
        kind,
        thumbnail: None,
    }
}

fn local_path(location: &str, base: &Path) -> PathBuf {
    let location = location.strip_prefix("file://").unwrap_or(location);
    let location = if cfg!(windows) {
        location.to_string()
    } else {
        location.replace('\\', "/")
    };
    let path = Path::new(&location);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Parse an m3u/m3u8 playlist, keeping `#EXTINF` titles
pub fn parse_m3u(text: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut title = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            title = info
                .split_once(',')
                .map(|(_, t)| t.trim().to_string())
                .filter(|t| !t.is_empty());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        entries.push(PlaylistEntry {
            location: line.to_string(),
            title: title.take(),
        });
    }
    entries
}

/// Parse a pls playlist (`FileN=`, `TitleN=`), ordered by N
pub fn parse_pls(text: &str) -> Vec<PlaylistEntry> {
    let mut items: BTreeMap<u32, (Option<String>, Option<String>)> = BTreeMap::new();

    for line in text.lines().map(str::trim) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        if let Some(n) = key.strip_prefix("file").and_then(|n| n.parse().ok()) {
            items.entry(n).or_default().0 = Some(value);
        } else if let Some(n) = key.strip_prefix("title").and_then(|n| n.parse().ok()) {
            items.entry(n).or_default().1 = Some(value);
        }
    }

    items
        .into_values()
        .filter_map(|(location, title)| {
            location.map(|location| PlaylistEntry {
                location,
                title: title.filter(|t| !t.is_empty()),
            })
        })
        .collect()
}

/// Parse a cue sheet into tracks with their time spans
///
/// A track ends where the next track of the same file starts; the last
/// track of a file plays to its end.
pub fn parse_cue(text: &str, base: &Path) -> Vec<CueTrack> {
    let mut tracks: Vec<CueTrack> = Vec::new();
    let mut file: Option<PathBuf> = None;
    let mut album_performer: Option<String> = None;
    let mut current: Option<CueTrack> = None;

    for line in text.lines().map(str::trim) {
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match keyword.to_ascii_uppercase().as_str() {
            "FILE" => {
                tracks.extend(current.take());
                file = Some(local_path(&cue_value(rest), base));
            }
            "TRACK" => {
                tracks.extend(current.take());
                let Some(file) = file.clone() else {
                    continue;
                };
                let number = rest
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(tracks.len() as u32 + 1);
                current = Some(CueTrack {
                    file,
                    number,
                    title: None,
                    performer: album_performer.clone(),
                    span: Span {
                        start_secs: 0.0,
                        end_secs: None,
                    },
                });
            }
            "TITLE" => {
                if let Some(track) = current.as_mut() {
                    track.title = Some(cue_value(rest));
                }
            }
            "PERFORMER" => match current.as_mut() {
                Some(track) => track.performer = Some(cue_value(rest)),
                None => album_performer = Some(cue_value(rest)),
            },
            "INDEX" => {
                let mut parts = rest.split_whitespace();
                let is_start = parts.next().is_some_and(|n| n == "01");
                if let (true, Some(track), Some(time)) = (is_start, current.as_mut(), parts.next()) {
                    if let Some(secs) = cue_time(time) {
                        track.span.start_secs = secs;
                    }
                }
            }
            _ => {}
        }
    }
    tracks.extend(current.take());

    let starts: Vec<(PathBuf, f64)> = tracks
        .iter()
        .map(|t| (t.file.clone(), t.span.start_secs))
        .collect();
    for (i, track) in tracks.iter_mut().enumerate() {
        if let Some((next_file, next_start)) = starts.get(i + 1) {
            if *next_file == track.file {
                track.span.end_secs = Some(*next_start);
            }
        }
    }
    tracks
}

fn cue_value(rest: &str) -> String {
    let rest = rest.trim();
    match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default().to_string(),
        None => rest.split_whitespace().next().unwrap_or_default().to_string(),
    }
}

/// `mm:ss:ff` to seconds
fn cue_time(time: &str) -> Option<f64> {
    let mut parts = time.split(':').map(|p| p.parse::<u32>().ok());
    let minutes = parts.next()??;
    let seconds = parts.next()??;
    let frames = parts.next()??;
    Some(minutes as f64 * 60.0 + seconds as f64 + frames as f64 / CUE_FRAMES_PER_SEC)
}
