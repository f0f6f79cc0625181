//! DVD structures: `VIDEO_TS` folders and ISO 9660 images
//!
//! Each title set (`VTS_nn_m.VOB` with m >= 1) becomes one title whose
//! stream is the concatenation of its VOB parts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::node::ChildSpec;

const SECTOR_SIZE: u64 = 2048;
/// Sector of the primary volume descriptor
const PVD_SECTOR: u64 = 16;
/// Offset of the root directory record inside the volume descriptor
const ROOT_RECORD_OFFSET: usize = 156;
const FLAG_DIRECTORY: u8 = 0x02;
/// Directory records claiming more than this are treated as corrupt
const MAX_DIRECTORY_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscLayout {
    VideoTs,
    Iso,
}

/// A DVD structure shown as a folder of titles
#[derive(Debug)]
pub struct DiscSource {
    path: PathBuf,
    layout: DiscLayout,
    titles: OnceCell<Vec<DiscTitle>>,
}

/// A byte range backing part of a title
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscExtent {
    File { path: PathBuf, len: u64 },
    Image { path: PathBuf, offset: u64, len: u64 },
}

impl DiscExtent {
    pub fn len(&self) -> u64 {
        match self {
            DiscExtent::File { len, .. } | DiscExtent::Image { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            DiscExtent::File { path, len } => Ok(Box::new(File::open(path)?.take(*len))),
            DiscExtent::Image { path, offset, len } => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                Ok(Box::new(file.take(*len)))
            }
        }
    }
}

/// One title set of a disc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscTitle {
    pub number: u32,
    pub parts: Vec<DiscExtent>,
}

impl DiscTitle {
    pub fn name(&self) -> String {
        format!("Title {}", self.number)
    }

    pub fn size(&self) -> u64 {
        self.parts.iter().map(DiscExtent::len).sum()
    }

    /// Stream the title's parts back to back
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
        for part in &self.parts {
            reader = Box::new(reader.chain(part.open()?));
        }
        Ok(reader)
    }
}

impl DiscSource {
    pub fn video_ts(path: PathBuf) -> Self {
        Self {
            path,
            layout: DiscLayout::VideoTs,
            titles: OnceCell::new(),
        }
    }

    pub fn iso(path: PathBuf) -> Self {
        Self {
            path,
            layout: DiscLayout::Iso,
            titles: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> DiscLayout {
        self.layout
    }

    /// Name shown for the disc: the image file, or the folder holding
    /// `VIDEO_TS`
    pub fn display_name(&self) -> String {
        let named = match self.layout {
            DiscLayout::VideoTs => self.path.parent().unwrap_or(&self.path),
            DiscLayout::Iso => &self.path,
        };
        crate::utils::file_name_string(named)
    }

    /// Title sets, read once; blocking
    pub fn titles(&self) -> &[DiscTitle] {
        self.titles.get_or_init(|| match self.load() {
            Ok(titles) => titles,
            Err(e) => {
                warn!("Can't read disc structure of {:?}: {:#}", self.path, e);
                Vec::new()
            }
        })
    }

    pub(crate) fn stage(&self) -> Vec<ChildSpec> {
        self.titles().iter().cloned().map(ChildSpec::DiscTitle).collect()
    }

    fn load(&self) -> Result<Vec<DiscTitle>> {
        let vobs = match self.layout {
            DiscLayout::VideoTs => self.video_ts_files()?,
            DiscLayout::Iso => iso_video_ts_files(&self.path)?,
        };
        debug!("Found {} VOB parts in {:?}", vobs.len(), self.path);
        Ok(group_titles(vobs))
    }

    fn video_ts_files(&self) -> Result<Vec<(String, DiscExtent)>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path).context("Failed to list VIDEO_TS")? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            files.push((
                entry.file_name().to_string_lossy().to_string(),
                DiscExtent::File {
                    path: entry.path(),
                    len: meta.len(),
                },
            ));
        }
        Ok(files)
    }
}

/// `VTS_nn_m.VOB` to `(nn, m)`
fn parse_vob_name(name: &str) -> Option<(u32, u32)> {
    let name = name.to_ascii_uppercase();
    let stem = name.strip_prefix("VTS_")?.strip_suffix(".VOB")?;
    let (title, part) = stem.split_once('_')?;
    if title.len() != 2 || part.len() != 1 {
        return None;
    }
    Some((title.parse().ok()?, part.parse().ok()?))
}

fn group_titles(files: Vec<(String, DiscExtent)>) -> Vec<DiscTitle> {
    let mut titles: BTreeMap<u32, BTreeMap<u32, DiscExtent>> = BTreeMap::new();
    for (name, extent) in files {
        match parse_vob_name(&name) {
            // Part 0 is the title set menu
            Some((title, part)) if part >= 1 => {
                titles.entry(title).or_default().insert(part, extent);
            }
            _ => {}
        }
    }

    titles
        .into_iter()
        .map(|(number, parts)| DiscTitle {
            number,
            parts: parts.into_values().collect(),
        })
        .collect()
}

/// Directory record fields needed to walk an ISO 9660 tree
#[derive(Debug)]
struct DirRecord {
    name: String,
    extent: u32,
    size: u32,
    is_dir: bool,
}

fn read_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_record(rec: &[u8]) -> Option<DirRecord> {
    if rec.len() < 34 {
        return None;
    }
    let name_len = rec[32] as usize;
    let raw = rec.get(33..33 + name_len)?;
    let name = String::from_utf8_lossy(raw);
    let name = name.split(';').next().unwrap_or_default().to_string();
    Some(DirRecord {
        name,
        extent: LittleEndian::read_u32(&rec[2..6]),
        size: LittleEndian::read_u32(&rec[10..14]),
        is_dir: rec[25] & FLAG_DIRECTORY != 0,
    })
}

fn read_directory(file: &mut File, extent: u32, size: u32) -> Result<Vec<DirRecord>> {
    let offset = extent as u64 * SECTOR_SIZE;
    let size = size as u64;
    let image_len = file.metadata()?.len();
    if size > MAX_DIRECTORY_SIZE || offset.saturating_add(size) > image_len {
        bail!("Directory of {} bytes at {} does not fit the image", size, offset);
    }
    let data = read_at(file, offset, size as usize)?;
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let len = data[pos] as usize;
        if len == 0 {
            // Records never cross sectors; the rest of this one is padding
            pos = (pos / SECTOR_SIZE as usize + 1) * SECTOR_SIZE as usize;
            continue;
        }
        let Some(rec) = data.get(pos..pos + len) else {
            break;
        };
        // The first two records are `.` and `..`
        if rec.get(32) == Some(&1) && matches!(rec.get(33), Some(0) | Some(1)) {
            pos += len;
            continue;
        }
        records.extend(parse_record(rec));
        pos += len;
    }
    Ok(records)
}

fn iso_video_ts_files(path: &Path) -> Result<Vec<(String, DiscExtent)>> {
    let mut file = File::open(path).context("Failed to open disc image")?;
    let pvd = read_at(&mut file, PVD_SECTOR * SECTOR_SIZE, SECTOR_SIZE as usize)
        .context("Image too small for a volume descriptor")?;
    if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
        bail!("Not an ISO 9660 image");
    }

    let root = parse_record(&pvd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34])
        .context("Invalid root directory record")?;
    let video_ts = read_directory(&mut file, root.extent, root.size)?
        .into_iter()
        .find(|r| r.is_dir && r.name.eq_ignore_ascii_case("VIDEO_TS"))
        .context("No VIDEO_TS directory in image")?;

    Ok(read_directory(&mut file, video_ts.extent, video_ts.size)?
        .into_iter()
        .filter(|r| !r.is_dir)
        .map(|r| {
            let extent = DiscExtent::Image {
                path: path.to_path_buf(),
                offset: r.extent as u64 * SECTOR_SIZE,
                len: r.size as u64,
            };
            (r.name, extent)
        })
        .collect())
}
