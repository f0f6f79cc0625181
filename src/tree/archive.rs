//! Archive browsing for zip and tar files

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::warn;

use super::node::ChildSpec;
use super::sorting::natural_cmp;
use crate::media::{ExtensionClassifier, Format};
use crate::utils::extension_lowercase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension_lowercase(path)?.as_str() {
            "zip" | "cbz" => Some(ArchiveFormat::Zip),
            "tar" => Some(ArchiveFormat::Tar),
            "tgz" | "gz" | "gzip" => Some(ArchiveFormat::TarGz),
            _ => None,
        }
    }
}

/// An archive file shown as a folder
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
    format: ArchiveFormat,
}

/// A media file stored inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub archive: PathBuf,
    pub format: ArchiveFormat,
    /// Path inside the archive
    pub name: String,
    pub size: u64,
    pub media: Format,
}

impl ArchiveSource {
    pub fn new(path: PathBuf) -> Option<Self> {
        let format = ArchiveFormat::from_path(&path)?;
        Some(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Media entries as child candidates; blocking
    pub(crate) fn stage(&self) -> Vec<ChildSpec> {
        match self.entries() {
            Ok(entries) => entries.into_iter().map(ChildSpec::ArchiveEntry).collect(),
            Err(e) => {
                warn!("Can't read archive {:?}: {:#}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Playable entries ordered by name
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();

        match self.format {
            ArchiveFormat::Zip => {
                let file = File::open(&self.path).context("Failed to open archive")?;
                let mut zip = zip::ZipArchive::new(BufReader::new(file))
                    .context("Failed to read zip directory")?;
                for i in 0..zip.len() {
                    let entry = zip.by_index(i).context("Failed to read zip entry")?;
                    if entry.is_dir() {
                        continue;
                    }
                    entries.extend(self.entry(entry.name().to_string(), entry.size()));
                }
            }
            ArchiveFormat::Tar | ArchiveFormat::TarGz => {
                let mut tar = tar::Archive::new(self.tar_reader()?);
                for entry in tar.entries().context("Failed to read tar entries")? {
                    let entry = entry.context("Failed to read tar entry")?;
                    if !entry.header().entry_type().is_file() {
                        continue;
                    }
                    let name = entry.path()?.to_string_lossy().to_string();
                    entries.extend(self.entry(name, entry.size()));
                }
            }
        }

        entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Ok(entries)
    }

    fn entry(&self, name: String, size: u64) -> Option<ArchiveEntry> {
        let media = ExtensionClassifier::by_extension(&extension_lowercase(Path::new(&name))?)?;
        if !media.kind.is_playable() || size == 0 {
            return None;
        }
        Some(ArchiveEntry {
            archive: self.path.clone(),
            format: self.format,
            name,
            size,
            media,
        })
    }

    fn tar_reader(&self) -> Result<Box<dyn Read>> {
        tar_reader(&self.path, self.format)
    }
}

fn tar_reader(path: &Path, format: ArchiveFormat) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path).context("Failed to open archive")?);
    Ok(match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    })
}

impl ArchiveEntry {
    /// Display name: the last component of the inner path
    pub fn display_name(&self) -> String {
        self.name
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
            .to_string()
    }

    /// Read the entry into memory and stream it from there
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let data = self.read_all().map_err(io::Error::other)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size as usize);
        match self.format {
            ArchiveFormat::Zip => {
                let file = File::open(&self.archive).context("Failed to open archive")?;
                let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
                let mut entry = zip
                    .by_name(&self.name)
                    .with_context(|| format!("Entry {} not found", self.name))?;
                entry.read_to_end(&mut data)?;
            }
            ArchiveFormat::Tar | ArchiveFormat::TarGz => {
                let mut tar = tar::Archive::new(tar_reader(&self.archive, self.format)?);
                for entry in tar.entries()? {
                    let mut entry = entry?;
                    if entry.path()?.to_string_lossy() == self.name {
                        entry.read_to_end(&mut data)?;
                        return Ok(data);
                    }
                }
                anyhow::bail!("Entry {} not found", self.name);
            }
        }
        Ok(data)
    }
}
