use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use mpq::Archive;

use crate::error::{ExportError, Result};
use crate::listfile::Listfile;
use crate::source::{AssetSource, archive_key};

pub const LANGS: [&str; 12] = [
    "enGB", "enUS", "deDE", "esES", "frFR", "koKR", "zhCN", "zhTW", "enCN", "enTW", "esMX", "ruRU",
];

/// Stack of opened archives; the most recently opened one wins lookups
pub struct MpqManager {
    archives: Vec<Archive>,
    listfile: Listfile,
}

impl MpqManager {
    pub fn new() -> Self {
        Self {
            archives: Vec::new(),
            listfile: Listfile::new(),
        }
    }

    /// Open every archive of a client Data directory in patch order
    pub fn open_data_dir(data_path: &Path) -> anyhow::Result<Self> {
        let mut manager = Self::new();
        for archive in build_archive_list(data_path) {
            let path = build_path(data_path, &[&archive]);
            if manager.open_archive(&path)? {
                tracing::debug!("Opened archive {}", path.display());
            }
        }
        if manager.archives.is_empty() {
            anyhow::bail!(
                "No MPQ archive found in '{}'. Point DataDir at the client's Data directory.",
                data_path.display()
            );
        }
        tracing::info!("Opened {} archives from {}", manager.archive_count(), data_path.display());
        Ok(manager)
    }

    pub fn open_archive(&mut self, path: &Path) -> anyhow::Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let archive = Archive::open(path)?;
        self.archives.insert(0, archive);
        Ok(true)
    }

    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    pub fn set_listfile(&mut self, listfile: Listfile) {
        self.listfile = listfile;
    }

    pub fn listfile(&self) -> &Listfile {
        &self.listfile
    }

    pub fn open_file(&mut self, filename: &str) -> Option<Vec<u8>> {
        for archive in &mut self.archives {
            // The mpq crate errors on 0-byte files; treat them as absent
            let file = match archive.open_file(filename) {
                Ok(f) => f,
                Err(_) => continue,
            };

            let size = file.size() as usize;
            if size == 0 {
                continue;
            }

            let mut buf = vec![0u8; size];
            if file.read(archive, &mut buf).is_ok() {
                return Some(buf);
            }
        }
        None
    }

    pub fn list_files(&mut self) -> BTreeSet<String> {
        let mut entries = BTreeSet::new();
        for archive in &mut self.archives {
            if let Ok(listfile) = archive.open_file("(listfile)") {
                let mut buf = vec![0u8; listfile.size() as usize];
                if listfile.read(archive, &mut buf).is_ok() {
                    let content = String::from_utf8_lossy(&buf);
                    for line in content.lines() {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        entries.insert(trimmed.to_string());
                    }
                }
            }
        }
        entries
    }
}

impl Default for MpqManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetSource for MpqManager {
    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        self.open_file(&archive_key(name))
            .ok_or_else(|| ExportError::MissingAsset(name.to_string()))
    }

    fn read_by_id(&mut self, id: u32) -> Result<Vec<u8>> {
        let name = self
            .listfile
            .name_for(id)
            .map(str::to_string)
            .ok_or_else(|| ExportError::MissingAsset(format!("file id {}", id)))?;
        self.read_by_name(&name)
    }
}

/// Archive names relative to the Data directory, lowest priority first
fn build_archive_list(data_path: &Path) -> Vec<String> {
    let mut archives = Vec::new();
    let mut locales = Vec::new();

    for locale in LANGS {
        if data_path.join(locale).is_dir() {
            tracing::info!("Found locale '{}'", locale);
            locales.push(locale.to_string());
        }
    }

    for locale in &locales {
        archives.push(format!("{}/locale-{}.MPQ", locale, locale));
        archives.push(format!("{}/expansion-locale-{}.MPQ", locale, locale));
    }

    archives.push("common.MPQ".to_string());
    archives.push("expansion.MPQ".to_string());

    scan_patches(data_path, "patch", &mut archives);
    for locale in &locales {
        scan_patches(data_path, &format!("{}/patch-{}", locale, locale), &mut archives);
    }

    archives
}

fn scan_patches(base: &Path, stem: &str, archives: &mut Vec<String>) {
    for idx in 1..=99 {
        let name = if idx == 1 {
            format!("{}.MPQ", stem)
        } else {
            format!("{}-{}.MPQ", stem, idx)
        };
        if base.join(&name).exists() {
            archives.push(name);
        }
    }
}

pub fn build_path(base: &Path, parts: &[&str]) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in parts {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}
