// Asset lookup seam between the exporters and the archive layer

use crate::error::Result;

/// Raw file access by archive path or by listfile id
pub trait AssetSource {
    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>>;
    fn read_by_id(&mut self, id: u32) -> Result<Vec<u8>>;
}

/// Normalize an archive path for lookups: lowercase with backslashes
pub fn archive_key(name: &str) -> String {
    name.trim().replace('/', "\\").to_ascii_lowercase()
}

/// Path of a map's structural descriptor (WDT)
pub fn wdt_path(map_dir: &str) -> String {
    format!("world\\maps\\{}\\{}.wdt", map_dir, map_dir)
}

/// Path of one terrain tile (ADT)
pub fn adt_path(map_dir: &str, x: u32, y: u32) -> String {
    format!("world\\maps\\{}\\{}_{}_{}.adt", map_dir, map_dir, x, y)
}

/// In-memory source for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySource {
    files: std::collections::HashMap<String, Vec<u8>>,
    ids: std::collections::HashMap<u32, String>,
    pub reads: usize,
}

#[cfg(test)]
impl MemorySource {
    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(archive_key(name), data);
    }

    pub fn insert_with_id(&mut self, id: u32, name: &str, data: Vec<u8>) {
        self.ids.insert(id, archive_key(name));
        self.insert(name, data);
    }
}

#[cfg(test)]
use crate::error::ExportError;

#[cfg(test)]
impl AssetSource for MemorySource {
    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        self.reads += 1;
        self.files
            .get(&archive_key(name))
            .cloned()
            .ok_or_else(|| ExportError::MissingAsset(name.to_string()))
    }

    fn read_by_id(&mut self, id: u32) -> Result<Vec<u8>> {
        let name = self
            .ids
            .get(&id)
            .cloned()
            .ok_or_else(|| ExportError::MissingAsset(format!("file id {}", id)))?;
        self.read_by_name(&name)
    }
}
