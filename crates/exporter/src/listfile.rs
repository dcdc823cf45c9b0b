// Listfile: archive file names <-> numeric ids
//
// Accepts the community "<id>;<path>" format. Without one, ids are assigned
// to the archive's own (listfile) entries in sorted order so lookups by id
// still work within one run.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context;

use crate::source::archive_key;

#[derive(Debug, Default)]
pub struct Listfile {
    by_id: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl Listfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse "<id>;<path>" lines; blank and malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let mut listfile = Self::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some((id, name)) = trimmed.split_once(';') else {
                skipped += 1;
                continue;
            };
            let Ok(id) = id.trim().parse::<u32>() else {
                skipped += 1;
                continue;
            };
            if name.trim().is_empty() {
                skipped += 1;
                continue;
            }
            listfile.insert(id, name);
        }
        if skipped > 0 {
            tracing::debug!("Listfile: skipped {} malformed lines", skipped);
        }
        listfile
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read listfile {}", path.display()))?;
        let listfile = Self::parse(&content);
        tracing::info!("Loaded listfile {} ({} entries)", path.display(), listfile.len());
        Ok(listfile)
    }

    /// Number names from an archive (listfile), in sorted order starting at 1
    pub fn from_names(names: &BTreeSet<String>) -> Self {
        let mut listfile = Self::new();
        for (idx, name) in names.iter().enumerate() {
            listfile.insert(idx as u32 + 1, name);
        }
        listfile
    }

    pub fn insert(&mut self, id: u32, name: &str) {
        let key = archive_key(name);
        if let Some(previous) = self.by_id.insert(id, key.clone()) {
            self.by_name.remove(&previous);
        }
        self.by_name.insert(key, id);
    }

    pub fn id_for(&self, name: &str) -> Option<u32> {
        self.by_name.get(&archive_key(name)).copied()
    }

    pub fn name_for(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let listfile = Listfile::parse(
            "53183;World/Maps/Azeroth/Azeroth.wdt\n\nbogus line\nx;foo.blp\n12;\n775971;world/maps/azeroth/azeroth_32_48.adt\n",
        );
        assert_eq!(listfile.len(), 2);
        assert_eq!(listfile.id_for("WORLD\\MAPS\\AZEROTH\\AZEROTH.WDT"), Some(53183));
        assert_eq!(
            listfile.name_for(775971),
            Some("world\\maps\\azeroth\\azeroth_32_48.adt")
        );
        assert_eq!(listfile.id_for("missing.blp"), None);
    }

    #[test]
    fn test_reinsert_replaces_name() {
        let mut listfile = Listfile::new();
        listfile.insert(1, "a.m2");
        listfile.insert(1, "b.m2");
        assert_eq!(listfile.id_for("a.m2"), None);
        assert_eq!(listfile.id_for("b.m2"), Some(1));
    }

    #[test]
    fn test_from_archive_names() {
        let names: BTreeSet<String> = ["b.wdt", "a.adt"].iter().map(|s| s.to_string()).collect();
        let listfile = Listfile::from_names(&names);
        assert_eq!(listfile.id_for("a.adt"), Some(1));
        assert_eq!(listfile.name_for(2), Some("b.wdt"));
    }
}
