// Placed game objects, indexed by owning map
//
// The index joins the placement table with GameObjectDisplayInfo.dbc.
// Placements whose display id does not resolve to a model are left out of
// the index entirely.

use std::collections::HashMap;

use once_cell::unsync::OnceCell;

use crate::dbc::DbcFile;
use crate::error::Result;
use crate::source::AssetSource;
use crate::tile::TileBounds;

pub const GAMEOBJECT_DISPLAY_INFO_DBC: &str = "DBFilesClient\\GameObjectDisplayInfo.dbc";

/// Placement table: id, map, display id, x, y, z, orientation, scale
pub const DEFAULT_GAMEOBJECT_TABLE: &str = "DBFilesClient\\GameObjects.dbc";

const FIELD_ID: usize = 0;
const FIELD_MAP: usize = 1;
const FIELD_DISPLAY: usize = 2;
const FIELD_POSITION: usize = 3;
const FIELD_ORIENTATION: usize = 6;
const FIELD_SCALE: usize = 7;

#[derive(Clone, Debug, PartialEq)]
pub struct GameObject {
    pub id: u32,
    pub display_id: u32,
    /// Model path resolved through the display table
    pub model: String,
    pub position: [f32; 3],
    pub orientation: f32,
    pub scale: f32,
}

#[derive(Debug, Default)]
pub struct GameObjectIndex {
    by_map: HashMap<u32, Vec<GameObject>>,
}

impl GameObjectIndex {
    pub fn build<S: AssetSource + ?Sized>(source: &mut S, placement_table: &str) -> Result<Self> {
        tracing::info!("Building game object index from {}", placement_table);
        let placements = DbcFile::open(source, placement_table)?;
        let display_info = DbcFile::open(source, GAMEOBJECT_DISPLAY_INFO_DBC)?;
        Ok(Self::from_tables(&placements, &display_info))
    }

    pub fn from_tables(placements: &DbcFile, display_info: &DbcFile) -> Self {
        let mut models = HashMap::with_capacity(display_info.record_count());
        for record in display_info.records() {
            let Some(id) = record.get_u32(0) else {
                continue;
            };
            let path = record.get_string(1).unwrap_or_default();
            if path.len() < 4 {
                continue;
            }
            models.insert(id, fix_model_extension(&path));
        }

        let mut index = Self::default();
        let mut unresolved = 0usize;
        for record in placements.records() {
            let display_id = record.get_u32(FIELD_DISPLAY).unwrap_or(0);
            let Some(model) = models.get(&display_id) else {
                unresolved += 1;
                continue;
            };

            let position = [
                record.get_f32(FIELD_POSITION).unwrap_or(0.0),
                record.get_f32(FIELD_POSITION + 1).unwrap_or(0.0),
                record.get_f32(FIELD_POSITION + 2).unwrap_or(0.0),
            ];
            let scale = record
                .get_f32(FIELD_SCALE)
                .filter(|s| *s > 0.0)
                .unwrap_or(1.0);

            let object = GameObject {
                id: record.get_u32(FIELD_ID).unwrap_or(0),
                display_id,
                model: model.clone(),
                position,
                orientation: record.get_f32(FIELD_ORIENTATION).unwrap_or(0.0),
                scale,
            };
            let map_id = record.get_u32(FIELD_MAP).unwrap_or(0);
            index.by_map.entry(map_id).or_default().push(object);
        }

        if unresolved > 0 {
            tracing::debug!("{} game objects without a resolvable display model", unresolved);
        }
        tracing::info!(
            "Indexed {} game objects on {} maps",
            index.len(),
            index.by_map.len()
        );
        index
    }

    pub fn objects(&self, map_id: u32) -> &[GameObject] {
        self.by_map.get(&map_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn collect<F>(&self, map_id: u32, predicate: F) -> Vec<GameObject>
    where
        F: Fn(&GameObject) -> bool,
    {
        self.objects(map_id)
            .iter()
            .filter(|object| predicate(object))
            .cloned()
            .collect()
    }

    /// Objects strictly inside a tile's footprint
    pub fn in_bounds(&self, map_id: u32, bounds: &TileBounds) -> Vec<GameObject> {
        self.collect(map_id, |object| bounds.contains(object.position[0], object.position[1]))
    }

    pub fn len(&self) -> usize {
        self.by_map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Built on first use, kept for the rest of the session
pub struct GameObjectCache {
    table: String,
    index: OnceCell<GameObjectIndex>,
}

impl GameObjectCache {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            index: OnceCell::new(),
        }
    }

    pub fn get_or_build<S: AssetSource + ?Sized>(&self, source: &mut S) -> Result<&GameObjectIndex> {
        self.index
            .get_or_try_init(|| GameObjectIndex::build(source, &self.table))
    }
}

impl Default for GameObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_GAMEOBJECT_TABLE)
    }
}

/// Client tables still name M2 models with their pre-release extensions
pub fn fix_model_extension(path: &str) -> String {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".mdx") || lower.ends_with(".mdl") {
        format!("{}.m2", &path[..path.len() - 4])
    } else {
        path.to_string()
    }
}
