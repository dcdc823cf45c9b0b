// Map structural descriptor (WDT): tile presence and the global WMO
use std::io::Cursor;

use wow_wdt::{WdtReader, version::WowVersion};

use crate::error::{ExportError, Result};
use crate::tile::{TileCoord, TileMask, WDT_MAP_SIZE};

/// The single world model some maps place instead of (or over) terrain
#[derive(Clone, Debug, PartialEq)]
pub struct WorldModelPlacement {
    /// Archive path of the root WMO
    pub path: String,
    pub unique_id: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    pub flags: u16,
    pub doodad_set: u16,
    pub name_set: u16,
}

#[derive(Clone, Debug)]
pub struct MapDescriptor {
    pub tile_mask: TileMask,
    pub world_model: Option<WorldModelPlacement>,
}

impl MapDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = WdtReader::new(Cursor::new(bytes), WowVersion::TBC);
        let wdt = reader.read().map_err(|err| ExportError::decode("WDT", err))?;

        let mut tile_mask = TileMask::empty();
        for y in 0..WDT_MAP_SIZE {
            for x in 0..WDT_MAP_SIZE {
                let Some(tile) = wdt.get_tile(x, y) else {
                    continue;
                };
                if tile.has_adt {
                    tile_mask.set(TileCoord::new(x as u32, y as u32), true);
                }
            }
        }

        let names: Vec<String> = wdt
            .mwmo
            .as_ref()
            .map(|mwmo| mwmo.filenames.clone())
            .unwrap_or_default();

        let world_model = wdt.modf.as_ref().and_then(|modf| {
            let entry = modf.entries.first()?;
            let path = names.get(entry.id as usize)?;
            Some(WorldModelPlacement {
                path: path.trim_end_matches('\0').to_string(),
                unique_id: entry.unique_id,
                position: [entry.position[0], entry.position[1], entry.position[2]],
                rotation: [entry.rotation[0], entry.rotation[1], entry.rotation[2]],
                bounds_min: [entry.lower_bounds[0], entry.lower_bounds[1], entry.lower_bounds[2]],
                bounds_max: [entry.upper_bounds[0], entry.upper_bounds[1], entry.upper_bounds[2]],
                flags: entry.flags,
                doodad_set: entry.doodad_set,
                name_set: entry.name_set,
            })
        });

        tracing::debug!(
            "WDT: {} tiles, world model: {}",
            tile_mask.count(),
            world_model.as_ref().map_or("none", |wmo| wmo.path.as_str())
        );

        Ok(Self { tile_mask, world_model })
    }

    /// Used when the descriptor is missing or unreadable
    pub fn fallback() -> Self {
        Self {
            tile_mask: TileMask::all_present(),
            world_model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = MapDescriptor::parse(b"not a wdt file").unwrap_err();
        assert!(matches!(err, ExportError::Decode { .. }));
    }

    #[test]
    fn test_fallback_has_every_tile() {
        let descriptor = MapDescriptor::fallback();
        assert_eq!(descriptor.tile_mask.count(), WDT_MAP_SIZE * WDT_MAP_SIZE);
        assert!(descriptor.world_model.is_none());
    }
}
