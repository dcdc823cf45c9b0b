// Browsing state for one map: selection, tile mask, previews and jobs
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::blp::decode_blp;
use crate::dbc::{MapEntry, read_map_dbc};
use crate::error::{ExportError, Result};
use crate::export::{
    ExportJob, ExportOptions, ExportPathLog, ExportReport, ExportedTile, TileExportOrchestrator,
};
use crate::objects::{GameObject, GameObjectCache};
use crate::progress::ProgressSink;
use crate::source::{AssetSource, archive_key, wdt_path};
use crate::terrain::{AdtTileExporter, ExportKind, ModelCache};
use crate::tile::{TileCoord, TileMask};
use crate::wdt::{MapDescriptor, WorldModelPlacement};

pub const MD5_TRANSLATE: &str = "textures\\minimap\\md5translate.trs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedMap {
    pub id: u32,
    /// Lowercase, for archive and output paths
    pub directory: String,
    /// As given, for display
    pub display: String,
}

#[derive(Clone, Debug)]
pub struct TilePreview {
    pub tile: TileCoord,
    pub image: RgbaImage,
}

pub struct MapSession<S: AssetSource> {
    source: S,
    selected: Option<SelectedMap>,
    descriptor: MapDescriptor,
    objects: GameObjectCache,
    minimap_names: Option<HashMap<String, String>>,
}

impl<S: AssetSource> MapSession<S> {
    pub fn new(source: S, game_object_table: &str) -> Self {
        Self {
            source,
            selected: None,
            descriptor: MapDescriptor::fallback(),
            objects: GameObjectCache::new(game_object_table),
            minimap_names: None,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn maps(&mut self) -> Result<Vec<MapEntry>> {
        read_map_dbc(&mut self.source)
    }

    /// Select a map and load its tile mask. An unreadable descriptor is not
    /// an error: every tile is then assumed present.
    pub fn select_map(&mut self, map_id: u32, directory: &str) {
        let lower = directory.to_ascii_lowercase();
        let descriptor = match self
            .source
            .read_by_name(&wdt_path(&lower))
            .and_then(|bytes| MapDescriptor::parse(&bytes))
        {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!("Unable to read WDT of {}: {}, assuming all tiles present", directory, err);
                MapDescriptor::fallback()
            }
        };
        self.apply_selection(map_id, directory, descriptor);
    }

    fn apply_selection(&mut self, map_id: u32, directory: &str, descriptor: MapDescriptor) {
        tracing::info!(
            "Selected map {} ({}): {} tiles{}",
            directory,
            map_id,
            descriptor.tile_mask.count(),
            if descriptor.world_model.is_some() { ", global WMO" } else { "" }
        );
        self.selected = Some(SelectedMap {
            id: map_id,
            directory: directory.to_ascii_lowercase(),
            display: directory.to_string(),
        });
        self.descriptor = descriptor;
    }

    pub fn selected(&self) -> Option<&SelectedMap> {
        self.selected.as_ref()
    }

    pub fn tile_mask(&self) -> &TileMask {
        &self.descriptor.tile_mask
    }

    pub fn available_tiles(&self) -> Vec<TileCoord> {
        self.descriptor.tile_mask.tiles().collect()
    }

    pub fn world_model(&self) -> Option<&WorldModelPlacement> {
        self.descriptor.world_model.as_ref()
    }

    /// Minimap image of a tile scaled to `target_size` square.
    /// `None` when the image is missing or cannot be decoded.
    pub fn load_tile_preview(&mut self, x: u32, y: u32, target_size: u32) -> Option<TilePreview> {
        let directory = self.selected.as_ref()?.directory.clone();
        let name = self.minimap_name(&directory, x, y);

        let bytes = match self.source.read_by_name(&name) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!("No minimap for tile {}_{}: {}", x, y, err);
                return None;
            }
        };
        let image = match decode_blp(&bytes) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!("Unable to decode minimap {}: {}", name, err);
                return None;
            }
        };

        let size = target_size.max(1);
        Some(TilePreview {
            tile: TileCoord::new(x, y),
            image: imageops::resize(&image, size, size, FilterType::Nearest),
        })
    }

    fn minimap_name(&mut self, directory: &str, x: u32, y: u32) -> String {
        let plain = format!("{}\\map{:02}_{:02}.blp", directory, x, y);
        if self.minimap_names.is_none() {
            self.minimap_names = Some(match self.source.read_by_name(MD5_TRANSLATE) {
                Ok(bytes) => parse_md5_translate(&String::from_utf8_lossy(&bytes)),
                Err(_) => HashMap::new(),
            });
        }

        self.minimap_names
            .as_ref()
            .and_then(|names| names.get(&archive_key(&plain)).cloned())
            .unwrap_or_else(|| format!("world\\minimaps\\{}", plain))
    }

    /// Objects of `map_id` matching `predicate`; the index is built on
    /// first use and kept for the rest of the session
    pub fn collect_game_objects<F>(&mut self, map_id: u32, predicate: F) -> Result<Vec<GameObject>>
    where
        F: Fn(&GameObject) -> bool,
    {
        let index = self.objects.get_or_build(&mut self.source)?;
        Ok(index.collect(map_id, predicate))
    }

    /// Validate a tile selection against the selected map
    pub fn build_job(&self, tiles: &[TileCoord], export_dir: &Path, options: ExportOptions) -> Result<ExportJob> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| ExportError::InvalidSelection("no map selected".to_string()))?;
        if tiles.is_empty() {
            return Err(ExportError::InvalidSelection("no tiles selected".to_string()));
        }

        let mut unique = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if !tile.is_valid() {
                return Err(ExportError::InvalidSelection(format!(
                    "tile {},{} is outside the 64x64 map grid",
                    tile.x, tile.y
                )));
            }
            if !self.descriptor.tile_mask.contains(*tile) {
                return Err(ExportError::InvalidSelection(format!(
                    "tile {},{} has no terrain in {}",
                    tile.x, tile.y, selected.display
                )));
            }
            if !unique.contains(tile) {
                unique.push(*tile);
            }
        }

        Ok(ExportJob {
            map_id: selected.id,
            map_dir: selected.directory.clone(),
            map_name: selected.display.clone(),
            tiles: unique,
            export_dir: export_dir.to_path_buf(),
            options,
        })
    }

    /// Run a job against this session's archives
    pub fn run_export(
        &mut self,
        job: &ExportJob,
        cache: &mut ModelCache,
        progress: &mut dyn ProgressSink,
        path_log: Option<&ExportPathLog>,
    ) -> ExportReport {
        let objects = if job.options.game_objects {
            match self.objects.get_or_build(&mut self.source) {
                Ok(index) => Some(index),
                Err(err) => {
                    tracing::warn!("Game objects unavailable, exporting without them: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let mut exporter = AdtTileExporter::new(&mut self.source);
        TileExportOrchestrator::run(job, &mut exporter, cache, objects, progress, path_log)
    }

    /// Copy the map's global WMO and its groups into `<export_dir>/models`
    pub fn export_world_model(&mut self, cache: &mut ModelCache, export_dir: &Path) -> Result<Option<ExportedTile>> {
        if self.selected.is_none() {
            return Err(ExportError::InvalidSelection("no map selected".to_string()));
        }
        let Some(world_model) = self.descriptor.world_model.clone() else {
            return Ok(None);
        };

        let models_dir: PathBuf = export_dir.join("models");
        let exported = cache.get_or_export(&mut self.source, &world_model.path, &models_dir)?;
        let Some(path) = exported else {
            return Err(ExportError::MissingAsset(world_model.path));
        };
        tracing::info!("Exported world model {} to {}", world_model.path, path.display());

        Ok(Some(ExportedTile {
            tile: TileCoord::new(0, 0),
            kind: ExportKind::WorldModel,
            path,
        }))
    }
}

/// `<dir>\mapXX_YY.blp<TAB><hash>.blp` lines; `dir:` headers are skipped
pub fn parse_md5_translate(content: &str) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("dir:") {
            continue;
        }
        let Some((plain, hashed)) = line.split_once('\t') else {
            continue;
        };
        names.insert(
            archive_key(plain),
            format!("textures\\minimap\\{}", hashed.trim()),
        );
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blp::fixture::palettized_2x2;
    use crate::dbc::fixture::{Field, build};
    use crate::objects::{DEFAULT_GAMEOBJECT_TABLE, GAMEOBJECT_DISPLAY_INFO_DBC};
    use crate::source::MemorySource;

    fn session(source: MemorySource) -> MapSession<MemorySource> {
        MapSession::new(source, DEFAULT_GAMEOBJECT_TABLE)
    }

    fn sparse_descriptor(tiles: &[TileCoord]) -> MapDescriptor {
        let mut tile_mask = TileMask::empty();
        for tile in tiles {
            tile_mask.set(*tile, true);
        }
        MapDescriptor {
            tile_mask,
            world_model: None,
        }
    }

    #[test]
    fn test_missing_wdt_falls_back_to_all_tiles() {
        let mut session = session(MemorySource::default());
        session.select_map(1, "Kalimdor");

        let selected = session.selected().unwrap();
        assert_eq!(selected.directory, "kalimdor");
        assert_eq!(selected.display, "Kalimdor");
        assert_eq!(session.tile_mask().count(), 4096);
        assert!(session.world_model().is_none());
    }

    #[test]
    fn test_unparsable_wdt_falls_back() {
        let mut source = MemorySource::default();
        source.insert(&wdt_path("azeroth"), b"garbage".to_vec());
        let mut session = session(source);
        session.select_map(0, "Azeroth");
        assert_eq!(session.available_tiles().len(), 4096);
    }

    #[test]
    fn test_preview_from_plain_minimap_path() {
        let mut source = MemorySource::default();
        source.insert("World\\Minimaps\\Azeroth\\map32_48.blp", palettized_2x2());
        let mut session = session(source);
        session.select_map(0, "Azeroth");

        let preview = session.load_tile_preview(32, 48, 4).unwrap();
        assert_eq!(preview.tile, TileCoord::new(32, 48));
        assert_eq!(preview.image.dimensions(), (4, 4));
        assert_eq!(preview.image.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(preview.image.get_pixel(3, 3).0, [255, 255, 255, 255]);

        assert!(session.load_tile_preview(1, 1, 4).is_none());
    }

    #[test]
    fn test_preview_through_md5_translate() {
        let mut source = MemorySource::default();
        source.insert(
            MD5_TRANSLATE,
            b"dir: azeroth\nAzeroth\\map01_02.blp\t0123abcd.blp\n".to_vec(),
        );
        source.insert("textures\\minimap\\0123abcd.blp", palettized_2x2());
        source.insert("world\\minimaps\\azeroth\\map03_04.blp", b"not a blp".to_vec());
        let mut session = session(source);
        session.select_map(0, "Azeroth");

        assert!(session.load_tile_preview(1, 2, 2).is_some());
        // Present but undecodable
        assert!(session.load_tile_preview(3, 4, 2).is_none());
    }

    #[test]
    fn test_preview_without_selection() {
        let mut session = session(MemorySource::default());
        assert!(session.load_tile_preview(0, 0, 16).is_none());
    }

    #[test]
    fn test_collect_game_objects_builds_index_once() {
        let mut source = MemorySource::default();
        source.insert(
            DEFAULT_GAMEOBJECT_TABLE,
            build(&[
                vec![Field::U32(1), Field::U32(0), Field::U32(10), Field::F32(1.0), Field::F32(2.0), Field::F32(3.0)],
                vec![Field::U32(2), Field::U32(0), Field::U32(11), Field::F32(1.0), Field::F32(2.0), Field::F32(3.0)],
                vec![Field::U32(3), Field::U32(0), Field::U32(10), Field::F32(9.0), Field::F32(2.0), Field::F32(3.0)],
            ]),
        );
        source.insert(
            GAMEOBJECT_DISPLAY_INFO_DBC,
            build(&[vec![Field::U32(10), Field::Str("World\\Generic\\Barrel.m2")]]),
        );
        let mut session = session(source);

        let all = session.collect_game_objects(0, |_| true).unwrap();
        assert_eq!(all.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 3]);

        let reads = session.source_mut().reads;
        let near = session.collect_game_objects(0, |o| o.position[0] < 5.0).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(session.source_mut().reads, reads);
    }

    #[test]
    fn test_build_job_validation() {
        let dir = Path::new("/tmp/export");
        let mut session = session(MemorySource::default());
        let options = ExportOptions::default();

        let err = session.build_job(&[TileCoord::new(1, 1)], dir, options).unwrap_err();
        assert!(matches!(err, ExportError::InvalidSelection(_)));

        session.apply_selection(0, "Azeroth", sparse_descriptor(&[TileCoord::new(32, 48), TileCoord::new(33, 48)]));
        assert!(session.build_job(&[], dir, options).is_err());
        assert!(session.build_job(&[TileCoord::new(64, 0)], dir, options).is_err());
        assert!(session.build_job(&[TileCoord::new(1, 1)], dir, options).is_err());

        let job = session
            .build_job(
                &[TileCoord::new(33, 48), TileCoord::new(32, 48), TileCoord::new(33, 48)],
                dir,
                options,
            )
            .unwrap();
        assert_eq!(job.map_dir, "azeroth");
        assert_eq!(job.map_name, "Azeroth");
        assert_eq!(job.tiles, vec![TileCoord::new(33, 48), TileCoord::new(32, 48)]);
        assert_eq!(job.manifest_path(), dir.join("azeroth").join("heightmap_manifest.json"));
    }

    #[test]
    fn test_run_export_records_failures_for_missing_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(MemorySource::default());
        session.apply_selection(0, "Azeroth", sparse_descriptor(&[TileCoord::new(32, 48)]));
        let options = ExportOptions {
            game_objects: true,
            ..Default::default()
        };
        let job = session.build_job(&[TileCoord::new(32, 48)], dir.path(), options).unwrap();

        let mut progress = crate::progress::LogProgress::new(crate::progress::CancelFlag::new());
        let report = session.run_export(&job, &mut ModelCache::new(), &mut progress, None);
        assert!(report.exported.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("azeroth_32_48.adt"));
    }

    #[test]
    fn test_export_world_model_copies_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::default();
        source.insert("World\\wmo\\Dungeons\\Karazhan.wmo", b"root".to_vec());
        source.insert("World\\wmo\\Dungeons\\Karazhan_000.wmo", b"g0".to_vec());
        let mut session = session(source);
        let mut cache = ModelCache::new();

        assert!(session.export_world_model(&mut cache, dir.path()).is_err());

        session.apply_selection(0, "Karazhan", MapDescriptor::fallback());
        assert!(session.export_world_model(&mut cache, dir.path()).unwrap().is_none());

        let mut descriptor = MapDescriptor::fallback();
        descriptor.world_model = Some(WorldModelPlacement {
            path: "World\\wmo\\Dungeons\\Karazhan.wmo".to_string(),
            unique_id: 1,
            position: [0.0; 3],
            rotation: [0.0; 3],
            bounds_min: [0.0; 3],
            bounds_max: [0.0; 3],
            flags: 0,
            doodad_set: 0,
            name_set: 0,
        });
        session.apply_selection(0, "Karazhan", descriptor);
        let exported = session.export_world_model(&mut cache, dir.path()).unwrap().unwrap();
        assert_eq!(exported.kind, ExportKind::WorldModel);
        assert_eq!(exported.path, dir.path().join("models").join("karazhan.wmo"));
        assert!(dir.path().join("models").join("karazhan_000.wmo").exists());
    }

    #[test]
    fn test_parse_md5_translate() {
        let names = parse_md5_translate("dir: azeroth\nazeroth\\map32_48.blp\tabc.blp\nbogus\n");
        assert_eq!(names.len(), 1);
        assert_eq!(
            names.get("azeroth\\map32_48.blp").map(String::as_str),
            Some("textures\\minimap\\abc.blp")
        );
    }
}
