// Batch export of terrain tiles
//
// Pass 1 exports every tile and keeps the heightmaps it built. Pass 2 writes
// those heightmaps against the height range of the whole batch, so all
// tiles of one export share the same vertical scale.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::heightmap::{HeightRange, HeightmapWriter, WriteOutcome};
use crate::objects::GameObjectIndex;
use crate::progress::ProgressSink;
use crate::terrain::{ExportKind, MeshQuality, ModelCache, TileExporter, TileRequest};
use crate::tile::TileCoord;

pub const MANIFEST_FILE: &str = "heightmap_manifest.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub quality: MeshQuality,
    pub heightmaps: bool,
    pub game_objects: bool,
}

#[derive(Clone, Debug)]
pub struct ExportJob {
    pub map_id: u32,
    /// Lowercase directory, used for paths
    pub map_dir: String,
    /// Directory as stored in Map.dbc, used for display
    pub map_name: String,
    pub tiles: Vec<TileCoord>,
    pub export_dir: PathBuf,
    pub options: ExportOptions,
}

impl ExportJob {
    pub fn manifest_path(&self) -> PathBuf {
        self.export_dir.join(&self.map_dir).join(MANIFEST_FILE)
    }

    fn request(&self, tile: TileCoord, objects: Option<&GameObjectIndex>) -> TileRequest {
        let game_objects = if self.options.game_objects {
            objects.map(|index| index.in_bounds(self.map_id, &tile.bounds()))
        } else {
            None
        };
        TileRequest {
            map_id: self.map_id,
            map_dir: self.map_dir.clone(),
            tile,
            output_dir: self.export_dir.clone(),
            quality: self.options.quality,
            game_objects,
            want_heightmap: self.options.heightmaps,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportedTile {
    pub tile: TileCoord,
    pub kind: ExportKind,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileFailure {
    pub tile: TileCoord,
    pub message: String,
    /// Full error chain
    pub detail: String,
}

impl TileFailure {
    fn new(tile: TileCoord, err: &ExportError) -> Self {
        Self {
            tile,
            message: err.to_string(),
            detail: error_chain(err),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub exported: Vec<ExportedTile>,
    pub failures: Vec<TileFailure>,
    pub heightmaps_written: usize,
    pub manifest: Option<PathBuf>,
    pub global_range: Option<HeightRange>,
    pub cancelled: bool,
    /// Error chain of a failed manifest write
    pub manifest_error: Option<String>,
    /// Error chain of a failed export-path log append
    pub path_log_error: Option<String>,
}

impl ExportReport {
    pub fn io_errors(&self) -> impl Iterator<Item = &str> {
        self.manifest_error.iter().chain(self.path_log_error.iter()).map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
struct Manifest {
    export: ManifestExport,
    height_range: ManifestRange,
}

#[derive(Debug, Serialize)]
struct ManifestExport {
    tile_count: usize,
}

#[derive(Debug, Serialize)]
struct ManifestRange {
    min_height: f32,
    max_height: f32,
    range: f32,
}

/// Appends "<kind>:<path>" per exported tile
#[derive(Clone, Debug)]
pub struct ExportPathLog {
    path: PathBuf,
}

impl ExportPathLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, tiles: &[ExportedTile]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| ExportError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| ExportError::io(&self.path, err))?;
        let mut out = BufWriter::new(file);
        for tile in tiles {
            writeln!(out, "{}:{}", tile.kind, tile.path.display()).map_err(|err| ExportError::io(&self.path, err))?;
        }
        out.flush().map_err(|err| ExportError::io(&self.path, err))
    }
}

pub struct TileExportOrchestrator;

impl TileExportOrchestrator {
    /// Export every tile of `job`. Per-tile failures, manifest and path log
    /// I/O errors all land in the report. The model cache is cleared before
    /// returning on every path.
    pub fn run(
        job: &ExportJob,
        exporter: &mut dyn TileExporter,
        cache: &mut ModelCache,
        objects: Option<&GameObjectIndex>,
        progress: &mut dyn ProgressSink,
        path_log: Option<&ExportPathLog>,
    ) -> ExportReport {
        let report = Self::run_passes(job, exporter, cache, objects, progress, path_log);
        cache.clear();
        report
    }

    fn run_passes(
        job: &ExportJob,
        exporter: &mut dyn TileExporter,
        cache: &mut ModelCache,
        objects: Option<&GameObjectIndex>,
        progress: &mut dyn ProgressSink,
        path_log: Option<&ExportPathLog>,
    ) -> ExportReport {
        tracing::info!(
            "Exporting {} tiles of {} ({}) to {}",
            job.tiles.len(),
            job.map_name,
            job.map_id,
            job.export_dir.display()
        );

        let mut report = ExportReport::default();
        let mut writers: Vec<HeightmapWriter> = Vec::new();
        let total = job.tiles.len();

        for (idx, tile) in job.tiles.iter().enumerate() {
            if progress.should_stop() {
                tracing::info!("Export cancelled after {} of {} tiles", idx, total);
                report.cancelled = true;
                break;
            }
            progress.report(&format!("Exporting tile {}", tile), idx + 1, total);

            let request = job.request(*tile, objects);
            match exporter.export_tile(&request, cache, progress) {
                Ok(output) => {
                    tracing::debug!("Exported tile {} to {}", tile, output.path.display());
                    if let Some(writer) = output.heightmap {
                        if let Some(local) = writer.local_range() {
                            match &mut report.global_range {
                                Some(global) => global.merge(&local),
                                None => report.global_range = Some(local),
                            }
                        }
                        writers.push(writer);
                    }
                    report.exported.push(ExportedTile {
                        tile: *tile,
                        kind: output.kind,
                        path: output.path,
                    });
                }
                Err(err) => {
                    tracing::warn!("Failed to export tile {}: {}", tile, err);
                    report.failures.push(TileFailure::new(*tile, &err));
                }
            }
        }

        if !writers.is_empty() {
            if let Err(err) = Self::write_heightmaps(job, &writers, progress, &mut report) {
                tracing::error!("Failed to write heightmap manifest: {}", err);
                report.manifest_error = Some(error_chain(&err));
            }
        }

        if let Some(log) = path_log {
            if let Err(err) = log.append(&report.exported) {
                tracing::error!("Failed to append to {}: {}", log.path().display(), err);
                report.path_log_error = Some(error_chain(&err));
            }
        }

        tracing::info!(
            "Export finished: {} exported, {} failed, {} heightmaps{}",
            report.exported.len(),
            report.failures.len(),
            report.heightmaps_written,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    fn write_heightmaps(
        job: &ExportJob,
        writers: &[HeightmapWriter],
        progress: &mut dyn ProgressSink,
        report: &mut ExportReport,
    ) -> Result<()> {
        let range = report.global_range.unwrap_or(HeightRange::of_value(0.0));
        tracing::info!(
            "Writing {} heightmaps with height range {} .. {}",
            writers.len(),
            range.min,
            range.max
        );

        let mut attempted = 0usize;
        for (idx, writer) in writers.iter().enumerate() {
            if progress.should_stop() {
                tracing::info!("Heightmap writing cancelled after {} of {}", idx, writers.len());
                report.cancelled = true;
                break;
            }
            progress.report("Writing heightmaps", idx + 1, writers.len());

            attempted += 1;
            match writer.write(&range, true) {
                Ok(WriteOutcome::Written { .. }) => report.heightmaps_written += 1,
                Ok(WriteOutcome::Skipped) => {}
                Err(err) => {
                    tracing::warn!("Failed to write heightmap for tile {}: {}", writer.tile(), err);
                    report.failures.push(TileFailure::new(writer.tile(), &err));
                }
            }
        }

        if attempted == 0 {
            return Ok(());
        }

        let manifest = Manifest {
            export: ManifestExport {
                tile_count: report.heightmaps_written,
            },
            height_range: ManifestRange {
                min_height: range.min,
                max_height: range.max,
                range: range.span(),
            },
        };
        let path = job.manifest_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| ExportError::io(parent, err))?;
        }
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&path, json).map_err(|err| ExportError::io(&path, err))?;
        tracing::debug!("Wrote {}", path.display());
        report.manifest = Some(path);
        Ok(())
    }
}

/// "outer: inner: innermost"
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dbc::DbcFile;
    use crate::dbc::fixture::{Field, build};
    use crate::heightmap::{BuiltHeightmap, HeightGrid};
    use crate::progress::{CancelFlag, LogProgress};
    use crate::source::MemorySource;
    use crate::terrain::TileOutput;

    /// Returns a 2x2 heightmap per tile spanning the tile's configured range
    struct ScriptedExporter {
        ranges: HashMap<TileCoord, HeightRange>,
        failing: Vec<TileCoord>,
        cancel_on: Option<(TileCoord, CancelFlag)>,
        source: MemorySource,
        seen_objects: Vec<Option<usize>>,
    }

    impl ScriptedExporter {
        fn new(ranges: &[(TileCoord, HeightRange)]) -> Self {
            let mut source = MemorySource::default();
            source.insert("World\\Generic\\Barrel.m2", b"MD20".to_vec());
            Self {
                ranges: ranges.iter().copied().collect(),
                failing: Vec::new(),
                cancel_on: None,
                source,
                seen_objects: Vec::new(),
            }
        }
    }

    impl TileExporter for ScriptedExporter {
        fn export_tile(
            &mut self,
            request: &TileRequest,
            cache: &mut ModelCache,
            _progress: &mut dyn ProgressSink,
        ) -> Result<TileOutput> {
            self.seen_objects.push(request.game_objects.as_ref().map(Vec::len));
            if let Some((tile, flag)) = &self.cancel_on {
                if *tile == request.tile {
                    flag.cancel();
                }
            }
            if self.failing.contains(&request.tile) {
                return Err(ExportError::MissingAsset(format!("tile {}", request.tile)));
            }

            cache.get_or_export(&mut self.source, "World\\Generic\\Barrel.m2", &request.models_dir())?;

            let range = self.ranges[&request.tile];
            let heightmap = request.want_heightmap.then(|| {
                HeightmapWriter::new(
                    request.tile,
                    request.heightmap_path(),
                    BuiltHeightmap {
                        grid: HeightGrid::from_heights(vec![range.min, range.max, range.min, range.max]),
                        range: Some(range),
                    },
                )
            });
            Ok(TileOutput {
                kind: ExportKind::Terrain,
                path: request.obj_path(),
                heightmap,
            })
        }
    }

    fn job(dir: &Path, tiles: Vec<TileCoord>) -> ExportJob {
        ExportJob {
            map_id: 0,
            map_dir: "azeroth".to_string(),
            map_name: "Azeroth".to_string(),
            tiles,
            export_dir: dir.to_path_buf(),
            options: ExportOptions {
                quality: MeshQuality::High,
                heightmaps: true,
                game_objects: false,
            },
        }
    }

    fn read_u16s(path: &Path) -> Vec<u16> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_failed_tile_is_skipped_and_range_is_global() {
        let dir = tempfile::tempdir().unwrap();
        let (t1, t2, t3) = (TileCoord::new(30, 30), TileCoord::new(31, 30), TileCoord::new(32, 30));
        let mut exporter = ScriptedExporter::new(&[
            (t1, HeightRange::new(0.0, 10.0)),
            (t2, HeightRange::new(-100.0, 500.0)),
            (t3, HeightRange::new(5.0, 20.0)),
        ]);
        exporter.failing.push(t2);

        let job = job(dir.path(), vec![t1, t2, t3]);
        let log = ExportPathLog::new(dir.path().join("exports.log"));
        let mut cache = ModelCache::new();
        let mut progress = LogProgress::new(CancelFlag::new());

        let report =
            TileExportOrchestrator::run(&job, &mut exporter, &mut cache, None, &mut progress, Some(&log));

        assert_eq!(report.exported.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tile, t2);
        assert!(report.failures[0].message.contains("asset not found"));
        assert_eq!(report.global_range, Some(HeightRange::new(0.0, 20.0)));
        assert_eq!(report.heightmaps_written, 2);
        assert!(!report.cancelled);
        assert!(cache.is_empty());

        let tile_dir = dir.path().join("azeroth");
        assert_eq!(read_u16s(&tile_dir.join("adt_30_30_heightmap.raw")), vec![0, 32768, 0, 32768]);
        assert_eq!(read_u16s(&tile_dir.join("adt_32_30_heightmap.raw")), vec![16384, 65535, 16384, 65535]);
        assert!(!tile_dir.join("adt_31_30_heightmap.raw").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(job.manifest_path()).unwrap()).unwrap();
        assert_eq!(manifest["export"]["tile_count"], 2);
        assert_eq!(manifest["height_range"]["min_height"], 0.0);
        assert_eq!(manifest["height_range"]["max_height"], 20.0);
        assert_eq!(manifest["height_range"]["range"], 20.0);
        assert_eq!(report.manifest, Some(job.manifest_path()));

        let lines = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = lines.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("ADT:{}", tile_dir.join("adt_30_30.obj").display()),
                format!("ADT:{}", tile_dir.join("adt_32_30.obj").display()),
            ]
        );
    }

    #[test]
    fn test_heightmap_write_failure_is_attributed_and_manifest_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (t1, t2) = (TileCoord::new(1, 1), TileCoord::new(2, 1));
        let mut exporter = ScriptedExporter::new(&[
            (t1, HeightRange::new(0.0, 4.0)),
            (t2, HeightRange::new(0.0, 8.0)),
        ]);
        let job = job(dir.path(), vec![t1, t2]);

        let tile_dir = dir.path().join("azeroth");
        std::fs::create_dir_all(tile_dir.join("adt_1_1_heightmap.raw")).unwrap();
        std::fs::write(job.manifest_path(), "stale").unwrap();

        let report = TileExportOrchestrator::run(
            &job,
            &mut exporter,
            &mut ModelCache::new(),
            None,
            &mut LogProgress::new(CancelFlag::new()),
            None,
        );

        assert_eq!(report.exported.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tile, t1);
        assert_eq!(report.heightmaps_written, 1);
        assert_eq!(read_u16s(&tile_dir.join("adt_2_1_heightmap.raw")), vec![0, 65535, 0, 65535]);

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(job.manifest_path()).unwrap()).unwrap();
        assert_eq!(manifest["export"]["tile_count"], 1);
        assert_eq!(manifest["height_range"]["max_height"], 8.0);
        assert_eq!(report.manifest, Some(job.manifest_path()));
        assert!(report.manifest_error.is_none());
    }

    #[test]
    fn test_path_log_written_when_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (t1, t2) = (TileCoord::new(1, 1), TileCoord::new(2, 1));
        let mut exporter = ScriptedExporter::new(&[
            (t1, HeightRange::new(0.0, 1.0)),
            (t2, HeightRange::new(0.0, 2.0)),
        ]);
        let job = job(dir.path(), vec![t1, t2]);
        std::fs::create_dir_all(job.manifest_path()).unwrap();
        let log = ExportPathLog::new(dir.path().join("exports.log"));

        let mut cache = ModelCache::new();
        let report = TileExportOrchestrator::run(
            &job,
            &mut exporter,
            &mut cache,
            None,
            &mut LogProgress::new(CancelFlag::new()),
            Some(&log),
        );

        assert_eq!(report.exported.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.heightmaps_written, 2);
        assert!(report.manifest.is_none());
        assert!(report.manifest_error.as_deref().unwrap().contains("heightmap_manifest.json"));
        assert!(report.path_log_error.is_none());
        assert_eq!(report.io_errors().count(), 1);
        assert!(cache.is_empty());

        let lines = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert!(lines.lines().all(|line| line.starts_with("ADT:")));
    }

    #[test]
    fn test_cancel_before_heightmap_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (t1, t2) = (TileCoord::new(1, 1), TileCoord::new(2, 1));
        let flag = CancelFlag::new();
        let mut exporter = ScriptedExporter::new(&[
            (t1, HeightRange::new(0.0, 1.0)),
            (t2, HeightRange::new(0.0, 2.0)),
        ]);
        exporter.cancel_on = Some((t2, flag.clone()));

        let job = job(dir.path(), vec![t1, t2]);
        let mut cache = ModelCache::new();
        let mut progress = LogProgress::new(flag);
        let report = TileExportOrchestrator::run(&job, &mut exporter, &mut cache, None, &mut progress, None);

        assert!(report.cancelled);
        assert_eq!(report.exported.len(), 2);
        assert_eq!(report.heightmaps_written, 0);
        assert!(report.manifest.is_none());
        assert!(!job.manifest_path().exists());
        assert!(!dir.path().join("azeroth").join("adt_1_1_heightmap.raw").exists());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cancel_before_first_tile() {
        let dir = tempfile::tempdir().unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let mut exporter = ScriptedExporter::new(&[(TileCoord::new(1, 1), HeightRange::new(0.0, 1.0))]);
        let job = job(dir.path(), vec![TileCoord::new(1, 1)]);
        let log = ExportPathLog::new(dir.path().join("exports.log"));

        let report = TileExportOrchestrator::run(
            &job,
            &mut exporter,
            &mut ModelCache::new(),
            None,
            &mut LogProgress::new(flag),
            Some(&log),
        );

        assert!(report.cancelled);
        assert!(report.exported.is_empty());
        assert!(exporter.seen_objects.is_empty());
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "");
    }

    #[test]
    fn test_game_objects_are_filtered_per_tile() {
        let dir = tempfile::tempdir().unwrap();
        let placements = DbcFile::from_bytes(&build(&[
            vec![Field::U32(1), Field::U32(0), Field::U32(5), Field::F32(-10.0), Field::F32(-10.0), Field::F32(0.0)],
            vec![Field::U32(2), Field::U32(0), Field::U32(5), Field::F32(-600.0), Field::F32(-10.0), Field::F32(0.0)],
        ]))
        .unwrap();
        let display = DbcFile::from_bytes(&build(&[vec![Field::U32(5), Field::Str("World\\Generic\\Barrel.m2")]])).unwrap();
        let index = GameObjectIndex::from_tables(&placements, &display);

        let (center, other) = (TileCoord::new(32, 32), TileCoord::new(10, 10));
        let mut exporter = ScriptedExporter::new(&[
            (center, HeightRange::new(0.0, 1.0)),
            (other, HeightRange::new(0.0, 1.0)),
        ]);
        let mut job = job(dir.path(), vec![center, other]);
        job.options.game_objects = true;
        job.options.heightmaps = false;

        let report = TileExportOrchestrator::run(
            &job,
            &mut exporter,
            &mut ModelCache::new(),
            Some(&index),
            &mut LogProgress::new(CancelFlag::new()),
            None,
        );

        assert_eq!(exporter.seen_objects, vec![Some(1), Some(0)]);
        assert!(report.manifest.is_none());
        assert_eq!(report.heightmaps_written, 0);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = ExportError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error_chain(&err), "I/O error on /tmp/x: denied: denied");
    }
}
