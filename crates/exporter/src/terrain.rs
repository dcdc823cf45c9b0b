// Per-tile terrain export: OBJ mesh, model placements and heightmap capture
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::adt::TerrainTile;
use crate::culler::cull_faces_with_stats;
use crate::error::{ExportError, Result};
use crate::heightmap::{CHUNKS_PER_SIDE, HeightmapBuilder, HeightmapWriter, ROWS_PER_CHUNK, SAMPLES_PER_CHUNK};
use crate::objects::GameObject;
use crate::progress::ProgressSink;
use crate::source::{AssetSource, adt_path, archive_key};
use crate::tile::{CHUNK_SIZE, TileCoord};

/// Distance between two outer vertices of a chunk
const UNIT_SIZE: f32 = CHUNK_SIZE / 8.0;

/// Quads per chunk side
const QUADS_PER_SIDE: usize = 8;

/// Upper bound when probing WMO group files
const MAX_WMO_GROUPS: usize = 512;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeshQuality {
    /// Outer vertices only, two triangles per quad
    Low,
    /// Four triangles per quad around the inner vertex
    #[default]
    High,
}

impl FromStr for MeshQuality {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(MeshQuality::Low),
            "high" => Ok(MeshQuality::High),
            other => Err(format!("Unknown mesh quality '{}' (expected low or high)", other)),
        }
    }
}

impl fmt::Display for MeshQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshQuality::Low => write!(f, "low"),
            MeshQuality::High => write!(f, "high"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Terrain,
    WorldModel,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKind::Terrain => write!(f, "ADT"),
            ExportKind::WorldModel => write!(f, "WMO"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TileRequest {
    pub map_id: u32,
    /// Lowercase map directory
    pub map_dir: String,
    pub tile: TileCoord,
    pub output_dir: PathBuf,
    pub quality: MeshQuality,
    /// Game objects already filtered to this tile
    pub game_objects: Option<Vec<GameObject>>,
    pub want_heightmap: bool,
}

impl TileRequest {
    pub fn tile_dir(&self) -> PathBuf {
        self.output_dir.join(&self.map_dir)
    }

    pub fn obj_path(&self) -> PathBuf {
        self.tile_dir().join(format!("adt_{}.obj", self.tile))
    }

    pub fn placement_path(&self) -> PathBuf {
        self.tile_dir()
            .join(format!("adt_{}_ModelPlacementInformation.csv", self.tile))
    }

    pub fn heightmap_path(&self) -> PathBuf {
        self.tile_dir().join(format!("adt_{}_heightmap.raw", self.tile))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.output_dir.join("models")
    }
}

#[derive(Debug)]
pub struct TileOutput {
    pub kind: ExportKind,
    pub path: PathBuf,
    /// Built but unwritten heightmap, when one was requested
    pub heightmap: Option<HeightmapWriter>,
}

pub trait TileExporter {
    fn export_tile(
        &mut self,
        request: &TileRequest,
        cache: &mut ModelCache,
        progress: &mut dyn ProgressSink,
    ) -> Result<TileOutput>;
}

/// Archive path -> exported file, or `None` for a model the archives lack.
/// Lives for one export job.
#[derive(Debug, Default)]
pub struct ModelCache {
    entries: HashMap<String, Option<PathBuf>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a model (and for WMOs its group files) into `models_dir` once
    pub fn get_or_export<S: AssetSource + ?Sized>(
        &mut self,
        source: &mut S,
        archive_path: &str,
        models_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let key = archive_key(archive_path);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.clone());
        }

        let exported = export_model(source, &key, models_dir)?;
        self.entries.insert(key, exported.clone());
        Ok(exported)
    }

    pub fn contains(&self, archive_path: &str) -> bool {
        self.entries.contains_key(&archive_key(archive_path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn export_model<S: AssetSource + ?Sized>(source: &mut S, key: &str, models_dir: &Path) -> Result<Option<PathBuf>> {
    let bytes = match source.read_by_name(key) {
        Ok(bytes) => bytes,
        Err(ExportError::MissingAsset(_)) => {
            tracing::debug!("Model {} not found in archives", key);
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    std::fs::create_dir_all(models_dir).map_err(|err| ExportError::io(models_dir, err))?;
    let target = models_dir.join(plain_name(key));
    std::fs::write(&target, &bytes).map_err(|err| ExportError::io(&target, err))?;

    if let Some(stem) = key.strip_suffix(".wmo") {
        let mut groups = 0usize;
        for idx in 0..MAX_WMO_GROUPS {
            let group = format!("{}_{:03}.wmo", stem, idx);
            let Ok(group_bytes) = source.read_by_name(&group) else {
                break;
            };
            let group_target = models_dir.join(plain_name(&group));
            std::fs::write(&group_target, &group_bytes).map_err(|err| ExportError::io(&group_target, err))?;
            groups += 1;
        }
        tracing::trace!("Exported {} with {} groups", key, groups);
    } else {
        tracing::trace!("Exported {}", key);
    }

    Ok(Some(target))
}

/// File name component of an archive path
pub fn plain_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainMesh {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl TerrainMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// World-space mesh of every present chunk of a tile
pub fn build_mesh(terrain: &TerrainTile, coord: TileCoord, quality: MeshQuality) -> TerrainMesh {
    let bounds = coord.bounds();
    let mut mesh = TerrainMesh::default();

    for (idx, chunk) in terrain.chunks.iter().enumerate().take(CHUNKS_PER_SIDE * CHUNKS_PER_SIDE) {
        let Some(chunk) = chunk else {
            continue;
        };
        let chunk_row = (idx / CHUNKS_PER_SIDE) as f32;
        let chunk_col = (idx % CHUNKS_PER_SIDE) as f32;
        let base = mesh.vertex_count() as u32;

        for sample in 0..SAMPLES_PER_CHUNK {
            let (along_x, along_y) = sample_offset(sample);
            mesh.vertices.push(bounds.max_x - chunk_row * CHUNK_SIZE - along_x);
            mesh.vertices.push(bounds.max_y - chunk_col * CHUNK_SIZE - along_y);
            mesh.vertices.push(chunk.height(sample));
        }

        chunk_indices(chunk.holes, quality, base, &mut mesh.indices);
    }

    mesh
}

/// Offset of a sample from the chunk corner, along world X then world Y
fn sample_offset(sample: usize) -> (f32, f32) {
    let row = (sample / ROWS_PER_CHUNK) as f32;
    let rem = sample % ROWS_PER_CHUNK;
    if rem < QUADS_PER_SIDE + 1 {
        (row * UNIT_SIZE, rem as f32 * UNIT_SIZE)
    } else {
        let col = (rem - QUADS_PER_SIDE - 1) as f32;
        (row * UNIT_SIZE + UNIT_SIZE / 2.0, col * UNIT_SIZE + UNIT_SIZE / 2.0)
    }
}

/// Triangle indices of one chunk, skipping quads under a hole bit
pub fn chunk_indices(holes: u16, quality: MeshQuality, base: u32, out: &mut Vec<u32>) {
    for row in 0..QUADS_PER_SIDE {
        for col in 0..QUADS_PER_SIDE {
            let hole_bit = (row / 2) * 4 + col / 2;
            if holes & (1 << hole_bit) != 0 {
                continue;
            }

            let top_left = base + (row * ROWS_PER_CHUNK + col) as u32;
            let top_right = top_left + 1;
            let bottom_left = top_left + ROWS_PER_CHUNK as u32;
            let bottom_right = bottom_left + 1;

            match quality {
                MeshQuality::High => {
                    let center = top_left + QUADS_PER_SIDE as u32 + 1;
                    out.extend_from_slice(&[
                        center, top_left, bottom_left,
                        center, top_right, top_left,
                        center, bottom_right, top_right,
                        center, bottom_left, bottom_right,
                    ]);
                }
                MeshQuality::Low => {
                    out.extend_from_slice(&[
                        top_left, bottom_left, top_right,
                        top_right, bottom_left, bottom_right,
                    ]);
                }
            }
        }
    }
}

/// Wavefront OBJ, Y-up, 1-based faces
pub fn write_obj(path: &Path, vertices: &[f32], indices: &[u32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| ExportError::io(parent, err))?;
    }
    let file = File::create(path).map_err(|err| ExportError::io(path, err))?;
    let mut w = BufWriter::new(file);
    write_obj_body(&mut w, vertices, indices)
        .and_then(|_| w.flush())
        .map_err(|err| ExportError::io(path, err))
}

fn write_obj_body<W: Write>(w: &mut W, vertices: &[f32], indices: &[u32]) -> std::io::Result<()> {
    writeln!(w, "# {} vertices, {} faces", vertices.len() / 3, indices.len() / 3)?;
    for v in vertices.chunks_exact(3) {
        writeln!(w, "v {} {} {}", v[0], v[2], -v[1])?;
    }
    for f in indices.chunks_exact(3) {
        writeln!(w, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
    }
    Ok(())
}

pub const PLACEMENT_HEADER: &str =
    "ModelFile;PositionX;PositionY;PositionZ;RotationX;RotationY;RotationZ;ScaleFactor;ModelId;Type";

/// One row of the placement CSV
#[derive(Clone, Debug, PartialEq)]
pub struct PlacementRow {
    pub model_file: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: f32,
    pub model_id: u32,
    pub kind: &'static str,
}

pub fn write_placements(path: &Path, rows: &[PlacementRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| ExportError::io(parent, err))?;
    }
    let file = File::create(path).map_err(|err| ExportError::io(path, err))?;
    let mut w = BufWriter::new(file);
    write_placement_body(&mut w, rows)
        .and_then(|_| w.flush())
        .map_err(|err| ExportError::io(path, err))
}

fn write_placement_body<W: Write>(w: &mut W, rows: &[PlacementRow]) -> std::io::Result<()> {
    writeln!(w, "{}", PLACEMENT_HEADER)?;
    for row in rows {
        writeln!(
            w,
            "{};{};{};{};{};{};{};{};{};{}",
            row.model_file,
            row.position[0],
            row.position[1],
            row.position[2],
            row.rotation[0],
            row.rotation[1],
            row.rotation[2],
            row.scale,
            row.model_id,
            row.kind
        )?;
    }
    Ok(())
}

/// Exports terrain tiles straight from the archives
pub struct AdtTileExporter<'a, S: AssetSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: AssetSource + ?Sized> AdtTileExporter<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self { source }
    }

    /// Write everything for an already decoded tile
    pub fn export_terrain(
        &mut self,
        request: &TileRequest,
        terrain: &TerrainTile,
        cache: &mut ModelCache,
        progress: &mut dyn ProgressSink,
    ) -> Result<TileOutput> {
        let label = format!("Exporting tile {}", request.tile);

        progress.report(&label, 1, 4);
        let mesh = build_mesh(terrain, request.tile, request.quality);
        let (indices, stats) = cull_faces_with_stats(&mesh.indices, &mesh.vertices);
        tracing::debug!(
            "Tile {}: {} vertices, {} of {} triangles kept ({} collapsed, {} degenerate)",
            request.tile,
            mesh.vertex_count(),
            indices.len() / 3,
            stats.input,
            stats.collapsed,
            stats.degenerate
        );

        let obj_path = request.obj_path();
        write_obj(&obj_path, &mesh.vertices, &indices)?;

        progress.report(&label, 2, 4);
        let rows = self.placement_rows(request, terrain, cache)?;
        write_placements(&request.placement_path(), &rows)?;

        progress.report(&label, 3, 4);
        let heightmap = request.want_heightmap.then(|| {
            let built = HeightmapBuilder::build(&terrain.chunk_samples());
            HeightmapWriter::new(request.tile, request.heightmap_path(), built)
        });

        progress.report(&label, 4, 4);
        Ok(TileOutput {
            kind: ExportKind::Terrain,
            path: obj_path,
            heightmap,
        })
    }

    fn placement_rows(
        &mut self,
        request: &TileRequest,
        terrain: &TerrainTile,
        cache: &mut ModelCache,
    ) -> Result<Vec<PlacementRow>> {
        let models_dir = request.models_dir();
        let mut rows = Vec::new();

        for doodad in &terrain.doodads {
            rows.push(PlacementRow {
                model_file: self.model_file(cache, &doodad.model, &models_dir)?,
                position: doodad.position,
                rotation: doodad.rotation,
                scale: doodad.scale,
                model_id: 0,
                kind: "m2",
            });
        }

        for wmo in &terrain.wmos {
            rows.push(PlacementRow {
                model_file: self.model_file(cache, &wmo.model, &models_dir)?,
                position: wmo.position,
                rotation: wmo.rotation,
                scale: 1.0,
                model_id: wmo.unique_id,
                kind: "wmo",
            });
        }

        for object in request.game_objects.iter().flatten() {
            rows.push(PlacementRow {
                model_file: self.model_file(cache, &object.model, &models_dir)?,
                position: object.position,
                rotation: [0.0, object.orientation.to_degrees(), 0.0],
                scale: object.scale,
                model_id: object.id,
                kind: "gobj",
            });
        }

        Ok(rows)
    }

    /// Exported path relative to the tile directory, or the archive path
    fn model_file(&mut self, cache: &mut ModelCache, model: &str, models_dir: &Path) -> Result<String> {
        Ok(match cache.get_or_export(&mut *self.source, model, models_dir)? {
            Some(path) => format!(
                "../models/{}",
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
            ),
            None => model.to_string(),
        })
    }
}

impl<S: AssetSource + ?Sized> TileExporter for AdtTileExporter<'_, S> {
    fn export_tile(
        &mut self,
        request: &TileRequest,
        cache: &mut ModelCache,
        progress: &mut dyn ProgressSink,
    ) -> Result<TileOutput> {
        let name = adt_path(&request.map_dir, request.tile.x, request.tile.y);
        tracing::debug!("Reading {}", name);
        let bytes = self.source.read_by_name(&name)?;
        let terrain = TerrainTile::parse(&bytes)?;
        self.export_terrain(request, &terrain, cache, progress)
    }
}
