// Heightmap reconstruction and raw 16-bit serialization
//
// A terrain chunk stores 17 rows of height samples that alternate between
// 9 outer and 8 inner vertices. Laid onto a square grid, outer rows land on
// even columns and inner rows on odd columns; the gaps in between are filled
// from their neighbours afterwards. Sixteen chunks per side share their edge
// rows, giving a 257x257 grid per tile.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::tile::TileCoord;

pub const CHUNKS_PER_SIDE: usize = 16;
pub const ROWS_PER_CHUNK: usize = 17;
pub const OUTER_ROW_SAMPLES: usize = 9;
pub const INNER_ROW_SAMPLES: usize = 8;
pub const SAMPLES_PER_CHUNK: usize = 145;
pub const GRID_SIDE: usize = CHUNKS_PER_SIDE * (ROWS_PER_CHUNK - 1) + 1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeightRange {
    pub min: f32,
    pub max: f32,
}

impl HeightRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn of_value(value: f32) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn include(&mut self, value: f32) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn merge(&mut self, other: &HeightRange) {
        self.include(other.min);
        self.include(other.max);
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

/// Height samples of one chunk, in file order
#[derive(Clone, Debug, Default)]
pub struct ChunkSamples {
    /// Base height added to every sample
    pub z_offset: f32,
    pub samples: Vec<f32>,
}

/// Square grid of heights with a parallel is-set bitmap
#[derive(Clone, Debug)]
pub struct HeightGrid {
    side: usize,
    heights: Vec<f32>,
    set: Vec<bool>,
}

impl HeightGrid {
    pub fn new(side: usize) -> Self {
        Self {
            side,
            heights: vec![0.0; side * side],
            set: vec![false; side * side],
        }
    }

    /// Grid from already complete row-major heights
    pub fn from_heights(heights: Vec<f32>) -> Self {
        let side = (heights.len() as f64).sqrt() as usize;
        let set = vec![true; heights.len()];
        Self { side, heights, set }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        let idx = self.index(row, col)?;
        self.set[idx].then_some(self.heights[idx])
    }

    pub fn is_set(&self, row: usize, col: usize) -> bool {
        self.index(row, col).is_some_and(|idx| self.set[idx])
    }

    pub fn unset_count(&self) -> usize {
        self.set.iter().filter(|s| !**s).count()
    }

    /// Set a cell unless it already holds a value; returns whether it was set
    fn set_if_unset(&mut self, row: usize, col: usize, value: f32) -> bool {
        let Some(idx) = self.index(row, col) else {
            return false;
        };
        if self.set[idx] {
            return false;
        }
        self.heights[idx] = value;
        self.set[idx] = true;
        true
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.side && col < self.side).then_some(row * self.side + col)
    }
}

/// Result of a heightmap build: the grid and the extrema of its samples
#[derive(Clone, Debug)]
pub struct BuiltHeightmap {
    pub grid: HeightGrid,
    /// `None` when no chunk contributed a sample
    pub range: Option<HeightRange>,
}

pub struct HeightmapBuilder {
    grid: HeightGrid,
    range: Option<HeightRange>,
}

impl HeightmapBuilder {
    pub fn new() -> Self {
        Self {
            grid: HeightGrid::new(GRID_SIDE),
            range: None,
        }
    }

    /// Build from 256 row-major chunk entries; missing entries are skipped
    pub fn build(chunks: &[Option<ChunkSamples>]) -> BuiltHeightmap {
        let mut builder = Self::new();
        for (idx, chunk) in chunks.iter().enumerate().take(CHUNKS_PER_SIDE * CHUNKS_PER_SIDE) {
            if let Some(chunk) = chunk {
                builder.add_chunk(idx / CHUNKS_PER_SIDE, idx % CHUNKS_PER_SIDE, chunk);
            }
        }
        builder.finish()
    }

    /// Place the samples of the chunk at (chunk_row, chunk_col)
    pub fn add_chunk(&mut self, chunk_row: usize, chunk_col: usize, chunk: &ChunkSamples) {
        let base_row = chunk_row * (ROWS_PER_CHUNK - 1);
        let base_col = chunk_col * (ROWS_PER_CHUNK - 1);
        let mut samples = chunk.samples.iter();

        for row in 0..ROWS_PER_CHUNK {
            let outer = row % 2 == 0;
            let count = if outer { OUTER_ROW_SAMPLES } else { INNER_ROW_SAMPLES };
            for col in 0..count {
                let Some(sample) = samples.next() else {
                    return;
                };
                let local_x = if outer { col * 2 } else { col * 2 + 1 };
                let height = sample + chunk.z_offset;
                if self.grid.set_if_unset(base_row + row, base_col + local_x, height) {
                    match &mut self.range {
                        Some(range) => range.include(height),
                        None => self.range = Some(HeightRange::of_value(height)),
                    }
                }
            }
        }
    }

    /// Fill the gaps between samples and hand out the grid
    pub fn finish(mut self) -> BuiltHeightmap {
        self.interpolate();
        BuiltHeightmap {
            grid: self.grid,
            range: self.range,
        }
    }

    // Even columns average the cells above and below, odd columns the cells
    // left and right. Cells filled earlier in the scan count as set.
    fn interpolate(&mut self) {
        let side = self.grid.side();
        for row in 0..side {
            for col in 0..side {
                if self.grid.is_set(row, col) {
                    continue;
                }

                let neighbours = if col % 2 == 0 {
                    [row.checked_sub(1).map(|r| (r, col)), Some((row + 1, col))]
                } else {
                    [col.checked_sub(1).map(|c| (row, c)), Some((row, col + 1))]
                };

                let mut sum = 0.0f32;
                let mut count = 0u32;
                for (r, c) in neighbours.into_iter().flatten() {
                    if let Some(height) = self.grid.get(r, c) {
                        sum += height;
                        count += 1;
                    }
                }

                if count > 0 {
                    self.grid.set_if_unset(row, col, sum / count as f32);
                }
            }
        }
    }
}

impl Default for HeightmapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: u64 },
    Skipped,
}

/// A built heightmap waiting for the batch-wide range before it is written
#[derive(Clone, Debug)]
pub struct HeightmapWriter {
    tile: TileCoord,
    path: PathBuf,
    grid: HeightGrid,
    local_range: Option<HeightRange>,
}

impl HeightmapWriter {
    pub fn new(tile: TileCoord, path: impl Into<PathBuf>, built: BuiltHeightmap) -> Self {
        Self {
            tile,
            path: path.into(),
            grid: built.grid,
            local_range: built.range,
        }
    }

    pub fn tile(&self) -> TileCoord {
        self.tile
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn grid(&self) -> &HeightGrid {
        &self.grid
    }

    pub fn local_range(&self) -> Option<HeightRange> {
        self.local_range
    }

    /// Normalize against `range` and write `side * side` little-endian u16
    pub fn write(&self, range: &HeightRange, overwrite: bool) -> Result<WriteOutcome> {
        if !overwrite && self.path.exists() {
            tracing::trace!("Heightmap {} exists, skipping", self.path.display());
            return Ok(WriteOutcome::Skipped);
        }

        let cells = self.grid.len();
        let side = (cells as f64).sqrt() as usize;
        debug_assert_eq!(side * side, cells, "heightmap grid is not square");
        if side * side != cells {
            return Err(ExportError::InvalidHeightmap(cells));
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| ExportError::io(parent, err))?;
        }

        let file = File::create(&self.path).map_err(|err| ExportError::io(&self.path, err))?;
        let mut out = BufWriter::new(file);
        encode_heights(self.grid.heights(), range, &mut out)
            .and_then(|_| out.flush())
            .map_err(|err| ExportError::io(&self.path, err))?;

        Ok(WriteOutcome::Written {
            bytes: (cells * 2) as u64,
        })
    }
}

/// Scale a height to the 0..=65535 range of `range`
pub fn normalize_height(height: f32, range: &HeightRange) -> u16 {
    let span = range.max as f64 - range.min as f64;
    if span <= 0.0 {
        return 0;
    }
    let normalized = (height as f64 - range.min as f64) / span;
    // Saturating cast: values outside the range clamp to 0 or 65535
    (normalized * 65535.0).round() as u16
}

fn encode_heights<W: Write>(heights: &[f32], range: &HeightRange, out: &mut W) -> std::io::Result<()> {
    for height in heights {
        out.write_u16::<LittleEndian>(normalize_height(*height, range))?;
    }
    Ok(())
}
