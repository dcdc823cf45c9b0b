// Terrain tile (ADT root) decoding into the parts the exporters consume
use std::io::Cursor;

use wow_adt::{ParsedAdt, parse_adt};

use crate::error::{ExportError, Result};
use crate::heightmap::{
    CHUNKS_PER_SIDE, ChunkSamples, INNER_ROW_SAMPLES, OUTER_ROW_SAMPLES, ROWS_PER_CHUNK, SAMPLES_PER_CHUNK,
};
use crate::objects::fix_model_extension;

#[derive(Clone, Debug, PartialEq)]
pub struct TerrainChunk {
    /// Base height of the chunk
    pub z_offset: f32,
    /// Low resolution hole mask, one bit per 2x2 quads
    pub holes: u16,
    /// 145 heights relative to `z_offset`, outer and inner rows interleaved
    pub samples: Vec<f32>,
}

impl TerrainChunk {
    pub fn height(&self, sample: usize) -> f32 {
        self.z_offset + self.samples.get(sample).copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoodadPlacement {
    pub model: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WmoPlacement {
    pub model: String,
    pub unique_id: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    pub doodad_set: u16,
}

#[derive(Clone, Debug, Default)]
pub struct TerrainTile {
    /// 256 row-major chunks; `None` where the file has no chunk
    pub chunks: Vec<Option<TerrainChunk>>,
    pub doodads: Vec<DoodadPlacement>,
    pub wmos: Vec<WmoPlacement>,
}

impl TerrainTile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let parsed = parse_adt(&mut cursor).map_err(|err| ExportError::decode("ADT", err))?;
        let root = match parsed {
            ParsedAdt::Root(root) => root,
            _ => return Err(ExportError::decode("ADT", "not a root terrain file")),
        };

        let mut chunks = Vec::with_capacity(CHUNKS_PER_SIDE * CHUNKS_PER_SIDE);
        for idx in 0..CHUNKS_PER_SIDE * CHUNKS_PER_SIDE {
            let Some(cell) = root.mcnk_chunks.get(idx) else {
                chunks.push(None);
                continue;
            };

            let samples = match &cell.heights {
                Some(heights) => interleave_samples(
                    |x, y| heights.get_outer_height(x, y),
                    |x, y| heights.get_inner_height(x, y),
                ),
                None => vec![0.0; SAMPLES_PER_CHUNK],
            };

            chunks.push(Some(TerrainChunk {
                z_offset: cell.header.position[0],
                holes: cell.header.holes_low_res,
                samples,
            }));
        }

        let models: Vec<String> = root.models.iter().map(|name| fix_model_extension(name)).collect();
        let mut doodads = Vec::with_capacity(root.doodad_placements.len());
        for placement in &root.doodad_placements {
            let Some(model) = models.get(placement.name_id as usize) else {
                tracing::trace!("Doodad placement with unknown name id {}", placement.name_id);
                continue;
            };
            doodads.push(DoodadPlacement {
                model: model.clone(),
                position: [placement.position[0], placement.position[1], placement.position[2]],
                rotation: [placement.rotation[0], placement.rotation[1], placement.rotation[2]],
                scale: placement.scale as f32 / 1024.0,
            });
        }

        let mut wmos = Vec::with_capacity(root.wmo_placements.len());
        for placement in &root.wmo_placements {
            let Some(model) = root.wmos.get(placement.name_id as usize) else {
                tracing::trace!("WMO placement with unknown name id {}", placement.name_id);
                continue;
            };
            wmos.push(WmoPlacement {
                model: model.clone(),
                unique_id: placement.unique_id,
                position: [placement.position[0], placement.position[1], placement.position[2]],
                rotation: [placement.rotation[0], placement.rotation[1], placement.rotation[2]],
                bounds_min: [placement.extents_min[0], placement.extents_min[1], placement.extents_min[2]],
                bounds_max: [placement.extents_max[0], placement.extents_max[1], placement.extents_max[2]],
                doodad_set: placement.doodad_set,
            });
        }

        Ok(Self { chunks, doodads, wmos })
    }

    /// Chunk heights in the form the heightmap builder takes
    pub fn chunk_samples(&self) -> Vec<Option<ChunkSamples>> {
        self.chunks
            .iter()
            .map(|chunk| {
                chunk.as_ref().map(|chunk| ChunkSamples {
                    z_offset: chunk.z_offset,
                    samples: chunk.samples.clone(),
                })
            })
            .collect()
    }
}

/// Lay out 9x9 outer and 8x8 inner heights in file order (9, 8, 9, ... 9)
pub fn interleave_samples<O, I>(outer: O, inner: I) -> Vec<f32>
where
    O: Fn(usize, usize) -> Option<f32>,
    I: Fn(usize, usize) -> Option<f32>,
{
    let mut samples = Vec::with_capacity(SAMPLES_PER_CHUNK);
    for row in 0..ROWS_PER_CHUNK {
        let y = row / 2;
        if row % 2 == 0 {
            for x in 0..OUTER_ROW_SAMPLES {
                samples.push(outer(x, y).unwrap_or(0.0));
            }
        } else {
            for x in 0..INNER_ROW_SAMPLES {
                samples.push(inner(x, y).unwrap_or(0.0));
            }
        }
    }
    samples
}
