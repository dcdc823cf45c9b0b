// Tile coordinates, presence masks and world-space bounds

use std::fmt;

/// Tiles per map side (WDT grid)
pub const WDT_MAP_SIZE: usize = 64;

/// Edge length of one tile in world units
pub const TILE_SIZE: f32 = 1600.0 / 3.0;

/// Edge length of one chunk in world units
pub const CHUNK_SIZE: f32 = TILE_SIZE / 16.0;

/// World coordinate of the map's north-west corner
pub const MAP_ORIGIN: f32 = 32.0 * TILE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn is_valid(&self) -> bool {
        (self.x as usize) < WDT_MAP_SIZE && (self.y as usize) < WDT_MAP_SIZE
    }

    /// Flat index into a 64x64 mask
    pub fn index(&self) -> usize {
        self.y as usize * WDT_MAP_SIZE + self.x as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self {
            x: (index % WDT_MAP_SIZE) as u32,
            y: (index / WDT_MAP_SIZE) as u32,
        }
    }

    /// World-space footprint of the tile
    pub fn bounds(&self) -> TileBounds {
        let max_x = MAP_ORIGIN - self.y as f32 * TILE_SIZE;
        let max_y = MAP_ORIGIN - self.x as f32 * TILE_SIZE;
        TileBounds {
            min_x: max_x - TILE_SIZE,
            max_x,
            min_y: max_y - TILE_SIZE,
            max_y,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

/// Parse "X,Y" as used on the command line
pub fn parse_tile(input: &str) -> Result<TileCoord, String> {
    let mut parts = input.split(',');
    let x = parts
        .next()
        .ok_or_else(|| "Missing tile X".to_string())?
        .trim()
        .parse::<u32>()
        .map_err(|_| "Invalid tile X".to_string())?;
    let y = parts
        .next()
        .ok_or_else(|| "Missing tile Y".to_string())?
        .trim()
        .parse::<u32>()
        .map_err(|_| "Invalid tile Y".to_string())?;
    if parts.next().is_some() {
        return Err("Expected X,Y".to_string());
    }
    let tile = TileCoord::new(x, y);
    if !tile.is_valid() {
        return Err(format!("Tile {},{} is outside the 64x64 map grid", x, y));
    }
    Ok(tile)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl TileBounds {
    /// Strict containment: points on an edge belong to neither neighbour
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x > self.min_x && x < self.max_x && y > self.min_y && y < self.max_y
    }
}

/// Which of the 64x64 tiles of a map carry terrain
#[derive(Clone, PartialEq, Eq)]
pub struct TileMask {
    present: Vec<bool>,
}

impl TileMask {
    pub fn empty() -> Self {
        Self {
            present: vec![false; WDT_MAP_SIZE * WDT_MAP_SIZE],
        }
    }

    pub fn all_present() -> Self {
        Self {
            present: vec![true; WDT_MAP_SIZE * WDT_MAP_SIZE],
        }
    }

    pub fn set(&mut self, tile: TileCoord, present: bool) {
        if tile.is_valid() {
            self.present[tile.index()] = present;
        }
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        tile.is_valid() && self.present[tile.index()]
    }

    pub fn count(&self) -> usize {
        self.present.iter().filter(|p| **p).count()
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, p)| **p)
            .map(|(idx, _)| TileCoord::from_index(idx))
    }
}

impl fmt::Debug for TileMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileMask({} present)", self.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let tile = TileCoord::new(31, 47);
        assert_eq!(TileCoord::from_index(tile.index()), tile);
    }

    #[test]
    fn test_bounds_of_center_tile() {
        let bounds = TileCoord::new(32, 32).bounds();
        assert_eq!(bounds.max_x, 0.0);
        assert_eq!(bounds.max_y, 0.0);
        assert!((bounds.min_x + TILE_SIZE).abs() < 1e-3);
        assert!(bounds.contains(-1.0, -1.0));
        assert!(!bounds.contains(0.0, -1.0));
        assert!(!bounds.contains(-1.0, bounds.min_y));
    }

    #[test]
    fn test_parse_tile() {
        assert_eq!(parse_tile("32,48"), Ok(TileCoord::new(32, 48)));
        assert!(parse_tile("32").is_err());
        assert!(parse_tile("64,1").is_err());
        assert!(parse_tile("a,b").is_err());
        assert!(parse_tile("1,2,3").is_err());
    }

    #[test]
    fn test_mask_tiles() {
        let mut mask = TileMask::empty();
        mask.set(TileCoord::new(1, 2), true);
        mask.set(TileCoord::new(70, 2), true);
        assert_eq!(mask.count(), 1);
        assert!(mask.contains(TileCoord::new(1, 2)));
        assert_eq!(mask.tiles().collect::<Vec<_>>(), vec![TileCoord::new(1, 2)]);
        assert_eq!(TileMask::all_present().count(), 4096);
    }
}
