// tile-exporter - terrain tile export from MPQ client archives
// Reads map descriptors and terrain tiles and writes OBJ meshes, model
// placements, raw 16-bit heightmaps and minimap previews.

pub mod adt;
pub mod blp;
pub mod culler;
pub mod dbc;
pub mod error;
pub mod export;
pub mod heightmap;
pub mod listfile;
pub mod mpq;
pub mod objects;
pub mod progress;
pub mod session;
pub mod settings;
pub mod source;
pub mod terrain;
pub mod tile;
pub mod wdt;

pub use error::{ExportError, Result};
