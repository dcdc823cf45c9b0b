// tileexport - shared library
// Logging bootstrap and configuration used by the exporter tools

pub mod config;
pub mod log;

/// Default configuration file name
pub const DEFAULT_CONFIG: &str = "tileexport.conf";

/// Environment variable prefix for configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "TileExport_";
