// Exporter settings resolved from the configuration file
use std::path::PathBuf;

use tileexport_shared::config::Config;

use crate::export::ExportOptions;
use crate::objects::DEFAULT_GAMEOBJECT_TABLE;
use crate::terrain::MeshQuality;

pub const DEFAULT_PREVIEW_SIZE: u32 = 256;

#[derive(Clone, Debug, PartialEq)]
pub struct ExportSettings {
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
    pub listfile: Option<PathBuf>,
    pub logs_dir: Option<String>,
    pub export_path_log: Option<PathBuf>,
    pub options: ExportOptions,
    pub game_object_table: String,
    pub preview_size: u32,
}

impl ExportSettings {
    pub fn from_config(config: &Config) -> Self {
        let quality_name = config.get_string_default("MeshQuality", "high");
        let quality = quality_name.parse::<MeshQuality>().unwrap_or_else(|err| {
            tracing::warn!("{}, using high", err);
            MeshQuality::High
        });

        let preview_size = config.get_int_default("PreviewSize", DEFAULT_PREVIEW_SIZE as i32);

        Self {
            data_dir: PathBuf::from(config.get_string_default("DataDir", "./Data")),
            export_dir: PathBuf::from(config.get_string_default("ExportDir", "./export")),
            listfile: optional(config, "ListfilePath").map(PathBuf::from),
            logs_dir: optional(config, "LogsDir"),
            export_path_log: optional(config, "ExportPathLog").map(PathBuf::from),
            options: ExportOptions {
                quality,
                heightmaps: config.get_bool_default("ExportHeightmaps", false),
                game_objects: config.get_bool_default("ExportGameObjects", false),
            },
            game_object_table: config.get_string_default("GameObjectTable", DEFAULT_GAMEOBJECT_TABLE),
            preview_size: if preview_size > 0 { preview_size as u32 } else { DEFAULT_PREVIEW_SIZE },
        }
    }
}

fn optional(config: &Config, key: &str) -> Option<String> {
    config.is_set(key).then(|| config.get_string(key))
}
