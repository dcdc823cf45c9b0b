// tile-exporter - command line entrypoint
// Lists maps, previews tiles and exports terrain tiles to OBJ and heightmaps.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use tile_exporter::dbc::MapEntry;
use tile_exporter::export::{ExportPathLog, ExportReport};
use tile_exporter::listfile::Listfile;
use tile_exporter::mpq::MpqManager;
use tile_exporter::progress::{CancelFlag, LogProgress};
use tile_exporter::session::MapSession;
use tile_exporter::settings::ExportSettings;
use tile_exporter::terrain::{MeshQuality, ModelCache};
use tile_exporter::tile::{TileCoord, WDT_MAP_SIZE, parse_tile};
use tileexport_shared::config::get_config;
use tileexport_shared::log::{initialize_logging, map_log_level};
use tileexport_shared::{CONFIG_ENV_PREFIX, DEFAULT_CONFIG};

#[derive(Parser, Debug)]
#[command(name = "tile-exporter")]
#[command(about = "Export terrain tiles from MPQ client archives")]
#[command(version)]
struct Cli {
    /// Console log level (0=Error, 1=Warn, 2=Info, 3=Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Client Data directory (overrides DataDir)
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the maps of Map.dbc
    Maps,
    /// Show which tiles of a map carry terrain
    Tiles(MapArgs),
    /// Export terrain tiles
    Export(ExportArgs),
    /// Write a minimap preview of one tile as PNG
    Preview(PreviewArgs),
    /// List the game objects placed on a map
    Objects(MapArgs),
}

#[derive(Args, Debug)]
struct MapArgs {
    /// Map id or directory name
    map: String,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Map id or directory name
    map: String,

    /// Tile to export (format: X,Y), repeatable
    #[arg(long = "tile", value_parser = parse_tile)]
    tiles: Vec<TileCoord>,

    /// Export every tile present in the map
    #[arg(long, conflicts_with = "tiles")]
    all: bool,

    /// Also write 16-bit heightmaps and the manifest
    #[arg(long)]
    heightmaps: bool,

    /// Include placed game objects in the placement files
    #[arg(long = "game-objects")]
    game_objects: bool,

    /// Terrain mesh quality (low or high)
    #[arg(long)]
    quality: Option<MeshQuality>,

    /// Also export the map's global WMO
    #[arg(long = "world-model")]
    world_model: bool,

    /// Export directory (overrides ExportDir)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// Map id or directory name
    map: String,

    /// Tile (format: X,Y)
    #[arg(value_parser = parse_tile)]
    tile: TileCoord,

    /// Edge length of the square preview in pixels
    #[arg(long)]
    size: Option<u32>,

    /// Output PNG file
    #[arg(short, long, default_value = "preview.png")]
    output: PathBuf,
}

fn load_settings(cli: &Cli) -> ExportSettings {
    let mut config = get_config().lock();
    if !config.set_source(&cli.config, CONFIG_ENV_PREFIX) {
        eprintln!("Configuration file {} not found, using defaults.", cli.config);
    }
    let mut settings = ExportSettings::from_config(&config);
    if let Some(data) = &cli.data {
        settings.data_dir = data.clone();
    }
    settings
}

fn open_session(settings: &ExportSettings) -> anyhow::Result<MapSession<MpqManager>> {
    let mut mpq = MpqManager::open_data_dir(&settings.data_dir)?;
    let listfile = match &settings.listfile {
        Some(path) => Listfile::load(path)?,
        None => Listfile::from_names(&mpq.list_files()),
    };
    mpq.set_listfile(listfile);
    tracing::debug!("Listfile has {} entries", mpq.listfile().len());
    Ok(MapSession::new(mpq, &settings.game_object_table))
}

fn find_map(session: &mut MapSession<MpqManager>, map: &str) -> anyhow::Result<MapEntry> {
    let maps = session.maps().context("Unable to read Map.dbc")?;
    let by_id = map.parse::<u32>().ok();
    maps.into_iter()
        .find(|entry| Some(entry.id) == by_id || entry.directory.eq_ignore_ascii_case(map))
        .with_context(|| format!("Unknown map '{}'", map))
}

fn select_map(session: &mut MapSession<MpqManager>, map: &str) -> anyhow::Result<MapEntry> {
    let entry = find_map(session, map)?;
    session.select_map(entry.id, &entry.directory);
    Ok(entry)
}

fn run_maps(settings: &ExportSettings) -> anyhow::Result<()> {
    let mut session = open_session(settings)?;
    for entry in session.maps().context("Unable to read Map.dbc")? {
        println!("{:>4}  {:<24} {}", entry.id, entry.directory, entry.name);
    }
    Ok(())
}

fn run_tiles(settings: &ExportSettings, args: MapArgs) -> anyhow::Result<()> {
    let mut session = open_session(settings)?;
    let entry = select_map(&mut session, &args.map)?;
    let mask = session.tile_mask();

    println!("{} ({}): {} tiles", entry.name, entry.id, mask.count());
    for y in 0..WDT_MAP_SIZE as u32 {
        let row: String = (0..WDT_MAP_SIZE as u32)
            .map(|x| if mask.contains(TileCoord::new(x, y)) { '#' } else { '.' })
            .collect();
        println!("{:02} {}", y, row);
    }
    if let Some(wmo) = session.world_model() {
        println!("Global WMO: {}", wmo.path);
    }
    Ok(())
}

fn run_export(settings: &ExportSettings, args: ExportArgs) -> anyhow::Result<()> {
    let mut session = open_session(settings)?;
    let entry = select_map(&mut session, &args.map)?;

    let tiles = if args.all { session.available_tiles() } else { args.tiles.clone() };
    let export_dir = args.output.clone().unwrap_or_else(|| settings.export_dir.clone());

    let mut options = settings.options;
    options.heightmaps |= args.heightmaps;
    options.game_objects |= args.game_objects;
    if let Some(quality) = args.quality {
        options.quality = quality;
    }

    let mut cache = ModelCache::new();
    if args.world_model {
        match session.export_world_model(&mut cache, &export_dir)? {
            Some(exported) => tracing::info!("World model written to {}", exported.path.display()),
            None => tracing::info!("{} has no global WMO", entry.directory),
        }
        if tiles.is_empty() {
            return Ok(());
        }
    }

    let job = session.build_job(&tiles, &export_dir, options)?;

    let cancel = CancelFlag::new();
    cancel.install_ctrlc_handler()?;
    let mut progress = LogProgress::new(cancel);
    let path_log = settings.export_path_log.clone().map(ExportPathLog::new);

    let report = session.run_export(&job, &mut cache, &mut progress, path_log.as_ref());
    print_report(&report);

    if let Some(err) = report.io_errors().next() {
        anyhow::bail!("Export failed: {}", err);
    }
    if report.exported.is_empty() && !report.failures.is_empty() {
        anyhow::bail!("No tile could be exported");
    }
    Ok(())
}

fn print_report(report: &ExportReport) {
    for exported in &report.exported {
        println!("{}:{}", exported.kind, exported.path.display());
    }
    for failure in &report.failures {
        println!("FAILED {}: {}", failure.tile, failure.detail);
    }
    if let Some(manifest) = &report.manifest {
        println!("Manifest: {}", manifest.display());
    }
    for err in report.io_errors() {
        println!("ERROR {}", err);
    }
    if report.cancelled {
        println!("Export cancelled");
    }
}

fn run_preview(settings: &ExportSettings, args: PreviewArgs) -> anyhow::Result<()> {
    let mut session = open_session(settings)?;
    select_map(&mut session, &args.map)?;

    let size = args.size.unwrap_or(settings.preview_size);
    let preview = session
        .load_tile_preview(args.tile.x, args.tile.y, size)
        .with_context(|| format!("No minimap image for tile {}", args.tile))?;
    preview
        .image
        .save(&args.output)
        .with_context(|| format!("Unable to write {}", args.output.display()))?;
    tracing::info!("Preview of tile {} written to {}", preview.tile, args.output.display());
    Ok(())
}

fn run_objects(settings: &ExportSettings, args: MapArgs) -> anyhow::Result<()> {
    let mut session = open_session(settings)?;
    let entry = find_map(&mut session, &args.map)?;
    let objects = session.collect_game_objects(entry.id, |_| true)?;

    println!("{} game objects on {}", objects.len(), entry.name);
    for object in objects {
        println!(
            "{:>8} {:>6} ({:.2}, {:.2}, {:.2}) {}",
            object.id, object.display_id, object.position[0], object.position[1], object.position[2], object.model
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli);

    initialize_logging(settings.logs_dir.as_deref(), map_log_level(cli.log_level.unwrap_or(2)));
    tracing::info!("tile-exporter v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Using data directory {}", settings.data_dir.display());

    match cli.command {
        Command::Maps => run_maps(&settings),
        Command::Tiles(args) => run_tiles(&settings, args),
        Command::Export(args) => run_export(&settings, args),
        Command::Preview(args) => run_preview(&settings, args),
        Command::Objects(args) => run_objects(&settings, args),
    }
}
