// Logging module
// Console and rolling-file output built on the tracing crate
//
// The exporter logs job milestones at INFO, fallbacks and per-tile failures
// at WARN, and per-tile detail at DEBUG/TRACE. RUST_LOG always takes
// precedence over the level passed in.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name used inside the configured log directory
pub const LOG_FILE_NAME: &str = "tile-exporter.log";

/// Map the numeric console level used on the command line to a filter string
/// (0=Errors only, 1=Warnings, 2=Detail, 3=Full/Debug, 4=Trace)
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system
/// A daily rolling file layer is added when `log_dir` is given
pub fn initialize_logging(log_dir: Option<&str>, log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes on drop; the exporter logs until process exit
        std::mem::forget(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_log_level() {
        assert_eq!(map_log_level(0), "error");
        assert_eq!(map_log_level(1), "warn");
        assert_eq!(map_log_level(2), "info");
        assert_eq!(map_log_level(3), "debug");
        assert_eq!(map_log_level(9), "trace");
        assert_eq!(map_log_level(-3), "error");
    }
}
