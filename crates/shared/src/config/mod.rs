// Configuration module
// Reads INI-style configuration files with environment variable overrides
//
// Keys are looked up in the [Export] section first and then outside any
// section. Lookups are case-insensitive.

use configparser::ini::Ini;
use parking_lot::Mutex;

/// Section holding exporter settings
pub const EXPORT_SECTION: &str = "export";

/// Section configparser uses for keys outside any [Section] header
const DEFAULT_SECTION: &str = "default";

/// Global configuration singleton
static CONFIG: once_cell::sync::Lazy<Mutex<Config>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Config::new()));

/// Get a reference to the global config instance
pub fn get_config() -> &'static Mutex<Config> {
    &CONFIG
}

/// Configuration file parser
/// Supports INI-style files with environment variable override
pub struct Config {
    ini: Ini,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            ini: Ini::new(),
            filename: String::new(),
            env_prefix: String::new(),
        }
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "TileExport_")
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> bool {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    /// On failure the previous values are dropped and only env overrides apply
    pub fn reload(&mut self) -> bool {
        self.ini = Ini::new();
        match self.ini.load(&self.filename) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Could not load configuration {}: {}", self.filename, err);
                false
            }
        }
    }

    /// Load configuration from an in-memory string
    pub fn load_str(&mut self, content: &str, env_prefix: &str) -> Result<(), String> {
        self.env_prefix = env_prefix.to_string();
        self.ini = Ini::new();
        self.ini.read(content.to_string()).map(|_| ())
    }

    /// Name of the file the values were loaded from
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a string value (empty string default)
    pub fn get_string(&self, key: &str) -> String {
        self.get_string_default(key, "")
    }

    /// Get a boolean value with a default
    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => {
                let lower = val.to_lowercase();
                matches!(lower.as_str(), "1" | "true" | "yes")
            }
            None => default,
        }
    }

    /// Get an integer value with a default
    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        // Convert key to env var name: replace '.' with '_', add prefix
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.ini
            .get(EXPORT_SECTION, key)
            .or_else(|| self.ini.get(DEFAULT_SECTION, key))
            .map(|value| strip_quotes(value.trim()).to_string())
            .filter(|value| !value.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
