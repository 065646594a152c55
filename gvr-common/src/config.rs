//! Configuration loading and root folder resolution
//!
//! Two kinds of configuration live here:
//! - [`CacheLimits`]: fixed constants governing the cache tiers. These are not
//!   user-tunable; `CacheLimits::default()` is what production code uses.
//! - [`TomlConfig`]: optional runtime settings (root folder, upstream URL,
//!   log level). A missing or broken TOML file is never fatal.
//!
//! Root folder resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `GVR_ROOT_FOLDER` environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "GVR_ROOT_FOLDER";

/// Environment variable overriding the upstream service base URL
pub const UPSTREAM_URL_ENV: &str = "GVR_UPSTREAM_URL";

/// Upstream base URL used when nothing else is configured
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000";

/// File name of the persistent store database inside the root folder
pub const DATABASE_FILE_NAME: &str = "gvr-cache.db";

/// Persistent entries older than this are expired on read (7 days)
pub const ENTRY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Maximum entries kept per persistent partition
pub const MAX_ENTRIES_PER_PARTITION: usize = 100;

/// Sessions kept fully materialized in memory
pub const WORKING_SET_CAPACITY: usize = 10;

/// Progress is reported every this many gene records
pub const PROGRESS_INTERVAL: usize = 500;

/// Gene records per batch message from the parsing worker
pub const WORKER_BATCH_SIZE: usize = 1000;

/// Fixed limits for the cache tiers and the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub entry_ttl: Duration,
    pub max_entries_per_partition: usize,
    pub working_set_capacity: usize,
    pub progress_interval: usize,
    pub worker_batch_size: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            entry_ttl: ENTRY_TTL,
            max_entries_per_partition: MAX_ENTRIES_PER_PARTITION,
            working_set_capacity: WORKING_SET_CAPACITY,
            progress_interval: PROGRESS_INTERVAL,
            worker_batch_size: WORKER_BATCH_SIZE,
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Optional runtime configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub upstream_base_url: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load from the platform config location, falling back to defaults
    ///
    /// Never fails: a missing file is silent, a broken one logs a warning.
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring config file");
                Self::default()
            }
        }
    }
}

/// Platform config file location (`<config_dir>/gvr/gvr-cache.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gvr").join("gvr-cache.toml"))
}

/// Resolves the root folder from CLI, ENV, TOML and compiled default
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_config: TomlConfig,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml_config: TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_config,
        }
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.toml_config.root_folder {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        default_root_folder()
    }
}

/// Resolve the upstream base URL (CLI, ENV, TOML, default)
pub fn resolve_upstream_url(cli_arg: Option<&str>, toml_config: &TomlConfig) -> String {
    if let Some(url) = cli_arg {
        return url.trim_end_matches('/').to_string();
    }

    if let Ok(url) = std::env::var(UPSTREAM_URL_ENV) {
        if !url.trim().is_empty() {
            return url.trim_end_matches('/').to_string();
        }
    }

    if let Some(url) = &toml_config.upstream_base_url {
        return url.trim_end_matches('/').to_string();
    }

    DEFAULT_UPSTREAM_URL.to_string()
}

/// Creates the root folder and locates files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/gvr (or /var/lib/gvr for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("gvr"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gvr"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/gvr
        dirs::data_dir()
            .map(|d| d.join("gvr"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gvr"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\gvr
        dirs::data_local_dir()
            .map(|d| d.join("gvr"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gvr"))
    } else {
        PathBuf::from("./gvr_data")
    }
}
