use crate::error::{AssembleError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "index-assembly";
const CONFIG_FILE: &str = "config.json";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Treat a missing manifest or a malformed optional artifact as fatal
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Indent written JSON artifacts
    #[serde(default)]
    pub pretty_json: bool,

    /// Load pieces in parallel (the fold itself is always serial)
    #[serde(default = "default_parallel_load")]
    pub parallel_load: bool,

    /// Number of loader threads
    /// If 0, uses the number of CPU cores
    #[serde(default)]
    pub load_threads: usize,

    #[serde(default)]
    pub indexing: IndexingConfig,
}

fn default_strict() -> bool {
    true
}

fn default_parallel_load() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            pretty_json: false,
            parallel_load: default_parallel_load(),
            load_threads: 0,
            indexing: IndexingConfig::default(),
        }
    }
}

/// Indexing toggles that decide which cross-file passes run after the merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingConfig {
    #[serde(default = "enabled")]
    pub type_inference: bool,

    /// Off unless explicitly enabled
    #[serde(default)]
    pub type_inference_cross_file: bool,

    #[serde(default = "enabled")]
    pub risk_analysis: bool,

    #[serde(default = "enabled")]
    pub risk_analysis_cross_file: bool,
}

fn enabled() -> bool {
    true
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            type_inference: true,
            type_inference_cross_file: false,
            risk_analysis: true,
            risk_analysis_cross_file: true,
        }
    }
}

impl IndexingConfig {
    pub fn type_inference_cross_file_enabled(&self) -> bool {
        self.type_inference_cross_file
    }

    /// Risk correlation needs risk analysis itself to be on
    pub fn risk_cross_file_enabled(&self) -> bool {
        self.risk_analysis && self.risk_analysis_cross_file
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AssembleError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| AssembleError::Config {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    /// Get the effective loader thread count (resolves 0 to CPU count)
    pub fn effective_load_threads(&self) -> usize {
        if self.load_threads == 0 {
            num_cpus()
        } else {
            self.load_threads
        }
    }
}

/// Get the number of CPUs available
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.ok_or_else(|| AssembleError::Config {
        reason: "Could not determine app data directory".to_string(),
    })?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir).map_err(|e| AssembleError::io(&app_dir, e))?;
    Ok(app_dir)
}
