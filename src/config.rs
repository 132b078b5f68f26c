//! Persistent defaults for the command-line tools, stored as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;
use crate::cccv::CccvOptions;
use crate::cv::CvOptions;
use crate::ml::feature_select::RfeOptions;
use crate::ml::gbdt::GbdtOptions;
use crate::ml::svm::SvmOptions;

/// Default filename used to store the tool configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Classifier, validation and simulation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotraitSettings {
    /// Seed shared by every randomized step unless a section sets its own.
    #[serde(default)]
    pub random_state: u64,
    #[serde(default)]
    pub svm: SvmOptions,
    #[serde(default)]
    pub gbdt: GbdtOptions,
    #[serde(default)]
    pub cv: CvOptions,
    #[serde(default)]
    pub cccv: CccvOptions,
    #[serde(default)]
    pub rfe: RfeOptions,
    /// Where trained models go when no output path is given.
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
}

impl Default for GenotraitSettings {
    fn default() -> Self {
        Self {
            random_state: 0,
            svm: SvmOptions::default(),
            gbdt: GbdtOptions::default(),
            cv: CvOptions::default(),
            cccv: CccvOptions::default(),
            rfe: RfeOptions::default(),
            models_dir: None,
        }
    }
}

impl GenotraitSettings {
    /// Propagate the top-level seed into sections left at the default seed.
    pub fn normalized(mut self) -> Self {
        if self.cv.random_state == 0 {
            self.cv.random_state = self.random_state;
        }
        if self.cccv.random_state == 0 {
            self.cccv.random_state = self.random_state;
        }
        if self.rfe.random_state == 0 {
            self.rfe.random_state = self.random_state;
        }
        self
    }

    /// Override every seed with `seed`.
    pub fn set_random_state(&mut self, seed: u64) {
        self.random_state = seed;
        self.cv.random_state = seed;
        self.cccv.random_state = seed;
        self.rfe.random_state = seed;
    }

    /// Model output directory, falling back to the app `models` folder.
    pub fn resolve_models_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.models_dir {
            Some(path) => Ok(path.clone()),
            None => app_dirs::models_dir().map_err(map_app_dir_error),
        }
    }
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from disk, returning defaults if missing.
pub fn load_or_default() -> Result<GenotraitSettings, ConfigError> {
    load_from(&config_path()?)
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_from(path: &Path) -> Result<GenotraitSettings, ConfigError> {
    if !path.exists() {
        return Ok(GenotraitSettings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text)
        .map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
        .map(GenotraitSettings::normalized)
}

/// Save configuration to a specific path, creating parent directories as needed.
pub fn save_to_path(settings: &GenotraitSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::CreateDir { path, source },
    }
}
