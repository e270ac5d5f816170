//! Runtime configuration.
//!
//! Loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_WORKING_DIRECTORY`: Directory that file names in commands are
//!   resolved against (default: `.`)
//! - `BPTREE_SOURCE_KEY_WIDTH`: Number of leading characters of a source
//!   record that form its key when an index is created (default: `15`)

use std::path::{Path, PathBuf};

use crate::records::DEFAULT_KEY_WIDTH;

/// Index tool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory that source and index file names are relative to.
    pub working_directory: PathBuf,
    /// Leading characters of a source record used as its key.
    pub source_key_width: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from(Self::DEFAULT_WORKING_DIRECTORY),
            source_key_width: DEFAULT_KEY_WIDTH,
        }
    }
}

impl IndexConfig {
    /// Default working directory.
    pub const DEFAULT_WORKING_DIRECTORY: &'static str = ".";

    const WORKING_DIRECTORY_VAR: &'static str = "BPTREE_WORKING_DIRECTORY";
    const SOURCE_KEY_WIDTH_VAR: &'static str = "BPTREE_SOURCE_KEY_WIDTH";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BPTREE_SOURCE_KEY_WIDTH` is set but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let working_directory = Self::load_working_directory();
        let source_key_width =
            Self::parse_key_width(std::env::var(Self::SOURCE_KEY_WIDTH_VAR).ok().as_deref())?;

        Ok(Self {
            working_directory,
            source_key_width,
        })
    }

    /// Resolve a file name from a command against the working directory.
    #[must_use]
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.working_directory.join(Path::new(file_name))
    }

    fn load_working_directory() -> PathBuf {
        std::env::var(Self::WORKING_DIRECTORY_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_WORKING_DIRECTORY))
    }

    /// Parse the key width, using the default when unset.
    fn parse_key_width(value: Option<&str>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(DEFAULT_KEY_WIDTH);
        };

        match value.trim().parse::<usize>() {
            Ok(width) if width > 0 => Ok(width),
            _ => Err(ConfigError::InvalidValue {
                name: Self::SOURCE_KEY_WIDTH_VAR.to_string(),
                message: format!("'{value}' is not a positive integer"),
            }),
        }
    }
}
