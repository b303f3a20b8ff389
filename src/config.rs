//! Loader Configuration
//!
//! Settings for one [`crate::loader::Loader`], read from TOML. Every key is
//! optional; missing keys take their defaults.
//!
//! ```toml
//! page_size = 1000
//! tie_break = "start_time"
//! transient_error_codes = ["XCL13", "SQLITE_RANGE"]
//! queue_capacity = 64
//! paging = "limit_offset"
//! resolve_attempts = 3
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_PAGE_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESOLVE_ATTEMPTS,
    DEFAULT_TRANSIENT_ERROR_CODES,
};
use crate::domain::SortField;
use crate::error::{Error, Result};
use crate::query::PagingSyntax;
use crate::store::ErrorPolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Rows per page
    pub page_size: usize,
    /// Sort field appended to every sort for a deterministic order
    pub tie_break: SortField,
    /// Store error codes logged as transient races instead of failures
    pub transient_error_codes: Vec<String>,
    /// Capacity of each worker queue
    pub queue_capacity: usize,
    pub paging: PagingSyntax,
    /// Id-list rebuilds per lookup when the view changes mid-query
    pub resolve_attempts: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tie_break: SortField::StartTime,
            transient_error_codes: DEFAULT_TRANSIENT_ERROR_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            paging: PagingSyntax::default(),
            resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
        }
    }
}

impl LoaderConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = ?path, "No loader config, using defaults");
            return Ok(Self::default());
        }

        info!(path = ?path, "Loading loader config");
        let value = std::fs::read_to_string(path)?;
        Self::from_toml_str(&value).inspect_err(|e| {
            error!(error = %e, path = ?path, "Failed to load loader config");
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Platform config location of `loader.toml`
    ///
    /// - **Linux**: `~/.config/tour-loader/loader.toml`
    /// - **macOS**: `~/Library/Application Support/com.tourbook.tour-loader/loader.toml`
    /// - **Windows**: `C:\Users\<User>\AppData\Roaming\tourbook\tour-loader\config\loader.toml`
    pub fn default_path() -> Result<PathBuf> {
        let Some(project_dirs) = ProjectDirs::from("com", "tourbook", "tour-loader") else {
            return Err(Error::Invalid {
                message: "Could not determine project directories".to_string(),
            });
        };
        Ok(project_dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Invalid {
                message: "page_size must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(Error::Invalid {
                message: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.resolve_attempts == 0 {
            return Err(Error::Invalid {
                message: "resolve_attempts must be at least 1".to_string(),
            });
        }
        if !self.tie_break.is_sortable() {
            return Err(Error::Invalid {
                message: format!("tie_break field `{}` is not sortable", self.tie_break),
            });
        }
        Ok(())
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::new(self.transient_error_codes.iter().cloned())
    }
}
