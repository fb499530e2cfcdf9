//! Configuration management and validation.
//!
//! Provides the options for parsing, writing and merging STAR tables, with
//! defaults that match RELION's expectations and optional TOML loading.

use crate::constants::DEFAULT_MERGE_THRESHOLD;
use crate::error::{Result, StarError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Options for reading a STAR file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Keep header lines verbatim, including `_` and the `#n` suffix
    pub keep_index: bool,

    /// Derive the UCSF convenience columns after reading
    pub augment: bool,

    /// Read at most this many records
    pub max_records: Option<usize>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            keep_index: false,
            augment: true,
            max_records: None,
        }
    }
}

impl ParseOptions {
    pub fn with_keep_index(mut self) -> Self {
        self.keep_index = true;
        self
    }

    pub fn without_augment(mut self) -> Self {
        self.augment = false;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }
}

/// Options for writing a STAR file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Reorder columns to the canonical RELION field order
    pub resort_fields: bool,

    /// Sort records naturally by image reference or micrograph name
    pub resort_records: bool,

    /// Collapse derived columns back into image references
    pub simplify: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            resort_fields: true,
            resort_records: false,
            simplify: true,
        }
    }
}

impl WriteOptions {
    pub fn with_resort_records(mut self) -> Self {
        self.resort_records = true;
        self
    }

    pub fn without_resort_fields(mut self) -> Self {
        self.resort_fields = false;
        self
    }

    pub fn without_simplify(mut self) -> Self {
        self.simplify = false;
        self
    }
}

/// How duplicate key values in the secondary table of a merge are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// Fail with `StarError::DuplicateKey`
    #[default]
    Error,
    /// The last record with a given key wins
    LastWins,
}

/// Options for merging tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Share of primary records that must match for an inferred key
    pub threshold: f64,

    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MERGE_THRESHOLD,
            duplicate_keys: DuplicateKeyPolicy::Error,
        }
    }
}

impl MergeOptions {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_last_wins(mut self) -> Self {
        self.duplicate_keys = DuplicateKeyPolicy::LastWins;
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StarConfig {
    pub parse: ParseOptions,
    pub write: WriteOptions,
    pub merge: MergeOptions,
}

impl StarConfig {
    /// Load configuration from a TOML file. Missing sections use defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StarError::Configuration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_parse(mut self, parse: ParseOptions) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_write(mut self, write: WriteOptions) -> Self {
        self.write = write;
        self
    }

    pub fn with_merge(mut self, merge: MergeOptions) -> Self {
        self.merge = merge;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.merge.threshold) {
            return Err(StarError::Configuration {
                message: format!(
                    "merge threshold must be between 0 and 1, got {}",
                    self.merge.threshold
                ),
            });
        }
        if self.parse.max_records == Some(0) {
            return Err(StarError::Configuration {
                message: "max_records must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
