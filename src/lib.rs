//! STAR Processor Library
//!
//! Reads, merges, transforms and writes RELION STAR metadata tables used in
//! cryo-EM single particle analysis.
//!
//! This library provides tools for:
//! - Parsing single-block STAR files into polars data frames
//! - Splitting image references into index, path and basename columns
//! - Inferring join keys and merging particle or micrograph tables
//! - Rotating particle orientations and shifting origins
//! - Recentering, scaling, class selection and per-micrograph grouping
//! - Writing tables back to STAR in the canonical RELION field order

pub mod augment;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod geom;
pub mod header;
pub mod merge;
pub mod models;
pub mod natsort;
pub mod operations;
pub mod parser;
pub mod transform;
pub mod writer;

// Re-export commonly used types
pub use augment::{augment_star_ucsf, simplify_star_ucsf};
pub use config::{DuplicateKeyPolicy, MergeOptions, ParseOptions, StarConfig, WriteOptions};
pub use error::{Result, StarError};
pub use merge::{merge_key, smart_merge};
pub use models::{ImageReference, MergeKey, TableSummary, TransformOptions, Translation};
pub use parser::{parse_star, parse_star_str};
pub use transform::{calculate_apix, transform_star, transform_star_in_place};
pub use writer::{sort_fields, sort_records, write_star};
