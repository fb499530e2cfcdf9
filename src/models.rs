//! Core data structures for STAR processing.
//!
//! Defines image references, merge keys, transform arguments and the table
//! summary reported by the CLI.

use crate::constants::{relion, ucsf};
use nalgebra::Vector3;
use std::fmt;

/// A frame within an image stack, written on disk as `000001@stack.mrcs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Zero-based frame index, `None` when the reference carried no index
    pub index: Option<i64>,
    pub path: String,
}

impl ImageReference {
    pub fn new(index: i64, path: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            path: path.into(),
        }
    }

    /// Split `"<1-based index>@<path>"`.
    ///
    /// A value without `@`, or with a non-numeric index, keeps the whole
    /// value as the path and has no index.
    pub fn parse(value: &str) -> Self {
        match value.split_once('@') {
            Some((index, path)) => match index.trim().parse::<i64>() {
                Ok(index) => Self {
                    index: Some(index - 1),
                    path: path.to_string(),
                },
                Err(_) => Self {
                    index: None,
                    path: value.to_string(),
                },
            },
            None => Self {
                index: None,
                path: value.to_string(),
            },
        }
    }

    /// File name component of the path
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{:06}@{}", index + 1, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Text after the last `/`, matching POSIX `basename` without trailing-slash
/// stripping (`"a/b/"` has an empty basename).
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Columns used to join two tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeKey(Vec<String>);

impl MergeKey {
    pub fn single(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    pub fn compound<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Image reference key
    pub fn image_name() -> Self {
        Self::single(relion::IMAGE_NAME)
    }

    /// Stack basename plus frame index
    pub fn image_basename_index() -> Self {
        Self::compound([ucsf::IMAGE_BASENAME, ucsf::IMAGE_INDEX])
    }

    pub fn micrograph_name() -> Self {
        Self::single(relion::MICROGRAPH_NAME)
    }

    /// Micrograph name plus particle coordinates
    pub fn micrograph_coords() -> Self {
        Self::compound(relion::MICROGRAPH_COORDS.iter().copied())
    }

    pub fn micrograph_basename() -> Self {
        Self::single(ucsf::MICROGRAPH_BASENAME)
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Shift applied after rotating particle orientations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Translation {
    /// Distance along each record's rotated Z axis
    Scalar(f64),
    /// Vector rotated into each record's frame
    Vector([f64; 3]),
}

impl Translation {
    pub fn norm(&self) -> f64 {
        match self {
            Translation::Scalar(distance) => distance.abs(),
            Translation::Vector(v) => Vector3::from(*v).norm(),
        }
    }
}

/// Arguments for the geometric transform
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    /// Explicit translation; a 3x4 matrix supplies one when this is `None`
    pub translation: Option<Translation>,
    /// Apply the inverse rotation and negate the shift
    pub invert: bool,
    /// Overwrite the Euler angle columns
    pub rotate: bool,
    /// Move defocus along with the Z shift
    pub adjust_defocus: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            translation: None,
            invert: false,
            rotate: true,
            adjust_defocus: false,
        }
    }
}

impl TransformOptions {
    pub fn with_translation(mut self, translation: Translation) -> Self {
        self.translation = Some(translation);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn without_rotation(mut self) -> Self {
        self.rotate = false;
        self
    }

    pub fn with_defocus_adjustment(mut self) -> Self {
        self.adjust_defocus = true;
        self
    }
}

/// Overview of a parsed table
#[derive(Debug, Clone, Default)]
pub struct TableSummary {
    pub records: usize,
    pub columns: Vec<String>,
    pub particles: bool,
    pub micrographs: usize,
    pub classes: usize,
    pub pixel_size: Option<f64>,
}
