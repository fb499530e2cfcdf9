//! Derived UCSF columns.
//!
//! Augmentation splits image references into index/path/basename columns so
//! tables can be joined and sorted on their parts. Simplification reverses
//! it before writing.

use crate::constants::{INDEX_COLUMN, is_derived_field, relion, ucsf};
use crate::error::Result;
use crate::frame::{
    column_names, drop_if_present, f64_values, has_column, set_i64_opt, set_str, str_values,
    take_rows,
};
use crate::models::{ImageReference, basename};
use polars::prelude::*;
use tracing::debug;

/// Image reference columns and the derived columns they split into
struct ReferenceFields {
    name: &'static str,
    index: &'static str,
    path: &'static str,
}

const IMAGE: ReferenceFields = ReferenceFields {
    name: relion::IMAGE_NAME,
    index: ucsf::IMAGE_INDEX,
    path: ucsf::IMAGE_PATH,
};

const IMAGE_ORIGINAL: ReferenceFields = ReferenceFields {
    name: relion::IMAGE_ORIGINAL_NAME,
    index: ucsf::IMAGE_ORIGINAL_INDEX,
    path: ucsf::IMAGE_ORIGINAL_PATH,
};

/// Path columns and the basename column derived from each
const BASENAME_SOURCES: &[(&str, &str)] = &[
    (ucsf::IMAGE_PATH, ucsf::IMAGE_BASENAME),
    (ucsf::IMAGE_ORIGINAL_PATH, ucsf::IMAGE_ORIGINAL_BASENAME),
    (relion::MICROGRAPH_NAME, ucsf::MICROGRAPH_BASENAME),
];

fn split_references(df: &mut DataFrame, fields: &ReferenceFields) -> Result<()> {
    let references: Vec<Option<ImageReference>> = str_values(df, fields.name)?
        .into_iter()
        .map(|value| value.map(|v| ImageReference::parse(&v)))
        .collect();

    let indices = references
        .iter()
        .map(|r| r.as_ref().and_then(|r| r.index))
        .collect();
    let paths = references
        .into_iter()
        .map(|r| r.map(|r| r.path))
        .collect();

    set_i64_opt(df, fields.index, indices)?;
    set_str(df, fields.path, paths)
}

/// Add the derived columns in place.
///
/// The first time a table with image references is augmented, the image
/// names are also copied into `rlnImageOriginalName`. Missing source columns
/// are skipped.
pub fn augment_star_ucsf(df: &mut DataFrame) -> Result<()> {
    if has_column(df, IMAGE.name) {
        split_references(df, &IMAGE)?;

        if !has_column(df, IMAGE_ORIGINAL.name) {
            let names = str_values(df, IMAGE.name)?;
            set_str(df, IMAGE_ORIGINAL.name, names)?;
        }
    } else {
        debug!("No {} column, skipping image reference split", IMAGE.name);
    }

    if has_column(df, IMAGE_ORIGINAL.name) {
        split_references(df, &IMAGE_ORIGINAL)?;
    }

    for (source, target) in BASENAME_SOURCES {
        if !has_column(df, source) {
            continue;
        }
        let basenames = str_values(df, source)?
            .into_iter()
            .map(|value| value.map(|v| basename(&v).to_string()))
            .collect();
        set_str(df, target, basenames)?;
    }

    Ok(())
}

/// Augmented copy of `df`
pub fn augmented(df: &DataFrame) -> Result<DataFrame> {
    let mut df = df.clone();
    augment_star_ucsf(&mut df)?;
    Ok(df)
}

fn join_references(df: &mut DataFrame, fields: &ReferenceFields) -> Result<()> {
    if !(has_column(df, fields.index) && has_column(df, fields.path)) {
        return Ok(());
    }
    let indices = f64_values(df, fields.index)?;
    let paths = str_values(df, fields.path)?;
    let names = indices
        .into_iter()
        .zip(paths)
        .map(|(index, path)| {
            path.map(|path| ImageReference {
                index: index.map(|i| i as i64),
                path,
            })
            .map(|r| r.to_string())
        })
        .collect();
    set_str(df, fields.name, names)
}

/// Collapse derived columns back into image references, in place.
///
/// Image names are rebuilt as `%06d@path` from the derived index and path,
/// then every `ucsf`/`eman` column is dropped. With `resort_index`, records
/// are first restored to the order of a bookkeeping `index` column; that
/// column is always dropped.
pub fn simplify_star_ucsf(df: &mut DataFrame, resort_index: bool) -> Result<()> {
    join_references(df, &IMAGE_ORIGINAL)?;
    join_references(df, &IMAGE)?;

    for name in column_names(df) {
        if is_derived_field(&name) {
            df.drop_in_place(&name)?;
        }
    }

    if resort_index && has_column(df, INDEX_COLUMN) {
        let index = f64_values(df, INDEX_COLUMN)?;
        let mut order: Vec<usize> = (0..df.height()).collect();
        order.sort_by(|&a, &b| {
            index[a]
                .unwrap_or(f64::INFINITY)
                .total_cmp(&index[b].unwrap_or(f64::INFINITY))
        });
        *df = take_rows(df, &order)?;
    }
    drop_if_present(df, INDEX_COLUMN)
}

/// Simplified copy of `df`
pub fn simplified(df: &DataFrame) -> Result<DataFrame> {
    let mut df = df.clone();
    simplify_star_ucsf(&mut df, false)?;
    Ok(df)
}
