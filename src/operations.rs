//! Record-level operations on STAR tables.
//!
//! Each operation returns a new table. The column arithmetic operations also
//! have `*_in_place` forms that modify the table they are given.

use crate::constants::{find_class_column, relion, ucsf};
use crate::error::{Result, StarError};
use crate::frame::{column_names, has_column, is_numeric, set_str, str_values};
use crate::models::{TableSummary, basename};
use crate::transform::calculate_apix;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

fn require_all(df: &DataFrame, names: &[&str]) -> Result<()> {
    match names.iter().find(|name| !has_column(df, name)) {
        Some(missing) => Err(StarError::not_found(*missing)),
        None => Ok(()),
    }
}

fn copy_with<F>(df: &DataFrame, f: F) -> Result<DataFrame>
where
    F: FnOnce(&mut DataFrame) -> Result<()>,
{
    let mut df = df.clone();
    f(&mut df)?;
    Ok(df)
}

/// Replace columns with the results of `exprs`, evaluated against the table
/// as it was. The table is unchanged on error.
fn update_columns(df: &mut DataFrame, exprs: Vec<Expr>) -> Result<()> {
    *df = df.clone().lazy().with_columns(exprs).collect()?;
    Ok(())
}

fn float(name: &str) -> Expr {
    col(name).cast(DataType::Float64)
}

/// True if the table describes particles rather than micrographs
pub fn is_particle_star(df: &DataFrame) -> bool {
    has_column(df, relion::IMAGE_NAME) || relion::COORDS.iter().any(|c| has_column(df, c))
}

fn distinct_count(df: &DataFrame, name: &str) -> Result<usize> {
    match df.column(name) {
        Ok(column) => Ok(column.as_materialized_series().drop_nulls().n_unique()?),
        Err(_) => Ok(0),
    }
}

/// Record count, columns and the distinct micrographs and classes of a table
pub fn summarize(df: &DataFrame) -> Result<TableSummary> {
    let columns = column_names(df);
    let classes = match find_class_column(columns.iter().map(String::as_str)) {
        Some(name) => distinct_count(df, &name)?,
        None => 0,
    };
    Ok(TableSummary {
        records: df.height(),
        particles: is_particle_star(df),
        micrographs: distinct_count(df, relion::MICROGRAPH_NAME)?,
        classes,
        pixel_size: calculate_apix(df),
        columns,
    })
}

/// Keep the records whose class label is one of `classes`
pub fn select_classes(df: &DataFrame, classes: &[f64]) -> Result<DataFrame> {
    let names = column_names(df);
    let class_column = find_class_column(names.iter().map(String::as_str))
        .ok_or_else(|| StarError::not_found(relion::CLASS))?;

    let selected = match classes
        .iter()
        .map(|class| float(&class_column).eq(lit(*class)))
        .reduce(|a, b| a.or(b))
    {
        Some(predicate) => df.clone().lazy().filter(predicate).collect()?,
        None => df.clear(),
    };

    if selected.height() == 0 {
        return Err(StarError::empty_result(format!(
            "classes {:?} have no members in {}",
            classes, class_column
        )));
    }
    debug!("Selected {} of {} records", selected.height(), df.height());
    Ok(selected)
}

/// One record per micrograph with the mean CTF and microscope parameters
pub fn to_micrographs(df: &DataFrame) -> Result<DataFrame> {
    require_all(df, &[relion::MICROGRAPH_NAME])?;

    let aggregates: Vec<Expr> = relion::CTF_PARAMS
        .iter()
        .chain(relion::MICROSCOPE_PARAMS)
        .filter(|name| is_numeric(df, name))
        .map(|name| col(*name).mean())
        .collect();

    let micrographs = df
        .clone()
        .lazy()
        .group_by([col(relion::MICROGRAPH_NAME)])
        .agg(aggregates)
        .sort_by_exprs([col(relion::MICROGRAPH_NAME)], SortMultipleOptions::default())
        .collect()?;
    Ok(micrographs)
}

/// Partition records by micrograph, dropping the micrograph column from each part
pub fn split_micrographs(df: &DataFrame) -> Result<BTreeMap<String, DataFrame>> {
    require_all(df, &[relion::MICROGRAPH_NAME])?;

    let mut parts = BTreeMap::new();
    for mut part in df.partition_by_stable([relion::MICROGRAPH_NAME], true)? {
        let name = str_values(&part, relion::MICROGRAPH_NAME)?
            .into_iter()
            .next()
            .flatten();
        let Some(name) = name else { continue };
        part.drop_in_place(relion::MICROGRAPH_NAME)?;
        parts.insert(name, part);
    }
    Ok(parts)
}

/// Point every micrograph name at `dir`, keeping its basename
pub fn replace_micrograph_path_in_place(df: &mut DataFrame, dir: &str) -> Result<()> {
    let names = str_values(df, relion::MICROGRAPH_NAME)?
        .into_iter()
        .map(|name| {
            name.map(|name| {
                Path::new(dir)
                    .join(basename(&name))
                    .to_string_lossy()
                    .into_owned()
            })
        })
        .collect();
    set_str(df, relion::MICROGRAPH_NAME, names)
}

pub fn replace_micrograph_path(df: &DataFrame, dir: &str) -> Result<DataFrame> {
    copy_with(df, |df| replace_micrograph_path_in_place(df, dir))
}

/// Copy the current image name, index and path into their original fields
pub fn set_original_fields_in_place(df: &mut DataFrame) -> Result<()> {
    let pairs = [
        (relion::IMAGE_NAME, relion::IMAGE_ORIGINAL_NAME),
        (ucsf::IMAGE_INDEX, ucsf::IMAGE_ORIGINAL_INDEX),
        (ucsf::IMAGE_PATH, ucsf::IMAGE_ORIGINAL_PATH),
    ];
    let copies: Vec<Expr> = pairs
        .iter()
        .filter(|(source, _)| has_column(df, source))
        .map(|(source, target)| col(*source).alias(*target))
        .collect();
    update_columns(df, copies)
}

pub fn set_original_fields(df: &DataFrame) -> Result<DataFrame> {
    copy_with(df, set_original_fields_in_place)
}

/// Round half to even
fn round_half_even(x: Expr) -> Expr {
    let floor = x.clone().floor();
    let tie = (x.clone() - floor.clone()).eq(lit(0.5));
    let even = (floor.clone() % lit(2.0)).eq(lit(0.0));
    when(tie.and(even))
        .then(floor)
        .otherwise((x + lit(0.5)).floor())
}

/// Round toward zero
fn truncate(x: Expr) -> Expr {
    when(x.clone().gt_eq(lit(0.0)))
        .then(x.clone().floor())
        .otherwise(x.ceil())
}

/// Move each origin's integer part, rounded half to even, into the
/// coordinates. `coordinate - origin` is unchanged.
pub fn recenter_in_place(df: &mut DataFrame) -> Result<()> {
    shift_origins_into_coords(df, |origin| {
        let shift = round_half_even(origin.clone());
        (origin - shift.clone(), shift)
    })
}

pub fn recenter(df: &DataFrame) -> Result<DataFrame> {
    copy_with(df, recenter_in_place)
}

/// Like [`recenter_in_place`], but the integer part is truncated toward zero
pub fn recenter_modf_in_place(df: &mut DataFrame) -> Result<()> {
    shift_origins_into_coords(df, |origin| {
        let shift = truncate(origin.clone());
        (origin - shift.clone(), shift)
    })
}

pub fn recenter_modf(df: &DataFrame) -> Result<DataFrame> {
    copy_with(df, recenter_modf_in_place)
}

/// Fold the whole origin into the coordinates. Every origin becomes zero,
/// including missing ones.
pub fn zero_origins_in_place(df: &mut DataFrame) -> Result<()> {
    shift_origins_into_coords(df, |origin| (lit(0.0), origin))
}

pub fn zero_origins(df: &DataFrame) -> Result<DataFrame> {
    copy_with(df, zero_origins_in_place)
}

/// Split each origin into `(remainder, shift)`; the shift is subtracted from
/// the matching coordinate and the remainder becomes the new origin. A
/// missing origin shifts nothing.
fn shift_origins_into_coords<F>(df: &mut DataFrame, split: F) -> Result<()>
where
    F: Fn(Expr) -> (Expr, Expr),
{
    require_all(df, relion::ORIGINS)?;
    require_all(df, relion::COORDS)?;

    let mut exprs = Vec::new();
    for (origin, coord) in relion::ORIGINS.iter().zip(relion::COORDS) {
        let (remainder, shift) = split(float(origin));
        exprs.push(remainder.alias(*origin));
        exprs.push((float(coord) - shift.fill_null(lit(0.0))).alias(*coord));
    }
    update_columns(df, exprs)
}

fn scale_in_place(df: &mut DataFrame, names: &[&str], factor: f64) -> Result<()> {
    require_all(df, names)?;
    let scaled = names
        .iter()
        .map(|name| (float(name) * lit(factor)).alias(*name))
        .collect();
    update_columns(df, scaled)
}

pub fn scale_coordinates_in_place(df: &mut DataFrame, factor: f64) -> Result<()> {
    scale_in_place(df, relion::COORDS, factor)
}

pub fn scale_coordinates(df: &DataFrame, factor: f64) -> Result<DataFrame> {
    copy_with(df, |df| scale_coordinates_in_place(df, factor))
}

pub fn scale_origins_in_place(df: &mut DataFrame, factor: f64) -> Result<()> {
    scale_in_place(df, relion::ORIGINS, factor)
}

pub fn scale_origins(df: &DataFrame, factor: f64) -> Result<DataFrame> {
    copy_with(df, |df| scale_origins_in_place(df, factor))
}

pub fn scale_magnification_in_place(df: &mut DataFrame, factor: f64) -> Result<()> {
    scale_in_place(df, &[relion::MAGNIFICATION], factor)
}

pub fn scale_magnification(df: &DataFrame, factor: f64) -> Result<DataFrame> {
    copy_with(df, |df| scale_magnification_in_place(df, factor))
}

/// Mirror orientations to the opposite hand
pub fn invert_hand_in_place(df: &mut DataFrame) -> Result<()> {
    require_all(df, &[relion::ANGLEROT, relion::ANGLETILT])?;
    update_columns(
        df,
        vec![
            (float(relion::ANGLEROT) * lit(-1.0)).alias(relion::ANGLEROT),
            (lit(180.0) - float(relion::ANGLETILT)).alias(relion::ANGLETILT),
        ],
    )
}

pub fn invert_hand(df: &DataFrame) -> Result<DataFrame> {
    copy_with(df, invert_hand_in_place)
}

/// Keep the particles assigned to the same class in every subset.
///
/// A particle appearing `n` times, where `n` is the largest number of
/// records sharing an image name, is kept only if all `n` records carry the
/// same class. Record order is preserved.
pub fn all_same_class(df: &DataFrame) -> Result<DataFrame> {
    require_all(df, &[relion::IMAGE_NAME, relion::CLASS])?;

    let per_pair = len().over([col(relion::IMAGE_NAME), col(relion::CLASS)]);
    let subsets = len().over([col(relion::IMAGE_NAME)]).max();
    let agreed = df
        .clone()
        .lazy()
        .filter(per_pair.eq(subsets))
        .collect()?;

    debug!("{} of {} records agree on class", agreed.height(), df.height());
    Ok(agreed)
}
