//! Key inference and left joins between STAR tables.
//!
//! Particle and micrograph tables produced by different programs rarely share
//! a declared key. The merge key is inferred from the shared columns with the
//! best coverage, then selected columns of the secondary table are joined
//! onto the primary table without changing its records.

use crate::config::{DuplicateKeyPolicy, MergeOptions};
use crate::constants::{relion, ucsf};
use crate::error::{Result, StarError};
use crate::frame::{column_names, has_column, is_numeric, shared_columns, str_values};
use crate::models::MergeKey;
use polars::prelude::*;
use tracing::{debug, warn};

/// Suffix given to incoming columns that collide with primary columns
const INCOMING_SUFFIX: &str = "__incoming";

/// Prefix of the temporary columns both tables are joined on
const KEY_PREFIX: &str = "__merge_key";

/// Type two columns are compared as: numbers as floats, anything else as text
fn common_dtype(left: &DataType, right: &DataType) -> DataType {
    let numeric = |dtype: &DataType| dtype.is_integer() || dtype.is_float();
    if left == right {
        left.clone()
    } else if numeric(left) && numeric(right) {
        DataType::Float64
    } else {
        DataType::String
    }
}

fn key_dtype(left: &DataFrame, left_name: &str, right: &DataFrame, right_name: &str) -> DataType {
    if is_numeric(left, left_name) && is_numeric(right, right_name) {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// Key columns cast to their join type under the temporary key names
fn key_exprs(names: &[String], dtypes: &[DataType]) -> Vec<Expr> {
    names
        .iter()
        .zip(dtypes)
        .enumerate()
        .map(|(i, (name, dtype))| {
            col(name.as_str())
                .cast(dtype.clone())
                .alias(format!("{}{}", KEY_PREFIX, i))
        })
        .collect()
}

fn join_columns(n: usize) -> Vec<Expr> {
    (0..n).map(|i| col(format!("{}{}", KEY_PREFIX, i))).collect()
}

/// True if at least `threshold` of the primary records have a value of
/// `field` that also occurs in the secondary table
fn covers(
    primary: &DataFrame,
    secondary: &DataFrame,
    field: &str,
    threshold: f64,
) -> Result<bool> {
    let names = [field.to_string()];
    let dtypes = [key_dtype(primary, field, secondary, field)];

    let distinct = secondary
        .clone()
        .lazy()
        .select(key_exprs(&names, &dtypes))
        .group_by(join_columns(1))
        .agg([len()]);
    let shared = primary
        .clone()
        .lazy()
        .select(key_exprs(&names, &dtypes))
        .join(
            distinct,
            join_columns(1),
            join_columns(1),
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?
        .height();
    Ok(shared as f64 >= primary.height() as f64 * threshold)
}

/// Infer the column(s) to join two tables on.
///
/// Rules are tried in order, the first one that holds wins:
/// 1. image name
/// 2. image basename plus image index
/// 3. micrograph name, with coordinates when both tables have them
/// 4. micrograph basename
pub fn merge_key(
    primary: &DataFrame,
    secondary: &DataFrame,
    threshold: f64,
) -> Result<Option<MergeKey>> {
    let shared = shared_columns(primary, secondary);
    if shared.is_empty() {
        return Ok(None);
    }
    let is_shared = |name: &str| shared.iter().any(|s| s == name);

    if is_shared(relion::IMAGE_NAME) && covers(primary, secondary, relion::IMAGE_NAME, threshold)? {
        return Ok(Some(MergeKey::image_name()));
    }

    if is_shared(ucsf::IMAGE_BASENAME)
        && covers(primary, secondary, ucsf::IMAGE_BASENAME, threshold)?
    {
        return Ok(Some(MergeKey::image_basename_index()));
    }

    if is_shared(relion::MICROGRAPH_NAME)
        && covers(primary, secondary, relion::MICROGRAPH_NAME, threshold)?
    {
        if relion::COORDS.iter().any(|c| is_shared(c)) {
            return Ok(Some(MergeKey::micrograph_coords()));
        }
        return Ok(Some(MergeKey::micrograph_name()));
    }

    if is_shared(ucsf::MICROGRAPH_BASENAME)
        && covers(primary, secondary, ucsf::MICROGRAPH_BASENAME, threshold)?
    {
        return Ok(Some(MergeKey::micrograph_basename()));
    }

    Ok(None)
}

/// Fail on the first key value that occurs more than once
fn reject_duplicates(keys: &DataFrame, key: &MergeKey) -> Result<()> {
    let duplicated = keys.filter(&keys.is_duplicated()?)?;
    if duplicated.height() == 0 {
        return Ok(());
    }
    let value = column_names(&duplicated)
        .iter()
        .map(|name| -> Result<String> {
            Ok(str_values(&duplicated, name)?
                .into_iter()
                .next()
                .flatten()
                .unwrap_or_default())
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    Err(StarError::DuplicateKey {
        key: key.to_string(),
        value,
    })
}

/// Primary table with the incoming columns appended as nulls
fn with_empty_columns(
    primary: &DataFrame,
    secondary: &DataFrame,
    incoming: &[String],
) -> Result<DataFrame> {
    let mut merged = primary.clone();
    let height = primary.height();
    for name in incoming.iter().filter(|name| !has_column(primary, name)) {
        let dtype = secondary.column(name)?.dtype().clone();
        merged.with_column(Series::full_null(name.as_str().into(), height, &dtype))?;
    }
    Ok(merged)
}

/// Left-join `fields` from `secondary` onto `primary`.
///
/// The result has exactly the primary's records, in order. For a column
/// present in both tables the primary value is kept unless it is null.
/// Incoming columns that are new to the primary are appended. When no key
/// is given and none can be inferred, the new columns are added with every
/// value missing.
pub fn smart_merge(
    primary: &DataFrame,
    secondary: &DataFrame,
    fields: &[&str],
    key: Option<&MergeKey>,
    left_key: Option<&MergeKey>,
    options: &MergeOptions,
) -> Result<DataFrame> {
    let key = match key {
        Some(key) => Some(key.clone()),
        None => merge_key(primary, secondary, options.threshold)?,
    };

    let incoming: Vec<String> = column_names(secondary)
        .into_iter()
        .filter(|name| fields.contains(&name.as_str()))
        .collect();

    let Some(key) = key else {
        warn!("No merge key found, merged columns will be empty");
        return with_empty_columns(primary, secondary, &incoming);
    };

    let left_key = left_key.unwrap_or(&key);
    if left_key.len() != key.len() {
        return Err(StarError::validation(format!(
            "left key {} and key {} differ in length",
            left_key, key
        )));
    }
    if let Some(missing) = left_key.fields().iter().find(|f| !has_column(primary, f)) {
        return Err(StarError::not_found(missing.clone()));
    }
    if let Some(missing) = key.fields().iter().find(|f| !has_column(secondary, f)) {
        return Err(StarError::not_found(missing.clone()));
    }

    let n = key.len();
    let dtypes: Vec<DataType> = left_key
        .fields()
        .iter()
        .zip(key.fields())
        .map(|(left, right)| key_dtype(primary, left, secondary, right))
        .collect();

    // Secondary records with a complete key, reduced to key and incoming columns
    let right_columns: Vec<Expr> = key_exprs(key.fields(), &dtypes)
        .into_iter()
        .chain(incoming.iter().map(|name| col(name.as_str())))
        .collect();
    let mut right = secondary.clone().lazy().select(right_columns);
    if let Some(complete) = join_columns(n)
        .into_iter()
        .map(|k| k.is_not_null())
        .reduce(|a, b| a.and(b))
    {
        right = right.filter(complete);
    }

    let right = match options.duplicate_keys {
        DuplicateKeyPolicy::Error => {
            let keys = right.clone().select(join_columns(n)).collect()?;
            reject_duplicates(&keys, &key)?;
            right
        }
        DuplicateKeyPolicy::LastWins => right.group_by_stable(join_columns(n)).agg(
            incoming
                .iter()
                .map(|name| col(name.as_str()).last())
                .collect::<Vec<_>>(),
        ),
    };

    let mut args = JoinArgs::new(JoinType::Left);
    args.suffix = Some(INCOMING_SUFFIX.into());
    args.maintain_order = MaintainOrderJoin::Left;

    let fills: Vec<Expr> = incoming
        .iter()
        .filter(|name| has_column(primary, name))
        .map(|name| -> Result<Expr> {
            let dtype = common_dtype(
                primary.column(name)?.dtype(),
                secondary.column(name)?.dtype(),
            );
            Ok(col(name.as_str())
                .cast(dtype.clone())
                .fill_null(col(format!("{}{}", name, INCOMING_SUFFIX)).cast(dtype))
                .alias(name.as_str()))
        })
        .collect::<Result<_>>()?;

    let output: Vec<Expr> = column_names(primary)
        .iter()
        .chain(incoming.iter().filter(|name| !has_column(primary, name)))
        .map(|name| col(name.as_str()))
        .collect();

    let merged = primary
        .clone()
        .lazy()
        .with_columns(key_exprs(left_key.fields(), &dtypes))
        .join(right, join_columns(n), join_columns(n), args)
        .with_columns(fills)
        .select(output)
        .collect()?;

    debug!(
        "Merged {} columns on {} into {} records",
        incoming.len(),
        key,
        merged.height()
    );
    Ok(merged)
}
