//! Typed column access over polars data frames.
//!
//! STAR tables are plain `DataFrame`s. These helpers cover the text-level
//! work polars expressions don't: reading columns out for parsing image
//! references, writing them back, and typing columns built from raw tokens.

use crate::error::{Result, StarError};
use polars::prelude::*;

/// True if the table has a column called `name`
pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

/// Column names in table order
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.as_str().to_string())
        .collect()
}

/// Column names present in both tables, in the order of `left`
pub fn shared_columns(left: &DataFrame, right: &DataFrame) -> Vec<String> {
    column_names(left)
        .into_iter()
        .filter(|name| has_column(right, name))
        .collect()
}

fn require<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name).map_err(|_| StarError::not_found(name))
}

/// True for integer and float columns
pub fn is_numeric(df: &DataFrame, name: &str) -> bool {
    df.column(name)
        .map(|column| {
            let dtype = column.dtype();
            dtype.is_integer() || dtype.is_float()
        })
        .unwrap_or(false)
}

/// Read a column as floats. Non-numeric cells become `None`.
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = require(df, name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Read a column as floats, treating nulls as NaN
pub fn f64_dense(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    Ok(f64_values(df, name)?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

/// Read a column as text
pub fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = require(df, name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

/// Insert or replace a float column, keeping its position if it exists
pub fn set_f64(df: &mut DataFrame, name: &str, values: Vec<f64>) -> Result<()> {
    df.with_column(Column::new(name.into(), values))?;
    Ok(())
}

/// Insert or replace a nullable integer column
pub fn set_i64_opt(df: &mut DataFrame, name: &str, values: Vec<Option<i64>>) -> Result<()> {
    df.with_column(Column::new(name.into(), values))?;
    Ok(())
}

/// Insert or replace a nullable text column
pub fn set_str(df: &mut DataFrame, name: &str, values: Vec<Option<String>>) -> Result<()> {
    df.with_column(Column::new(name.into(), values))?;
    Ok(())
}

/// New table holding the given rows, in the given order
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let indices: Vec<IdxSize> = rows.iter().map(|&row| row as IdxSize).collect();
    let idx = IdxCa::from_vec("idx".into(), indices);
    Ok(df.take(&idx)?)
}

/// Drop a column if present
pub fn drop_if_present(df: &mut DataFrame, name: &str) -> Result<()> {
    if has_column(df, name) {
        df.drop_in_place(name)?;
    }
    Ok(())
}

/// Read a column as integers
pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let series = require(df, name)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    Ok(series.i64()?.into_iter().collect())
}

/// Build a column from raw text tokens, choosing Int64, Float64 or String.
pub fn column_from_tokens(name: &str, tokens: &[&str]) -> Column {
    let ints: Option<Vec<i64>> = tokens.iter().map(|t| t.parse::<i64>().ok()).collect();
    if let Some(ints) = ints {
        return Column::new(name.into(), ints);
    }
    let floats: Option<Vec<f64>> = tokens.iter().map(|t| t.parse::<f64>().ok()).collect();
    if let Some(floats) = floats {
        return Column::new(name.into(), floats);
    }
    let strings: Vec<&str> = tokens.to_vec();
    Column::new(name.into(), strings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        DataFrame::new(vec![
            Column::new("a".into(), vec![1i64, 2, 3]),
            Column::new("b".into(), vec![1.5f64, 2.5, 3.5]),
            Column::new("c".into(), vec!["x", "y", "z"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_column_from_tokens_infers_types() {
        let ints = column_from_tokens("i", &["1", "-2", "30"]);
        assert_eq!(ints.dtype(), &DataType::Int64);

        let floats = column_from_tokens("f", &["1", "2.5", "1e3"]);
        assert_eq!(floats.dtype(), &DataType::Float64);

        let strings = column_from_tokens("s", &["000001@a.mrcs", "2"]);
        assert_eq!(strings.dtype(), &DataType::String);
    }

    #[test]
    fn test_f64_values_casts_integers() {
        let df = sample();
        assert_eq!(
            f64_values(&df, "a").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn test_missing_column_is_not_found() {
        let df = sample();
        match f64_values(&df, "missing") {
            Err(StarError::NotFound { field }) => assert_eq!(field, "missing"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_set_f64_keeps_position() {
        let mut df = sample();
        set_f64(&mut df, "a", vec![9.0, 9.0, 9.0]).unwrap();
        assert_eq!(column_names(&df), vec!["a", "b", "c"]);
        assert_eq!(df.column("a").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_take_rows_reorders() {
        let df = sample();
        let taken = take_rows(&df, &[2, 0]).unwrap();
        assert_eq!(
            str_values(&taken, "c").unwrap(),
            vec![Some("z".to_string()), Some("x".to_string())]
        );
    }
}
