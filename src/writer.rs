//! STAR file writer.
//!
//! Writes a single `data_images` loop block. The header is written by hand,
//! the records by the polars CSV writer with a space separator.

use crate::augment::simplify_star_ucsf;
use crate::config::WriteOptions;
use crate::constants::{DATA_BLOCK_NAME, STAR_EXTENSION, is_derived_field, relion, ucsf};
use crate::error::Result;
use crate::frame::{column_names, has_column, i64_values, str_values, take_rows};
use crate::natsort::natural_order;
use crate::operations::is_particle_star;
use polars::prelude::*;
use regex::Regex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// A field name ending in its `#N` column number
static INDEXED_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\d+$").expect("valid column index pattern"));

/// Move the canonical RELION fields to the front, keeping the others in
/// their current order
pub fn sort_fields(df: &DataFrame) -> Result<DataFrame> {
    let names = column_names(df);
    let ordered: Vec<String> = relion::FIELD_ORDER
        .iter()
        .filter(|name| has_column(df, name))
        .map(|name| name.to_string())
        .chain(
            names
                .into_iter()
                .filter(|name| !relion::FIELD_ORDER.contains(&name.as_str())),
        )
        .collect();
    Ok(df.select(ordered)?)
}

/// Sort particles naturally by image stack and position, or micrographs by
/// name. Tables with neither are returned unchanged.
pub fn sort_records(df: &DataFrame) -> Result<DataFrame> {
    let keys = if is_particle_star(df) {
        if !(has_column(df, ucsf::IMAGE_INDEX) && has_column(df, ucsf::IMAGE_PATH)) {
            return Ok(df.clone());
        }
        let paths = str_values(df, ucsf::IMAGE_PATH)?;
        let indices = i64_values(df, ucsf::IMAGE_INDEX)?;
        paths
            .into_iter()
            .zip(indices)
            .map(|(path, index)| match (path, index) {
                (Some(path), Some(index)) => Some(format!("{}_{}", path, index)),
                _ => None,
            })
            .collect::<Vec<_>>()
    } else if has_column(df, relion::MICROGRAPH_NAME) {
        str_values(df, relion::MICROGRAPH_NAME)?
    } else {
        return Ok(df.clone());
    };
    take_rows(df, &natural_order(&keys))
}

/// Header lines for the given column names, each with a leading `_`
fn header_lines(names: &[String]) -> String {
    let mut header = format!("\n{}\n\nloop_\n", DATA_BLOCK_NAME);
    for name in names {
        if !name.starts_with('_') {
            header.push('_');
        }
        header.push_str(name);
        header.push_str(" \n");
    }
    header
}

fn star_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text.ends_with(STAR_EXTENSION) {
        path.to_path_buf()
    } else {
        PathBuf::from(format!("{}{}", text, STAR_EXTENSION))
    }
}

/// Write `df` as a STAR file and return the path written.
///
/// `.star` is appended to `path` when missing. Columns already carrying a
/// `#N` suffix (from a table parsed with `keep_index`) are written as they
/// are; otherwise the suffixes are generated, after reordering the fields
/// when `resort_fields` is set.
pub fn write_star(path: &Path, df: &DataFrame, options: &WriteOptions) -> Result<PathBuf> {
    let path = star_path(path);

    let mut df = if options.resort_records {
        sort_records(df)?
    } else {
        df.clone()
    };

    if options.simplify && column_names(&df).iter().any(|name| is_derived_field(name)) {
        simplify_star_ucsf(&mut df, false)?;
    }

    let already_indexed = column_names(&df)
        .first()
        .is_some_and(|first| INDEXED_FIELD.is_match(first));

    let names = if already_indexed {
        column_names(&df)
    } else {
        if options.resort_fields {
            df = sort_fields(&df)?;
        }
        column_names(&df)
            .into_iter()
            .enumerate()
            .map(|(i, name)| format!("{} #{}", name, i + 1))
            .collect()
    };

    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header_lines(&names).as_bytes())?;

    CsvWriter::new(&mut writer)
        .include_header(false)
        .with_separator(b' ')
        .with_float_precision(Some(6))
        .with_null_value("nan".to_string())
        .finish(&mut df)?;
    writer.flush()?;

    debug!(
        "Wrote {}: {} records, {} columns",
        path.display(),
        df.height(),
        df.width()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::augmented;
    use std::fs;
    use tempfile::TempDir;

    fn particles() -> DataFrame {
        augmented(
            &DataFrame::new(vec![
                Column::new("extra".into(), vec![7i64, 8, 9]),
                Column::new(relion::COORDX.into(), vec![1.5f64, 2.0, 3.25]),
                Column::new(
                    relion::IMAGE_NAME.into(),
                    vec!["000010@s.mrcs", "000002@s.mrcs", "000001@s.mrcs"],
                ),
            ])
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_sort_fields() {
        let df = sort_fields(&particles()).unwrap();
        let names = column_names(&df);
        assert_eq!(names[0], relion::IMAGE_NAME);
        assert_eq!(names[1], relion::IMAGE_ORIGINAL_NAME);
        assert_eq!(names[2], relion::COORDX);
        assert_eq!(names[3], "extra");
    }

    #[test]
    fn test_sort_records_by_stack_position() {
        let df = sort_records(&particles()).unwrap();
        assert_eq!(
            str_values(&df, relion::IMAGE_NAME).unwrap(),
            vec![
                Some("000001@s.mrcs".to_string()),
                Some("000002@s.mrcs".to_string()),
                Some("000010@s.mrcs".to_string())
            ]
        );
    }

    #[test]
    fn test_sort_records_micrographs() {
        let df = DataFrame::new(vec![Column::new(
            relion::MICROGRAPH_NAME.into(),
            vec!["mic10.mrc", "mic9.mrc"],
        )])
        .unwrap();
        let df = sort_records(&df).unwrap();
        assert_eq!(
            str_values(&df, relion::MICROGRAPH_NAME).unwrap()[0].as_deref(),
            Some("mic9.mrc")
        );
    }

    #[test]
    fn test_write_layout() {
        let dir = TempDir::new().unwrap();
        let path = write_star(&dir.path().join("out"), &particles(), &WriteOptions::default())
            .unwrap();

        assert_eq!(path, dir.path().join("out.star"));
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "data_images");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "loop_");
        assert_eq!(lines[4], "_rlnImageName #1 ");
        assert_eq!(lines[5], "_rlnImageOriginalName #2 ");
        assert_eq!(lines[6], "_rlnCoordinateX #3 ");
        assert_eq!(lines[7], "_extra #4 ");
        assert_eq!(lines[8], "000010@s.mrcs 000010@s.mrcs 1.500000 7");
        assert_eq!(lines.len(), 11);
        assert!(!text.contains("ucsf"));
    }

    #[test]
    fn test_write_keeps_existing_indices() {
        let dir = TempDir::new().unwrap();
        let df = DataFrame::new(vec![
            Column::new("_rlnCoordinateY #1".into(), vec![1i64]),
            Column::new("_rlnCoordinateX #2".into(), vec![2i64]),
        ])
        .unwrap();
        let path = write_star(&dir.path().join("indexed.star"), &df, &WriteOptions::default())
            .unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("_rlnCoordinateY #1 \n_rlnCoordinateX #2 \n1 2\n"));
    }

    #[test]
    fn test_write_nulls_as_nan() {
        let dir = TempDir::new().unwrap();
        let df = DataFrame::new(vec![Column::new(
            relion::DEFOCUSU.into(),
            vec![Some(1.0f64), None],
        )])
        .unwrap();
        let path = write_star(&dir.path().join("ctf"), &df, &WriteOptions::default()).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.ends_with("1.000000\nnan\n"));
    }

    #[test]
    fn test_indexed_field_pattern() {
        assert!(INDEXED_FIELD.is_match("_rlnCoordinateX #12"));
        assert!(INDEXED_FIELD.is_match("rlnClassNumber #8"));
        assert!(!INDEXED_FIELD.is_match("rlnCoordinateX"));
        assert!(!INDEXED_FIELD.is_match("rlnCoordinateX #1b"));
        assert!(!INDEXED_FIELD.is_match("rlnCoordinateX #"));
    }
}
