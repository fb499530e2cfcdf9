//! STAR file reader.
//!
//! Reads the header with [`HeaderScanner`], tokenizes the data block on
//! whitespace and builds one typed polars column per field.

use crate::augment::augment_star_ucsf;
use crate::config::ParseOptions;
use crate::constants::relion;
use crate::error::{Result, StarError};
use crate::frame::{column_from_tokens, has_column, set_f64};
use crate::header::{HeaderScanner, ScanState};
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Parse a STAR file into a table
pub fn parse_star(path: &Path, options: &ParseOptions) -> Result<DataFrame> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let df = parse_lines(reader.lines(), path, options)?;
    debug!(
        "Parsed {}: {} records, {} columns",
        path.display(),
        df.height(),
        df.width()
    );
    Ok(df)
}

/// Parse STAR text held in memory. `name` is only used in error messages.
pub fn parse_star_str(text: &str, name: &str, options: &ParseOptions) -> Result<DataFrame> {
    let lines = text.lines().map(|line| Ok(line.to_string()));
    parse_lines(lines, Path::new(name), options)
}

fn parse_lines<I>(lines: I, path: &Path, options: &ParseOptions) -> Result<DataFrame>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let mut scanner = HeaderScanner::new(options.keep_index);
    let mut first_data_line = None;
    let mut lines = lines;

    for line in lines.by_ref() {
        let line = line?;
        if scanner.push(&line) == ScanState::Done {
            first_data_line = Some(line);
            break;
        }
    }
    let header = scanner.finish(path)?;
    let width = header.fields.len();

    let limit = options.max_records.unwrap_or(usize::MAX);
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); width];
    let mut records = 0usize;

    let data_lines = first_data_line.into_iter().map(Ok).chain(lines);
    for (offset, line) in data_lines.enumerate() {
        if records >= limit {
            break;
        }
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("data_") {
            debug!("Stopping at second data block in {}", path.display());
            break;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() != width {
            return Err(StarError::Format {
                path: path.to_path_buf(),
                line: header.data_start + offset + 1,
                reason: format!("expected {} fields, found {}", width, tokens.len()),
            });
        }
        for (column, token) in cells.iter_mut().zip(tokens) {
            column.push(token.to_string());
        }
        records += 1;
    }

    let columns = header
        .fields
        .iter()
        .zip(&cells)
        .map(|(name, values)| {
            let tokens: Vec<&str> = values.iter().map(String::as_str).collect();
            column_from_tokens(name, &tokens)
        })
        .collect();
    let mut df = DataFrame::new(columns)?;

    if !has_column(&df, relion::PHASESHIFT) {
        let height = df.height();
        set_f64(&mut df, relion::PHASESHIFT, vec![0.0; height])?;
    }

    if options.augment {
        augment_star_ucsf(&mut df)?;
    }

    Ok(df)
}
