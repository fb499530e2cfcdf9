//! STAR header parsing.
//!
//! Finds the run of `_field #n` lines that names the table columns and
//! reports where the data block starts, so the parser can read records
//! without re-scanning the header.

use crate::error::{Result, StarError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Column names and data position of a STAR table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarHeader {
    pub fields: Vec<String>,
    /// Zero-based line number of the first line after the header
    pub data_start: usize,
}

/// Outcome of feeding one line to the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Still before or inside the header
    Scanning,
    /// The line ended the header; it belongs to the data block
    Done,
}

/// Line-by-line header scanner
#[derive(Debug, Default)]
pub struct HeaderScanner {
    keep_index: bool,
    fields: Vec<String>,
    lines_seen: usize,
    done: bool,
}

impl HeaderScanner {
    pub fn new(keep_index: bool) -> Self {
        Self {
            keep_index,
            ..Default::default()
        }
    }

    /// Feed the next line.
    ///
    /// Lines before the first `_` line are skipped. The first line that is
    /// not a header line after that ends the header.
    pub fn push(&mut self, line: &str) -> ScanState {
        if self.done {
            return ScanState::Done;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('_') {
            self.fields.push(self.field_name(line));
        } else if !self.fields.is_empty() {
            self.done = true;
            return ScanState::Done;
        }
        self.lines_seen += 1;
        ScanState::Scanning
    }

    fn field_name(&self, line: &str) -> String {
        if self.keep_index {
            line.trim().to_string()
        } else {
            let before_comment = line.split('#').next().unwrap_or(line);
            before_comment
                .trim()
                .trim_start_matches('_')
                .to_string()
        }
    }

    /// Finish scanning. Fails if no header line was seen.
    pub fn finish(self, path: &Path) -> Result<StarHeader> {
        if self.fields.is_empty() {
            return Err(StarError::Format {
                path: path.to_path_buf(),
                line: self.lines_seen,
                reason: "no header fields found".to_string(),
            });
        }
        Ok(StarHeader {
            fields: self.fields,
            data_start: self.lines_seen,
        })
    }
}

/// Read only the header of a STAR file
pub fn read_star_header(path: &Path, keep_index: bool) -> Result<StarHeader> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut scanner = HeaderScanner::new(keep_index);
    for line in reader.lines() {
        let line = line?;
        if scanner.push(&line) == ScanState::Done {
            break;
        }
    }

    let header = scanner.finish(path)?;
    debug!(
        "Parsed header for {}: {} fields, data starts at line {}",
        path.display(),
        header.fields.len(),
        header.data_start
    );
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\ndata_images\n\nloop_\n_rlnCoordinateX #1\n_rlnCoordinateY #2\n_rlnImageName #3\n10 20 000001@a.mrcs\n";

    fn scan(text: &str, keep_index: bool) -> Result<StarHeader> {
        let mut scanner = HeaderScanner::new(keep_index);
        for line in text.lines() {
            if scanner.push(line) == ScanState::Done {
                break;
            }
        }
        scanner.finish(Path::new("test.star"))
    }

    #[test]
    fn test_strips_underscore_and_index() {
        let header = scan(SAMPLE, false).unwrap();
        assert_eq!(
            header.fields,
            vec!["rlnCoordinateX", "rlnCoordinateY", "rlnImageName"]
        );
        assert_eq!(header.data_start, 7);
    }

    #[test]
    fn test_keep_index_preserves_line() {
        let header = scan(SAMPLE, true).unwrap();
        assert_eq!(header.fields[0], "_rlnCoordinateX #1");
        assert_eq!(header.fields[2], "_rlnImageName #3");
    }

    #[test]
    fn test_header_without_ordinals() {
        let header = scan("loop_\n_rlnAngleRot\n_rlnAngleTilt\n1 2\n", false).unwrap();
        assert_eq!(header.fields, vec!["rlnAngleRot", "rlnAngleTilt"]);
        assert_eq!(header.data_start, 3);
    }

    #[test]
    fn test_missing_header_is_format_error() {
        let result = scan("data_images\nloop_\n1 2 3\n", false);
        assert!(matches!(result, Err(StarError::Format { .. })));
    }

    #[test]
    fn test_read_star_header_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let header = read_star_header(file.path(), false).unwrap();
        assert_eq!(header.fields.len(), 3);
        assert_eq!(header.data_start, 7);
    }
}
